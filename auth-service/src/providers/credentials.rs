use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use common_auth::{AuthCredentials, AuthUser};
use rand_core::OsRng;
use tracing::debug;
use uuid::Uuid;

/// Pluggable lookup behind the credentials provider. Bad credentials are
/// `Ok(None)`, never an error; errors are reserved for backend failures.
#[async_trait]
pub trait CredentialsBackend: Send + Sync {
    async fn authorize(&self, credentials: &AuthCredentials) -> Result<Option<AuthUser>>;

    /// First-time signup with the same contract. Backends that do not
    /// support registration return None.
    async fn register(&self, _credentials: &AuthCredentials) -> Result<Option<AuthUser>> {
        Ok(None)
    }
}

pub struct CredentialsProvider {
    id: String,
    name: String,
    backend: Arc<dyn CredentialsBackend>,
}

impl CredentialsProvider {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        backend: Arc<dyn CredentialsBackend>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            backend,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn authorize(&self, credentials: &AuthCredentials) -> Result<Option<AuthUser>> {
        self.backend.authorize(credentials).await
    }

    pub async fn register(&self, credentials: &AuthCredentials) -> Result<Option<AuthUser>> {
        self.backend.register(credentials).await
    }
}

struct StoredUser {
    user: AuthUser,
    password_hash: String,
}

/// Argon2-backed in-memory user directory.
pub struct InMemoryCredentialsBackend {
    users: RwLock<HashMap<String, StoredUser>>,
    allow_registration: bool,
}

impl InMemoryCredentialsBackend {
    pub fn new(allow_registration: bool) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            allow_registration,
        }
    }

    pub fn add_user(&self, user: AuthUser, password: &str) -> Result<()> {
        let identifier = user
            .email
            .clone()
            .ok_or_else(|| anyhow!("user '{}' has no email identifier", user.id))?;
        let password_hash = hash_password(password)?;
        let mut guard = self.users.write().expect("rwlock poisoned");
        guard.insert(
            identifier,
            StoredUser {
                user,
                password_hash,
            },
        );
        Ok(())
    }
}

#[async_trait]
impl CredentialsBackend for InMemoryCredentialsBackend {
    async fn authorize(&self, credentials: &AuthCredentials) -> Result<Option<AuthUser>> {
        let Some(identifier) = credentials.identifier() else {
            return Ok(None);
        };
        let Some(password) = credentials.password.as_deref() else {
            return Ok(None);
        };

        let guard = self.users.read().expect("rwlock poisoned");
        let Some(stored) = guard.get(identifier) else {
            debug!(identifier, "no such user");
            return Ok(None);
        };

        let parsed_hash = PasswordHash::new(&stored.password_hash)
            .map_err(|err| anyhow!("stored hash did not parse: {err}"))?;
        let valid = Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok();
        Ok(valid.then(|| stored.user.clone()))
    }

    async fn register(&self, credentials: &AuthCredentials) -> Result<Option<AuthUser>> {
        if !self.allow_registration {
            return Ok(None);
        }
        let Some(identifier) = credentials.identifier() else {
            return Ok(None);
        };
        let Some(password) = credentials.password.as_deref() else {
            return Ok(None);
        };
        if password.trim().is_empty() {
            return Ok(None);
        }

        let password_hash = hash_password(password)?;
        let mut guard = self.users.write().expect("rwlock poisoned");
        if guard.contains_key(identifier) {
            return Ok(None);
        }

        let user = AuthUser::new(Uuid::new_v4().to_string())
            .map_err(|err| anyhow!("{err}"))?
            .with_email(identifier);
        guard.insert(
            identifier.to_string(),
            StoredUser {
                user: user.clone(),
                password_hash,
            },
        );
        Ok(Some(user))
    }
}

fn hash_password(password: &str) -> Result<String> {
    if password.trim().is_empty() {
        return Err(anyhow!("password must not be empty"));
    }
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| anyhow!("failed to hash password: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials(email: &str, password: &str) -> AuthCredentials {
        AuthCredentials {
            email: Some(email.to_string()),
            password: Some(password.to_string()),
            ..AuthCredentials::default()
        }
    }

    fn seeded_backend() -> InMemoryCredentialsBackend {
        let backend = InMemoryCredentialsBackend::new(true);
        let user = AuthUser::new("user-1")
            .expect("user")
            .with_email("user@example.com")
            .with_roles(["admin"]);
        backend.add_user(user, "secret").expect("seed");
        backend
    }

    #[tokio::test]
    async fn valid_password_authorizes() {
        let backend = seeded_backend();
        let user = backend
            .authorize(&credentials("user@example.com", "secret"))
            .await
            .expect("authorize")
            .expect("user");
        assert_eq!(user.id, "user-1");
        assert!(user.has_role("admin"));
    }

    #[tokio::test]
    async fn wrong_password_is_none_not_error() {
        let backend = seeded_backend();
        let outcome = backend
            .authorize(&credentials("user@example.com", "wrong"))
            .await
            .expect("authorize");
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn unknown_user_is_none() {
        let backend = seeded_backend();
        let outcome = backend
            .authorize(&credentials("ghost@example.com", "secret"))
            .await
            .expect("authorize");
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn register_creates_then_rejects_duplicates() {
        let backend = InMemoryCredentialsBackend::new(true);
        let first = backend
            .register(&credentials("new@example.com", "pw"))
            .await
            .expect("register")
            .expect("created");
        assert_eq!(first.email.as_deref(), Some("new@example.com"));

        let duplicate = backend
            .register(&credentials("new@example.com", "pw"))
            .await
            .expect("register");
        assert!(duplicate.is_none());

        // The registered password now authorizes.
        assert!(backend
            .authorize(&credentials("new@example.com", "pw"))
            .await
            .expect("authorize")
            .is_some());
    }

    #[tokio::test]
    async fn registration_can_be_disabled() {
        let backend = InMemoryCredentialsBackend::new(false);
        let outcome = backend
            .register(&credentials("new@example.com", "pw"))
            .await
            .expect("register");
        assert!(outcome.is_none());
    }
}
