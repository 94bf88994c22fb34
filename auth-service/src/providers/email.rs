use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common_auth::AuthUser;
use tracing::info;

use crate::error::{FlowError, FlowResult};
use crate::tokens::{random_token, sha256_hex};

/// Single-use magic-link token, hashed at rest. Issuing a new token for an
/// identifier invalidates every previously issued, unconsumed token for that
/// identifier; a consumed or expired token never validates again.
#[derive(Debug, Clone)]
pub struct AuthVerificationToken {
    pub identifier: String,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait VerificationTokenStore: Send + Sync {
    /// Persist a token, replacing any prior token for the identifier.
    async fn create(&self, token: AuthVerificationToken) -> Result<()>;

    /// Atomic single-use take by (identifier, token hash).
    async fn consume(
        &self,
        identifier: &str,
        token_hash: &str,
    ) -> Result<Option<AuthVerificationToken>>;
}

/// One live token per identifier, so issuance invalidates prior tokens by
/// construction.
#[derive(Default)]
pub struct InMemoryVerificationTokenStore {
    inner: Mutex<HashMap<String, AuthVerificationToken>>,
}

impl InMemoryVerificationTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VerificationTokenStore for InMemoryVerificationTokenStore {
    async fn create(&self, token: AuthVerificationToken) -> Result<()> {
        let mut guard = self.inner.lock().expect("mutex poisoned");
        guard.insert(token.identifier.clone(), token);
        Ok(())
    }

    async fn consume(
        &self,
        identifier: &str,
        token_hash: &str,
    ) -> Result<Option<AuthVerificationToken>> {
        let mut guard = self.inner.lock().expect("mutex poisoned");
        match guard.get(identifier) {
            Some(stored) if stored.token_hash == token_hash => Ok(guard.remove(identifier)),
            _ => Ok(None),
        }
    }
}

/// Delivery side-effect injected by the embedding application (SMTP, queue).
#[async_trait]
pub trait VerificationSender: Send + Sync {
    async fn send_verification_request(
        &self,
        identifier: &str,
        token: &str,
        callback_url: Option<&str>,
    ) -> Result<()>;
}

/// Default sender for development: logs the sign-in link.
pub struct TracingVerificationSender;

#[async_trait]
impl VerificationSender for TracingVerificationSender {
    async fn send_verification_request(
        &self,
        identifier: &str,
        token: &str,
        callback_url: Option<&str>,
    ) -> Result<()> {
        info!(identifier, token, ?callback_url, "verification request");
        Ok(())
    }
}

pub struct EmailProvider {
    id: String,
    name: String,
    store: Arc<dyn VerificationTokenStore>,
    sender: Arc<dyn VerificationSender>,
    token_ttl_seconds: i64,
}

impl EmailProvider {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        store: Arc<dyn VerificationTokenStore>,
        sender: Arc<dyn VerificationSender>,
        token_ttl_seconds: i64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            store,
            sender,
            token_ttl_seconds,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mint and persist a fresh token for the identifier, then hand delivery
    /// to the injected sender.
    pub async fn begin_sign_in(
        &self,
        identifier: &str,
        callback_url: Option<&str>,
    ) -> FlowResult<()> {
        let raw = random_token();
        let token = AuthVerificationToken {
            identifier: identifier.to_string(),
            token_hash: sha256_hex(&raw),
            expires_at: Utc::now() + Duration::seconds(self.token_ttl_seconds),
        };
        self.store
            .create(token)
            .await
            .map_err(FlowError::internal)?;
        self.sender
            .send_verification_request(identifier, &raw, callback_url)
            .await
            .map_err(FlowError::internal)
    }

    /// Validate and consume a presented token; success proceeds into normal
    /// session issuance like any other provider.
    pub async fn complete_sign_in(&self, identifier: &str, token: &str) -> FlowResult<AuthUser> {
        let consumed = self
            .store
            .consume(identifier, &sha256_hex(token))
            .await
            .map_err(FlowError::internal)?
            .ok_or(FlowError::InvalidVerificationToken)?;
        if consumed.expires_at <= Utc::now() {
            return Err(FlowError::InvalidVerificationToken);
        }
        AuthUser::new(identifier)
            .map(|user| user.with_email(identifier))
            .map_err(FlowError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    pub struct RecordingSender {
        pub sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl VerificationSender for RecordingSender {
        async fn send_verification_request(
            &self,
            identifier: &str,
            token: &str,
            _callback_url: Option<&str>,
        ) -> Result<()> {
            self.sent
                .lock()
                .expect("mutex poisoned")
                .push((identifier.to_string(), token.to_string()));
            Ok(())
        }
    }

    fn provider(ttl_seconds: i64) -> (EmailProvider, Arc<RecordingSender>) {
        let sender = Arc::new(RecordingSender::default());
        let provider = EmailProvider::new(
            "email",
            "Email",
            Arc::new(InMemoryVerificationTokenStore::new()),
            sender.clone(),
            ttl_seconds,
        );
        (provider, sender)
    }

    fn last_token(sender: &RecordingSender) -> String {
        sender
            .sent
            .lock()
            .expect("mutex poisoned")
            .last()
            .expect("a token was sent")
            .1
            .clone()
    }

    #[tokio::test]
    async fn token_is_single_use() {
        let (provider, sender) = provider(600);
        provider
            .begin_sign_in("user@example.com", None)
            .await
            .expect("begin");
        let token = last_token(&sender);

        let user = provider
            .complete_sign_in("user@example.com", &token)
            .await
            .expect("first consume");
        assert_eq!(user.email.as_deref(), Some("user@example.com"));

        let err = provider
            .complete_sign_in("user@example.com", &token)
            .await
            .expect_err("second consume");
        assert!(matches!(err, FlowError::InvalidVerificationToken));
    }

    #[tokio::test]
    async fn reissue_invalidates_prior_tokens() {
        let (provider, sender) = provider(600);
        provider
            .begin_sign_in("user@example.com", None)
            .await
            .expect("first issue");
        let first = last_token(&sender);
        provider
            .begin_sign_in("user@example.com", None)
            .await
            .expect("second issue");
        let second = last_token(&sender);

        let err = provider
            .complete_sign_in("user@example.com", &first)
            .await
            .expect_err("first token is dead");
        assert!(matches!(err, FlowError::InvalidVerificationToken));

        provider
            .complete_sign_in("user@example.com", &second)
            .await
            .expect("second token works");
    }

    #[tokio::test]
    async fn expired_token_never_validates() {
        let (provider, sender) = provider(-1);
        provider
            .begin_sign_in("user@example.com", None)
            .await
            .expect("begin");
        let token = last_token(&sender);

        let err = provider
            .complete_sign_in("user@example.com", &token)
            .await
            .expect_err("expired");
        assert!(matches!(err, FlowError::InvalidVerificationToken));
    }

    #[tokio::test]
    async fn wrong_identifier_does_not_consume() {
        let (provider, sender) = provider(600);
        provider
            .begin_sign_in("user@example.com", None)
            .await
            .expect("begin");
        let token = last_token(&sender);

        assert!(provider
            .complete_sign_in("other@example.com", &token)
            .await
            .is_err());
        // The original identifier can still redeem it.
        provider
            .complete_sign_in("user@example.com", &token)
            .await
            .expect("still consumable");
    }
}
