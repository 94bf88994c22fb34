use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration as StdDuration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common_auth::claims::claim_timestamp;
use common_auth::{AuthPrincipal, AuthUser, JwtIssuer, JwtPayload, JwtVerifier};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::callbacks::AuthCallbacks;
use crate::error::{FlowError, FlowResult};
use crate::tokens::random_token;

/// The resolved session for a request. Constructed fresh on every sign-in
/// and on every refresh; never mutated in place.
#[derive(Debug, Clone, Serialize)]
pub struct AuthSession {
    pub user: AuthUser,
    pub expires_at: DateTime<Utc>,
    pub strategy: &'static str,
    #[serde(skip_serializing)]
    pub token: Option<String>,
}

/// Server-side state backing the opaque-cookie strategy and the anonymous
/// CSRF sessions. A record without a principal is an anonymous session.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub principal: Option<AuthPrincipal>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub csrf_token: Option<String>,
}

/// Request-scoped key/value contract the auth core needs from the embedding
/// application's session backend.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<SessionRecord>>;
    async fn put(&self, id: &str, record: SessionRecord, ttl: StdDuration) -> Result<()>;
    async fn remove(&self, id: &str) -> Result<()>;
}

#[derive(Default)]
pub struct InMemorySessionStore {
    inner: Mutex<HashMap<String, (SessionRecord, Instant)>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, id: &str) -> Result<Option<SessionRecord>> {
        let mut guard = self.inner.lock().expect("mutex poisoned");
        match guard.get(id) {
            Some((record, deadline)) if *deadline > Instant::now() => Ok(Some(record.clone())),
            Some(_) => {
                guard.remove(id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, id: &str, record: SessionRecord, ttl: StdDuration) -> Result<()> {
        let mut guard = self.inner.lock().expect("mutex poisoned");
        guard.insert(id.to_string(), (record, Instant::now() + ttl));
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let mut guard = self.inner.lock().expect("mutex poisoned");
        guard.remove(id);
        Ok(())
    }
}

pub struct IssuedSession {
    pub session: AuthSession,
    /// Value for the strategy's cookie: the opaque session id or the signed
    /// JWT.
    pub cookie_value: String,
}

pub struct ResolvedSession {
    pub session: AuthSession,
    pub principal: AuthPrincipal,
    pub issued_at: DateTime<Utc>,
    /// Present when the lazy refresh reissued the session on this read.
    pub rotated_cookie: Option<String>,
}

/// Closed set of session strategies; both expose the same issue / resolve /
/// invalidate contract and the same lazy refresh behavior.
pub enum SessionStrategy {
    Cookie(CookieSessionStrategy),
    Jwt(JwtSessionStrategy),
}

impl SessionStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            SessionStrategy::Cookie(_) => "cookie",
            SessionStrategy::Jwt(_) => "jwt",
        }
    }

    pub async fn issue(
        &self,
        principal: &AuthPrincipal,
        callbacks: &dyn AuthCallbacks,
    ) -> FlowResult<IssuedSession> {
        match self {
            SessionStrategy::Cookie(strategy) => strategy.issue(principal).await,
            SessionStrategy::Jwt(strategy) => strategy.issue(principal, callbacks),
        }
    }

    pub async fn resolve(
        &self,
        token: &str,
        callbacks: &dyn AuthCallbacks,
    ) -> FlowResult<Option<ResolvedSession>> {
        match self {
            SessionStrategy::Cookie(strategy) => strategy.resolve(token).await,
            SessionStrategy::Jwt(strategy) => strategy.resolve(token, callbacks).await,
        }
    }

    pub async fn invalidate(&self, token: &str) -> FlowResult<()> {
        match self {
            SessionStrategy::Cookie(strategy) => strategy.invalidate(token).await,
            // Stateless: the cookie clear on the response is the whole story.
            SessionStrategy::Jwt(_) => Ok(()),
        }
    }
}

/// Opaque identifier in the cookie, principal held server-side.
pub struct CookieSessionStrategy {
    store: Arc<dyn SessionStore>,
    ttl_seconds: i64,
    update_age_seconds: i64,
}

impl CookieSessionStrategy {
    pub fn new(
        store: Arc<dyn SessionStore>,
        ttl_seconds: i64,
        update_age_seconds: i64,
    ) -> Self {
        Self {
            store,
            ttl_seconds,
            update_age_seconds,
        }
    }

    async fn issue(&self, principal: &AuthPrincipal) -> FlowResult<IssuedSession> {
        let session_id = random_token();
        let now = Utc::now();
        let expires_at = now + Duration::seconds(self.ttl_seconds);
        let record = SessionRecord {
            principal: Some(principal.clone()),
            issued_at: now,
            expires_at,
            csrf_token: None,
        };
        self.store
            .put(
                &session_id,
                record,
                StdDuration::from_secs(self.ttl_seconds.max(0) as u64),
            )
            .await
            .map_err(FlowError::internal)?;
        Ok(IssuedSession {
            session: AuthSession {
                user: principal.clone().into_user(),
                expires_at,
                strategy: "cookie",
                token: None,
            },
            cookie_value: session_id,
        })
    }

    async fn resolve(&self, session_id: &str) -> FlowResult<Option<ResolvedSession>> {
        let Some(record) = self
            .store
            .get(session_id)
            .await
            .map_err(FlowError::internal)?
        else {
            return Ok(None);
        };
        let Some(principal) = record.principal.clone() else {
            // Anonymous CSRF session: not an authenticated session.
            return Ok(None);
        };
        let now = Utc::now();
        if record.expires_at <= now {
            self.store
                .remove(session_id)
                .await
                .map_err(FlowError::internal)?;
            return Ok(None);
        }

        let age_seconds = (now - record.issued_at).num_seconds();
        if age_seconds >= self.update_age_seconds {
            self.store
                .remove(session_id)
                .await
                .map_err(FlowError::internal)?;
            let fresh = self.issue(&principal).await?;
            debug!(age_seconds, "session passed update age, reissued");
            return Ok(Some(ResolvedSession {
                session: fresh.session,
                principal,
                issued_at: now,
                rotated_cookie: Some(fresh.cookie_value),
            }));
        }

        Ok(Some(ResolvedSession {
            session: AuthSession {
                user: principal.clone().into_user(),
                expires_at: record.expires_at,
                strategy: "cookie",
                token: None,
            },
            principal,
            issued_at: record.issued_at,
            rotated_cookie: None,
        }))
    }

    async fn invalidate(&self, session_id: &str) -> FlowResult<()> {
        self.store
            .remove(session_id)
            .await
            .map_err(FlowError::internal)
    }
}

/// Principal serialized into a signed, stateless cookie via the JWT codec.
pub struct JwtSessionStrategy {
    issuer: JwtIssuer,
    verifier: JwtVerifier,
    update_age_seconds: i64,
}

impl JwtSessionStrategy {
    pub fn new(issuer: JwtIssuer, verifier: JwtVerifier, update_age_seconds: i64) -> Self {
        Self {
            issuer,
            verifier,
            update_age_seconds,
        }
    }

    fn issue(
        &self,
        principal: &AuthPrincipal,
        callbacks: &dyn AuthCallbacks,
    ) -> FlowResult<IssuedSession> {
        let mut claims = self.issuer.claims_for(principal);
        callbacks.jwt(&mut claims, principal);
        let token = self.issuer.sign(&claims)?;
        let expires_at = claims
            .get("exp")
            .and_then(claim_timestamp)
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .unwrap_or_else(|| Utc::now() + Duration::seconds(self.issuer.ttl_seconds()));
        Ok(IssuedSession {
            session: AuthSession {
                user: principal.clone().into_user(),
                expires_at,
                strategy: "jwt",
                token: Some(token.clone()),
            },
            cookie_value: token,
        })
    }

    async fn resolve(
        &self,
        token: &str,
        callbacks: &dyn AuthCallbacks,
    ) -> FlowResult<Option<ResolvedSession>> {
        let payload = match self.verifier.verify(token).await {
            Ok(payload) => payload,
            Err(err) => {
                debug!(code = %err.code(), "session token rejected");
                return Ok(None);
            }
        };
        let Some(principal) = principal_from_payload(&payload) else {
            return Ok(None);
        };

        let now = Utc::now();
        let issued_at = payload.issued_at.unwrap_or(now);
        let age_seconds = (now - issued_at).num_seconds();
        if age_seconds >= self.update_age_seconds {
            let fresh = self.issue(&principal, callbacks)?;
            debug!(age_seconds, "session passed update age, reissued");
            return Ok(Some(ResolvedSession {
                session: fresh.session,
                principal,
                issued_at: now,
                rotated_cookie: Some(fresh.cookie_value),
            }));
        }

        let expires_at = payload.expires_at.unwrap_or(now);
        Ok(Some(ResolvedSession {
            session: AuthSession {
                user: principal.clone().into_user(),
                expires_at,
                strategy: "jwt",
                token: Some(token.to_string()),
            },
            principal,
            issued_at,
            rotated_cookie: None,
        }))
    }
}

fn principal_from_payload(payload: &JwtPayload) -> Option<AuthPrincipal> {
    let id = payload.subject.clone()?;
    let mut principal = AuthPrincipal::new(id).ok()?;
    principal.roles = payload.roles();
    if let Some(Value::Object(attrs)) = payload.claim("attrs") {
        principal.attributes = attrs.clone().into_iter().collect();
    }
    Some(principal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::DefaultCallbacks;
    use common_auth::JwtConfig;
    use std::sync::Arc;

    fn principal() -> AuthPrincipal {
        AuthPrincipal::new("user-1")
            .expect("principal")
            .with_roles(["admin"])
    }

    fn cookie_strategy(update_age: i64) -> CookieSessionStrategy {
        CookieSessionStrategy::new(Arc::new(InMemorySessionStore::new()), 3600, update_age)
    }

    #[tokio::test]
    async fn cookie_round_trip() {
        let strategy = cookie_strategy(3600);
        let issued = strategy.issue(&principal()).await.expect("issue");
        let resolved = strategy
            .resolve(&issued.cookie_value)
            .await
            .expect("resolve")
            .expect("present");
        assert_eq!(resolved.principal.id, "user-1");
        assert!(resolved.rotated_cookie.is_none());
    }

    #[tokio::test]
    async fn cookie_reissues_past_update_age() {
        let strategy = cookie_strategy(0);
        let issued = strategy.issue(&principal()).await.expect("issue");
        let resolved = strategy
            .resolve(&issued.cookie_value)
            .await
            .expect("resolve")
            .expect("present");
        let rotated = resolved.rotated_cookie.expect("rotated");
        assert_ne!(rotated, issued.cookie_value);

        // The old identifier no longer resolves.
        let stale = strategy.resolve(&issued.cookie_value).await.expect("resolve");
        assert!(stale.is_none());
    }

    #[tokio::test]
    async fn cookie_invalidate_removes_record() {
        let strategy = cookie_strategy(3600);
        let issued = strategy.issue(&principal()).await.expect("issue");
        strategy
            .invalidate(&issued.cookie_value)
            .await
            .expect("invalidate");
        assert!(strategy
            .resolve(&issued.cookie_value)
            .await
            .expect("resolve")
            .is_none());
    }

    #[tokio::test]
    async fn anonymous_record_does_not_authenticate() {
        let store = Arc::new(InMemorySessionStore::new());
        let strategy = CookieSessionStrategy::new(store.clone(), 3600, 3600);
        let now = Utc::now();
        store
            .put(
                "anon",
                SessionRecord {
                    principal: None,
                    issued_at: now,
                    expires_at: now + Duration::seconds(600),
                    csrf_token: Some("token".into()),
                },
                StdDuration::from_secs(600),
            )
            .await
            .expect("put");
        assert!(strategy.resolve("anon").await.expect("resolve").is_none());
    }

    fn jwt_strategy(update_age: i64) -> JwtSessionStrategy {
        let issuer = JwtIssuer::hs256("session-secret")
            .expect("issuer")
            .with_ttl_seconds(3600);
        let verifier = JwtVerifier::builder(JwtConfig::new())
            .with_secret("local", "session-secret")
            .build();
        JwtSessionStrategy::new(issuer, verifier, update_age)
    }

    #[tokio::test]
    async fn jwt_round_trip_applies_jwt_callback() {
        struct Enriching;
        impl AuthCallbacks for Enriching {
            fn jwt(
                &self,
                claims: &mut serde_json::Map<String, Value>,
                _principal: &AuthPrincipal,
            ) {
                claims.insert("org".to_string(), Value::String("acme".into()));
            }
        }

        let strategy = jwt_strategy(3600);
        let issued = strategy.issue(&principal(), &Enriching).expect("issue");
        let resolved = strategy
            .resolve(&issued.cookie_value, &Enriching)
            .await
            .expect("resolve")
            .expect("present");
        assert_eq!(resolved.principal.id, "user-1");
        assert!(resolved.principal.has_role("admin"));
        assert!(resolved.rotated_cookie.is_none());
    }

    #[tokio::test]
    async fn jwt_reissues_past_update_age() {
        let strategy = jwt_strategy(0);
        let issued = strategy
            .issue(&principal(), &DefaultCallbacks)
            .expect("issue");
        let resolved = strategy
            .resolve(&issued.cookie_value, &DefaultCallbacks)
            .await
            .expect("resolve")
            .expect("present");
        assert!(resolved.rotated_cookie.is_some());
    }

    #[tokio::test]
    async fn garbage_jwt_resolves_to_none() {
        let strategy = jwt_strategy(3600);
        assert!(strategy
            .resolve("garbage", &DefaultCallbacks)
            .await
            .expect("resolve")
            .is_none());
    }
}
