use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common_auth::AuthPrincipal;
use tracing::debug;

use crate::tokens::{random_token, sha256_hex};

#[derive(Debug, Clone)]
pub struct RememberEntry {
    pub principal: AuthPrincipal,
    pub expires_at: DateTime<Utc>,
}

/// Pluggable persistence for long-lived remember-me tokens. `consume` is an
/// atomic take: when two requests present the same token concurrently,
/// exactly one receives the entry and the other gets None, which surfaces as
/// a stale-token failure. Implementations over a database can use
/// delete-returning or select-for-update plus delete in one transaction.
#[async_trait]
pub trait RememberTokenStore: Send + Sync {
    async fn save(&self, token: &str, entry: RememberEntry) -> Result<()>;
    async fn consume(&self, token: &str) -> Result<Option<RememberEntry>>;
    async fn remove(&self, token: &str) -> Result<()>;
}

/// Tokens are keyed by their sha256 so the store never holds redeemable
/// values.
#[derive(Default)]
pub struct InMemoryRememberTokenStore {
    inner: Mutex<HashMap<String, RememberEntry>>,
}

impl InMemoryRememberTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RememberTokenStore for InMemoryRememberTokenStore {
    async fn save(&self, token: &str, entry: RememberEntry) -> Result<()> {
        let mut guard = self.inner.lock().expect("mutex poisoned");
        guard.insert(sha256_hex(token), entry);
        Ok(())
    }

    async fn consume(&self, token: &str) -> Result<Option<RememberEntry>> {
        let mut guard = self.inner.lock().expect("mutex poisoned");
        Ok(guard.remove(&sha256_hex(token)))
    }

    async fn remove(&self, token: &str) -> Result<()> {
        let mut guard = self.inner.lock().expect("mutex poisoned");
        guard.remove(&sha256_hex(token));
        Ok(())
    }
}

/// Mints and rotates remember tokens. Every successful redemption rotates:
/// the presented token is gone after one use, bounding the blast radius of a
/// leaked value to a single request.
pub struct RememberTokens {
    store: Arc<dyn RememberTokenStore>,
    ttl_seconds: i64,
}

impl RememberTokens {
    pub fn new(store: Arc<dyn RememberTokenStore>, ttl_seconds: i64) -> Self {
        Self { store, ttl_seconds }
    }

    pub async fn mint(&self, principal: &AuthPrincipal) -> Result<String> {
        let token = random_token();
        let entry = RememberEntry {
            principal: principal.clone(),
            expires_at: Utc::now() + Duration::seconds(self.ttl_seconds),
        };
        self.store.save(&token, entry).await?;
        Ok(token)
    }

    /// Redeem a presented token. Some((principal, replacement)) on success;
    /// None for unknown, already-rotated or expired tokens — the caller must
    /// clear the cookie and treat the request as unauthenticated, never
    /// retry the lookup.
    pub async fn redeem(&self, token: &str) -> Result<Option<(AuthPrincipal, String)>> {
        let Some(entry) = self.store.consume(token).await? else {
            debug!("presented remember token unknown to the store");
            return Ok(None);
        };
        if entry.expires_at <= Utc::now() {
            debug!("presented remember token expired");
            return Ok(None);
        }
        let replacement = self.mint(&entry.principal).await?;
        Ok(Some((entry.principal, replacement)))
    }

    pub async fn revoke(&self, token: &str) -> Result<()> {
        self.store.remove(token).await
    }
}
