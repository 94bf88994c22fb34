use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Link between a provider account and a local user, created on first
/// successful OAuth linkage. `(provider_id, provider_account_id)` is unique;
/// upsert replaces the linked record.
#[derive(Debug, Clone, Serialize)]
pub struct AuthAccount {
    pub provider_id: String,
    pub provider_account_id: String,
    pub user_id: String,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: BTreeMap<String, Value>,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find(
        &self,
        provider_id: &str,
        provider_account_id: &str,
    ) -> Result<Option<AuthAccount>>;
    async fn upsert(&self, account: AuthAccount) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryAccountStore {
    inner: Mutex<HashMap<(String, String), AuthAccount>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn find(
        &self,
        provider_id: &str,
        provider_account_id: &str,
    ) -> Result<Option<AuthAccount>> {
        let guard = self.inner.lock().expect("mutex poisoned");
        Ok(guard
            .get(&(provider_id.to_string(), provider_account_id.to_string()))
            .cloned())
    }

    async fn upsert(&self, account: AuthAccount) -> Result<()> {
        let mut guard = self.inner.lock().expect("mutex poisoned");
        guard.insert(
            (
                account.provider_id.clone(),
                account.provider_account_id.clone(),
            ),
            account,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(user_id: &str) -> AuthAccount {
        AuthAccount {
            provider_id: "acme".into(),
            provider_account_id: "acct-1".into(),
            user_id: user_id.into(),
            access_token: Some("at".into()),
            refresh_token: None,
            expires_at: None,
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn composite_key_is_unique() {
        let store = InMemoryAccountStore::new();
        store.upsert(account("user-1")).await.expect("upsert");
        store.upsert(account("user-2")).await.expect("upsert");

        let linked = store
            .find("acme", "acct-1")
            .await
            .expect("find")
            .expect("present");
        assert_eq!(linked.user_id, "user-2");
    }

    #[tokio::test]
    async fn missing_link_is_none() {
        let store = InMemoryAccountStore::new();
        assert!(store.find("acme", "nope").await.expect("find").is_none());
    }
}
