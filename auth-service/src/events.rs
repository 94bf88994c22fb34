use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common_auth::AuthUser;
use serde::Serialize;
use tracing::debug;

/// Notifications published after a state transition commits. Delivery is
/// fire-and-forget: a listener failure never fails the request that
/// triggered it.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthEvent {
    SignIn {
        provider_id: String,
        user: AuthUser,
        occurred_at: DateTime<Utc>,
    },
    SignOut {
        principal_id: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    Session {
        principal_id: String,
        refreshed: bool,
        occurred_at: DateTime<Utc>,
    },
}

#[async_trait]
pub trait AuthEventListener: Send + Sync {
    async fn publish(&self, event: &AuthEvent) -> Result<()>;
}

/// Default listener: traces the event and drops it.
pub struct NullEventListener;

#[async_trait]
impl AuthEventListener for NullEventListener {
    async fn publish(&self, event: &AuthEvent) -> Result<()> {
        debug!(?event, "auth event");
        Ok(())
    }
}
