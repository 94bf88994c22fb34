use common_auth::{AuthPrincipal, AuthUser};
use serde_json::{Map, Value};

use crate::session::AuthSession;

/// Outcome of the sign-in callback. An explicit deny short-circuits to a 401
/// before any session is constructed.
#[derive(Debug, Clone, PartialEq)]
pub enum SignInDecision {
    Allow,
    Deny { reason: Option<String> },
}

impl SignInDecision {
    pub fn deny() -> Self {
        Self::Deny { reason: None }
    }

    pub fn deny_with(reason: impl Into<String>) -> Self {
        Self::Deny {
            reason: Some(reason.into()),
        }
    }
}

/// Interception points the embedding application can hook. `session` and
/// `jwt` run on every issuance and every refresh, not only on the initial
/// sign-in, so derived claims stay consistent with the current principal.
pub trait AuthCallbacks: Send + Sync {
    fn sign_in(&self, _user: &AuthUser, _provider_id: &str) -> SignInDecision {
        SignInDecision::Allow
    }

    fn session(&self, _session: &mut AuthSession) {}

    fn jwt(&self, _claims: &mut Map<String, Value>, _principal: &AuthPrincipal) {}
}

/// No-op callbacks: allow everything, enrich nothing.
pub struct DefaultCallbacks;

impl AuthCallbacks for DefaultCallbacks {}
