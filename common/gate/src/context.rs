use std::any::Any;
use std::sync::Arc;

use common_auth::AuthPrincipal;

/// Evaluation input for a single gate check: the authenticated principal (if
/// any) and an optional typed resource payload.
#[derive(Clone, Default)]
pub struct GateContext {
    pub principal: Option<AuthPrincipal>,
    payload: Option<Arc<dyn Any + Send + Sync>>,
}

impl GateContext {
    /// A context with no authenticated principal.
    pub fn guest() -> Self {
        Self::default()
    }

    pub fn for_principal(principal: AuthPrincipal) -> Self {
        Self {
            principal: Some(principal),
            payload: None,
        }
    }

    pub fn with_payload<T: Any + Send + Sync>(mut self, payload: T) -> Self {
        self.payload = Some(Arc::new(payload));
        self
    }

    pub fn payload_ref<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.payload
            .as_deref()
            .and_then(|payload| payload.downcast_ref::<T>())
    }

    pub(crate) fn payload_handle(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.payload.clone()
    }
}

/// Audit record broadcast to observers after every ability check, regardless
/// of outcome. Append-only; the registry itself persists nothing.
#[derive(Clone)]
pub struct GateEvaluation {
    pub ability: String,
    pub allowed: bool,
    pub principal: Option<AuthPrincipal>,
    pub payload: Option<Arc<dyn Any + Send + Sync>>,
}

impl std::fmt::Debug for GateEvaluation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateEvaluation")
            .field("ability", &self.ability)
            .field("allowed", &self.allowed)
            .field(
                "principal",
                &self.principal.as_ref().map(|principal| &principal.id),
            )
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}

pub trait GateObserver: Send + Sync {
    fn on_evaluation(&self, evaluation: &GateEvaluation);
}
