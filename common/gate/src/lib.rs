pub mod context;
pub mod error;
pub mod policy;
pub mod rbac;
pub mod registry;

pub use context::{GateContext, GateEvaluation, GateObserver};
pub use error::{GateError, GateResult};
pub use policy::{bind_policy, ResourcePolicy};
pub use rbac::{MatchMode, RbacAbility};
pub use registry::GateRegistry;
