use std::sync::Arc;

use axum::extract::FromRef;
use common_gate::GateRegistry;

use crate::config::ServiceConfig;
use crate::manager::AuthManager;
use crate::metrics::AuthMetrics;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<AuthManager>,
    pub gate: Arc<GateRegistry>,
    pub config: Arc<ServiceConfig>,
    pub metrics: Arc<AuthMetrics>,
}

impl FromRef<AppState> for Arc<AuthManager> {
    fn from_ref(state: &AppState) -> Self {
        state.manager.clone()
    }
}

impl FromRef<AppState> for Arc<GateRegistry> {
    fn from_ref(state: &AppState) -> Self {
        state.gate.clone()
    }
}

impl FromRef<AppState> for Arc<ServiceConfig> {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl FromRef<AppState> for Arc<AuthMetrics> {
    fn from_ref(state: &AppState) -> Self {
        state.metrics.clone()
    }
}
