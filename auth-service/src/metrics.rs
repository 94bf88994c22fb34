use anyhow::Result;
use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use common_gate::{GateEvaluation, GateObserver};
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct AuthMetrics {
    registry: Registry,
    login_attempts: IntCounterVec,
    sessions_issued: IntCounterVec,
    gate_evaluations: IntCounterVec,
}

impl AuthMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let login_attempts = IntCounterVec::new(
            Opts::new(
                "auth_login_attempts_total",
                "Count of login attempts grouped by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(login_attempts.clone()))?;

        let sessions_issued = IntCounterVec::new(
            Opts::new(
                "auth_sessions_issued_total",
                "Count of sessions issued grouped by strategy",
            ),
            &["strategy"],
        )?;
        registry.register(Box::new(sessions_issued.clone()))?;

        let gate_evaluations = IntCounterVec::new(
            Opts::new(
                "auth_gate_evaluations_total",
                "Count of gate ability evaluations grouped by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(gate_evaluations.clone()))?;

        Ok(Self {
            registry,
            login_attempts,
            sessions_issued,
            gate_evaluations,
        })
    }

    pub fn login_attempt(&self, outcome: &str) {
        self.login_attempts.with_label_values(&[outcome]).inc();
    }

    pub fn session_issued(&self, strategy: &str) {
        self.sessions_issued.with_label_values(&[strategy]).inc();
    }

    pub fn gate_evaluation(&self, allowed: bool) {
        let outcome = if allowed { "allowed" } else { "denied" };
        self.gate_evaluations.with_label_values(&[outcome]).inc();
    }

    pub fn render(&self) -> Result<Response> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            )
            .body(Body::from(buffer))?;
        Ok(response)
    }
}

/// Feeds every gate evaluation into the metrics registry.
pub struct GateMetricsObserver {
    metrics: AuthMetrics,
}

impl GateMetricsObserver {
    pub fn new(metrics: AuthMetrics) -> Self {
        Self { metrics }
    }
}

impl GateObserver for GateMetricsObserver {
    fn on_evaluation(&self, evaluation: &GateEvaluation) {
        self.metrics.gate_evaluation(evaluation.allowed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common_gate::{GateContext, GateRegistry, RbacAbility};
    use std::sync::Arc;

    #[tokio::test]
    async fn gate_observer_counts_evaluations() {
        let metrics = AuthMetrics::new().expect("metrics");
        let registry = GateRegistry::new();
        registry
            .register_role_ability("reports.view", RbacAbility::role("admin"))
            .expect("register");
        registry.observe(Arc::new(GateMetricsObserver::new(metrics.clone())));

        let _ = registry.can("reports.view", &GateContext::guest());

        let rendered = metrics.render().expect("render");
        assert_eq!(rendered.status(), StatusCode::OK);
    }
}
