//! Probe endpoints and Prometheus metrics.
//!
//! Provides:
//! - `/-/healthy` - Liveness probe (always returns 200 if the process is up)
//! - `/-/ready` - Readiness probe (returns 200 once the first policy is loaded
//!   and the server is accepting traffic)
//! - `/metrics` - Prometheus metrics endpoint

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

use crate::lifecycle::Lifecycle;

/// Labels for admission outcome metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct OutcomeLabels {
    pub outcome: &'static str,
}

impl EncodeLabelSet for OutcomeLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("outcome", self.outcome).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for reload metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ReloadLabels {
    pub result: &'static str,
}

impl EncodeLabelSet for ReloadLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("result", self.result).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Admission request outcome
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Matched and patched
    Patched,
    /// Not in the policy, allowed unchanged
    Skipped,
    /// Decode, kind or encode failure
    Error,
}

impl RequestOutcome {
    fn as_label(self) -> &'static str {
        match self {
            RequestOutcome::Patched => "patched",
            RequestOutcome::Skipped => "skipped",
            RequestOutcome::Error => "error",
        }
    }
}

/// Shared metrics for the webhook
pub struct Metrics {
    /// Admission requests by outcome
    pub admission_requests_total: Family<OutcomeLabels, Counter>,
    /// Policy reloads by result
    pub policy_reloads_total: Family<ReloadLabels, Counter>,
    /// Number of rules in the installed snapshot
    pub policy_rules: Gauge,
    /// Unix time of the last successful reload
    pub policy_last_reload_success: Gauge,
    /// Prometheus registry
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics instance with registered metrics
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let admission_requests_total = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "webhook_admission_requests",
            "Total number of admission requests by outcome",
            admission_requests_total.clone(),
        );

        let policy_reloads_total = Family::<ReloadLabels, Counter>::default();
        registry.register(
            "webhook_policy_reloads",
            "Total number of policy reloads by result",
            policy_reloads_total.clone(),
        );

        let policy_rules = Gauge::default();
        registry.register(
            "webhook_policy_rules",
            "Number of rules in the installed policy snapshot",
            policy_rules.clone(),
        );

        let policy_last_reload_success = Gauge::default();
        registry.register(
            "webhook_policy_last_reload_success_timestamp_seconds",
            "Timestamp of the last successful policy reload",
            policy_last_reload_success.clone(),
        );

        Self {
            admission_requests_total,
            policy_reloads_total,
            policy_rules,
            policy_last_reload_success,
            registry,
        }
    }

    /// Record the outcome of one admission request
    pub fn record_admission(&self, outcome: RequestOutcome) {
        self.admission_requests_total
            .get_or_create(&OutcomeLabels {
                outcome: outcome.as_label(),
            })
            .inc();
    }

    /// Record a reload attempt. `rules` is the installed snapshot size on success.
    pub fn record_reload(&self, success: bool, rules: Option<usize>) {
        let result = if success { "success" } else { "failure" };
        self.policy_reloads_total
            .get_or_create(&ReloadLabels { result })
            .inc();

        if success {
            if let Some(rules) = rules {
                self.policy_rules
                    .set(i64::try_from(rules).unwrap_or(i64::MAX));
            }
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
                .unwrap_or_default();
            self.policy_last_reload_success.set(now);
        }
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if encode(&mut buffer, &self.registry).is_err() {
            tracing::error!("Failed to encode metrics");
            return "# Error encoding metrics".to_string();
        }
        buffer
    }
}

/// Shared state for the probe endpoints
#[derive(Default)]
pub struct HealthState {
    /// Server lifecycle; readiness is derived from it
    pub lifecycle: Lifecycle,
    /// Metrics registry
    pub metrics: Metrics,
}

impl HealthState {
    /// Create a new health state (starts in `Starting`, not ready)
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the server is ready to take traffic
    pub async fn is_ready(&self) -> bool {
        self.lifecycle.phase().await.is_ready()
    }
}

/// Liveness probe handler
///
/// Returns 200 OK if the process is alive.
async fn healthy() -> impl IntoResponse {
    (StatusCode::OK, "OK.\n")
}

/// Readiness probe handler
///
/// Returns 503 Service Unavailable until the server is serving.
async fn ready(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "OK.\n").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable").into_response()
    }
}

/// Metrics handler
async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the probe router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/-/healthy", get(healthy))
        .route("/-/ready", get(ready))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}
