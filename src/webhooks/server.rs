//! Mutating admission webhook endpoint.
//!
//! `POST /mutate` (also mounted at `/admission/mutate`) takes an
//! AdmissionReview, evaluates it against the current policy snapshot and
//! returns an AdmissionReview whose response echoes the request UID.

use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::post,
};
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use tracing::{debug, error, info, warn};

use crate::error::MutateError;
use crate::health::{HealthState, RequestOutcome};
use crate::policy::PolicySnapshot;
use crate::webhooks::engine::{self, Decision};

/// Content type required on admission requests
const JSON_CONTENT_TYPE: &str = "application/json";

/// Shared state for webhook handlers
pub struct WebhookState {
    /// Snapshot handed over by the policy store on every reload
    policy: ArcSwap<PolicySnapshot>,
    /// Optional health state for request metrics
    health_state: Option<Arc<HealthState>>,
}

impl WebhookState {
    /// Create webhook state with an empty policy
    pub fn new(health_state: Option<Arc<HealthState>>) -> Self {
        Self {
            policy: ArcSwap::from_pointee(PolicySnapshot::default()),
            health_state,
        }
    }

    /// Install a snapshot. Used as the policy store subscriber.
    pub fn apply_policy(&self, snapshot: Arc<PolicySnapshot>) {
        info!(
            component = "web",
            generation = snapshot.generation(),
            rules = snapshot.len(),
            "Applied policy snapshot"
        );
        self.policy.store(snapshot);
    }

    /// The snapshot new requests are evaluated against
    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        self.policy.load_full()
    }

    fn record(&self, outcome: RequestOutcome) {
        if let Some(ref state) = self.health_state {
            state.metrics.record_admission(outcome);
        }
    }

    /// Evaluate a raw AdmissionReview body and build the response review.
    ///
    /// One snapshot is loaded up front and used for the whole evaluation.
    pub fn review(&self, body: &[u8]) -> AdmissionReview<DynamicObject> {
        let review: AdmissionReview<DynamicObject> = match serde_json::from_slice(body) {
            Ok(review) => review,
            Err(e) => {
                error!(error = %e, "Failed to decode AdmissionReview");
                self.record(RequestOutcome::Error);
                return decode_failure(MutateError::Decode(e.to_string()));
            }
        };

        let request: AdmissionRequest<DynamicObject> = match review.try_into() {
            Ok(request) => request,
            Err(e) => {
                error!(error = %e, "Failed to extract admission request");
                self.record(RequestOutcome::Error);
                return decode_failure(MutateError::Decode(e.to_string()));
            }
        };

        let snapshot = self.snapshot();
        let response = match engine::mutate(&request, &snapshot) {
            Ok(Decision::Skip(_)) => {
                self.record(RequestOutcome::Skipped);
                AdmissionResponse::from(&request)
            }
            Ok(Decision::Patch { operations, .. }) => {
                debug!(uid = %request.uid, patch = ?operations, "Sending patch");
                match AdmissionResponse::from(&request).with_patch(json_patch::Patch(operations)) {
                    Ok(response) => {
                        self.record(RequestOutcome::Patched);
                        response
                    }
                    Err(e) => {
                        self.record(RequestOutcome::Error);
                        rejected(&request, MutateError::PatchEncode(e))
                    }
                }
            }
            Err(e) => {
                self.record(RequestOutcome::Error);
                rejected(&request, e)
            }
        };

        debug!(
            uid = %response.uid,
            allowed = response.allowed,
            "Sending admission response"
        );
        response.into_review()
    }
}

/// Response for an envelope that could not be decoded: not allowed, message
/// only, empty UID.
fn decode_failure(err: MutateError) -> AdmissionReview<DynamicObject> {
    let mut response = AdmissionResponse::invalid(err.to_string());
    if let Some(code) = err.code() {
        response.result.code = code;
    }
    response.into_review()
}

/// Response for a request the mutation rejected
fn rejected(request: &AdmissionRequest<DynamicObject>, err: MutateError) -> AdmissionResponse {
    warn!(uid = %request.uid, error = %err, "Admission request not allowed");
    let mut response = AdmissionResponse::from(request).deny(err.to_string());
    if let Some(code) = err.code() {
        response.result.code = code;
    }
    response
}

/// Create the webhook router
pub fn create_webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/mutate", post(mutate))
        .route("/admission/mutate", post(mutate))
        .with_state(state)
}

/// Mutating admission webhook handler
///
/// Requests without a JSON content type get an empty 200 response.
async fn mutate(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if content_type != JSON_CONTENT_TYPE {
        error!(
            content_type = %content_type,
            expected = JSON_CONTENT_TYPE,
            "Rejecting admission request with unexpected content type"
        );
        return StatusCode::OK.into_response();
    }

    (StatusCode::OK, Json(state.review(&body))).into_response()
}
