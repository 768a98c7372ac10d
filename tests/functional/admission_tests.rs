//! `/mutate` end to end: envelope in, envelope out, patch applied to the
//! submitted object.

use axum::body::Body;
use axum::http::{Request, StatusCode, header::CONTENT_TYPE};
use serde_json::{Value, json};

use crate::harness::{Harness, REQUEST_UID, decode_patch, deployment, policy, review_body};

fn apply(object: &Value, patch: &json_patch::Patch) -> Value {
    let mut doc = object.clone();
    json_patch::patch(&mut doc, patch).unwrap();
    doc
}

// ============================================================================
// Matching
// ============================================================================

#[tokio::test]
async fn test_unlisted_workload_is_allowed_unchanged() {
    let harness = Harness::start(&policy(&[("shop", "cart", true, 1)]), false).await;

    let response = harness.review("/mutate", "Deployment", &deployment("checkout")).await;

    assert_eq!(response["uid"], REQUEST_UID);
    assert_eq!(response["allowed"], true);
    assert!(response.get("patch").is_none_or(Value::is_null));
    harness.shutdown().await;
}

#[tokio::test]
async fn test_mixed_workload_patch_round_trip() {
    let harness = Harness::start(&policy(&[("shop", "checkout", true, 5)]), false).await;
    let object = deployment("checkout");

    let response = harness.review("/mutate", "Deployment", &object).await;
    assert_eq!(response["uid"], REQUEST_UID);
    assert_eq!(response["allowed"], true);
    assert_eq!(response["patchType"], "JSONPatch");

    let patched = apply(&object, &decode_patch(&response));
    let spec = &patched["spec"];
    assert_eq!(spec["template"]["metadata"]["annotations"], json!({"hc/riority": "5"}));
    assert_eq!(spec["template"]["metadata"]["labels"], json!({"hc/mixed-pod": "true"}));
    assert_eq!(spec["selector"]["matchLabels"], json!({"hc/mixed-pod": "true"}));
    assert_eq!(
        spec["template"]["spec"]["nodeSelector"],
        json!({"cmos/mixed-schedule": "true"})
    );

    let app = &spec["template"]["spec"]["containers"][0]["resources"];
    assert_eq!(
        app["limits"],
        json!({
            "cpu": "1",
            "memory": "256Mi",
            "cmos.mixed/cpu": "1",
            "cmos.mixed/memory": "256Mi"
        })
    );
    assert_eq!(
        app["requests"],
        json!({
            "cpu": "250m",
            "memory": "64Mi",
            "cmos.mixed/cpu": "250m",
            "cmos.mixed/memory": "64Mi",
            "cmos.mixed/podcount": "1"
        })
    );

    let sidecar = &spec["template"]["spec"]["containers"][1]["resources"];
    assert_eq!(sidecar["limits"], json!({"cmos.mixed/cpu": "0", "cmos.mixed/memory": "0"}));
    assert_eq!(
        sidecar["requests"],
        json!({"cmos.mixed/cpu": "0", "cmos.mixed/memory": "0", "cmos.mixed/podcount": "1"})
    );

    // Untouched fields survive
    assert_eq!(spec["replicas"], 2);
    assert_eq!(
        spec["template"]["spec"]["containers"][0]["image"],
        "registry.local/app:1.0"
    );
    harness.shutdown().await;
}

#[tokio::test]
async fn test_reapplying_patch_is_idempotent() {
    let harness = Harness::start(&policy(&[("shop", "checkout", true, 5)]), false).await;
    let object = deployment("checkout");

    let patch = decode_patch(&harness.review("/mutate", "Deployment", &object).await);
    let once = apply(&object, &patch);
    let twice = apply(&once, &patch);
    assert_eq!(once, twice);

    // Reviewing the already-patched object switches to replace operations
    // and converges on the same document
    let response = harness.review("/mutate", "Deployment", &once).await;
    let second = decode_patch(&response);
    assert!(second.0.iter().any(|op| matches!(op, json_patch::PatchOperation::Replace(_))));
    assert_eq!(apply(&once, &second), once);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_non_mixed_workload_gets_labels_only() {
    let harness = Harness::start(&policy(&[("shop", "checkout", false, 3)]), false).await;
    let object = deployment("checkout");

    let response = harness.review("/mutate", "Deployment", &object).await;
    let patch = decode_patch(&response);
    assert_eq!(patch.0.len(), 3);

    let patched = apply(&object, &patch);
    assert_eq!(
        patched["spec"]["template"]["metadata"]["labels"],
        json!({"hc/mixed-pod": "false"})
    );
    assert!(patched["spec"]["template"]["spec"].get("nodeSelector").is_none());
    assert_eq!(
        patched["spec"]["template"]["spec"]["containers"][1]["resources"],
        json!({})
    );
    harness.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_rules_last_one_wins() {
    let harness = Harness::start(
        &policy(&[("shop", "checkout", true, 1), ("shop", "checkout", false, 9)]),
        false,
    )
    .await;
    let object = deployment("checkout");

    let patched = apply(
        &object,
        &decode_patch(&harness.review("/mutate", "Deployment", &object).await),
    );
    assert_eq!(
        patched["spec"]["template"]["metadata"]["annotations"],
        json!({"hc/riority": "9"})
    );
    assert_eq!(
        patched["spec"]["selector"]["matchLabels"],
        json!({"hc/mixed-pod": "false"})
    );
    harness.shutdown().await;
}

#[tokio::test]
async fn test_object_without_namespace_uses_request_namespace() {
    let harness = Harness::start(&policy(&[("shop", "checkout", false, 1)]), false).await;
    let mut object = deployment("checkout");
    object["metadata"]
        .as_object_mut()
        .unwrap()
        .remove("namespace");

    let response = harness.review("/mutate", "Deployment", &object).await;
    assert_eq!(response["allowed"], true);
    assert!(response["patch"].is_string() || response["patch"].is_array());
    harness.shutdown().await;
}

#[tokio::test]
async fn test_alias_route_serves_admission() {
    let harness = Harness::start(&policy(&[("shop", "checkout", true, 1)]), false).await;

    let response = harness
        .review("/admission/mutate", "Deployment", &deployment("checkout"))
        .await;
    assert_eq!(response["allowed"], true);
    assert_eq!(response["patchType"], "JSONPatch");
    harness.shutdown().await;
}

// ============================================================================
// Rejections
// ============================================================================

#[tokio::test]
async fn test_unsupported_kind_is_rejected() {
    let harness = Harness::start(&policy(&[("shop", "checkout", true, 1)]), false).await;

    let response = harness
        .review("/mutate", "StatefulSet", &deployment("checkout"))
        .await;

    assert_eq!(response["uid"], REQUEST_UID);
    assert_eq!(response["allowed"], false);
    assert_eq!(response["status"]["code"], 400);
    assert_eq!(
        response["status"]["message"],
        "can't handle the kind(StatefulSet) object"
    );
    harness.shutdown().await;
}

#[tokio::test]
async fn test_malformed_envelope_is_not_allowed() {
    let harness = Harness::start("[]", false).await;

    let request = Request::post("/mutate")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from("{\"request\": 42"))
        .unwrap();
    let (status, body) = harness.send(request).await;
    assert_eq!(status, StatusCode::OK);

    let review: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(review["response"]["allowed"], false);
    assert_eq!(review["response"]["uid"], "");
    assert!(
        !review["response"]["status"]["message"]
            .as_str()
            .unwrap()
            .is_empty()
    );
    harness.shutdown().await;
}

#[tokio::test]
async fn test_non_json_content_type_gets_empty_body() {
    let harness = Harness::start(&policy(&[("shop", "checkout", true, 1)]), false).await;

    let request = Request::post("/mutate")
        .header(CONTENT_TYPE, "text/plain")
        .body(Body::from(review_body("Deployment", &deployment("checkout"))))
        .unwrap();
    let (status, body) = harness.send(request).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());
    harness.shutdown().await;
}

#[tokio::test]
async fn test_admission_outcomes_are_counted() {
    let harness = Harness::start(&policy(&[("shop", "checkout", true, 1)]), false).await;

    harness.review("/mutate", "Deployment", &deployment("checkout")).await;
    harness.review("/mutate", "Deployment", &deployment("cart")).await;
    harness.review("/mutate", "StatefulSet", &deployment("cart")).await;

    let (status, metrics) = harness.get("/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(metrics.contains("webhook_admission_requests_total{outcome=\"patched\"} 1"));
    assert!(metrics.contains("webhook_admission_requests_total{outcome=\"skipped\"} 1"));
    assert!(metrics.contains("webhook_admission_requests_total{outcome=\"error\"} 1"));
    harness.shutdown().await;
}
