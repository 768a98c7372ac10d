//! Probes, the `/-/reload` handshake and readiness across the lifecycle.

use axum::http::{Method, StatusCode};
use serde_json::json;

use crate::harness::{Harness, decode_patch, deployment, policy};
use mixed_workload_webhook::lifecycle::{LifecycleEvent, LifecyclePhase};

// ============================================================================
// Probes
// ============================================================================

#[tokio::test]
async fn test_healthy_and_ready_while_serving() {
    let harness = Harness::start("[]", false).await;

    assert_eq!(harness.get("/-/healthy").await, (StatusCode::OK, "OK.\n".to_string()));
    assert_eq!(harness.get("/-/ready").await, (StatusCode::OK, "OK.\n".to_string()));
    harness.shutdown().await;
}

#[tokio::test]
async fn test_not_ready_after_shutdown_requested() {
    let harness = Harness::start("[]", false).await;
    harness
        .health
        .lifecycle
        .apply(LifecycleEvent::ShutdownRequested)
        .await;

    let (status, body) = harness.get("/-/ready").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, "Service Unavailable");
    // Liveness does not depend on the phase
    assert_eq!(harness.get("/-/healthy").await.0, StatusCode::OK);
    harness.shutdown().await;
}

// ============================================================================
// Reload API
// ============================================================================

#[tokio::test]
async fn test_reload_disabled_is_forbidden() {
    let harness = Harness::start("[]", false).await;

    let (status, body) = harness.reload(Method::POST).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, "Lifecycle API is not enabled.");
    assert_eq!(harness.store.current_snapshot().generation(), 1);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_reload_then_mutate() {
    let harness = Harness::start("[]", true).await;
    let object = deployment("checkout");

    let before = harness.review("/mutate", "Deployment", &object).await;
    assert!(before.get("patch").is_none_or(serde_json::Value::is_null));

    harness.write_policy(&policy(&[("shop", "checkout", false, 4)]));
    assert_eq!(
        harness.reload(Method::PUT).await,
        (StatusCode::OK, "OK".to_string())
    );
    assert_eq!(harness.webhook.snapshot().generation(), 2);

    let after = harness.review("/mutate", "Deployment", &object).await;
    let mut patched = object.clone();
    json_patch::patch(&mut patched, &decode_patch(&after)).unwrap();
    assert_eq!(
        patched["spec"]["template"]["metadata"]["annotations"],
        json!({"hc/riority": "4"})
    );
    harness.shutdown().await;
}

#[tokio::test]
async fn test_reload_failure_keeps_previous_policy() {
    let harness = Harness::start(&policy(&[("shop", "checkout", true, 1)]), true).await;
    let before = harness.store.current_snapshot();

    harness.write_policy("{\"namespace\": \"shop\"");
    let (status, body) = harness.reload(Method::POST).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.starts_with("failed to reload config: "), "{body}");

    assert_eq!(harness.store.current_snapshot(), before);
    assert_eq!(harness.webhook.snapshot().generation(), 1);
    let response = harness.review("/mutate", "Deployment", &deployment("checkout")).await;
    assert_eq!(response["patchType"], "JSONPatch");

    // Still serving after a failed reload
    assert_eq!(harness.health.lifecycle.phase().await, LifecyclePhase::Serving);
    let (_, metrics) = harness.get("/metrics").await;
    assert!(metrics.contains("webhook_policy_reloads_total{result=\"failure\"} 1"));
    harness.shutdown().await;
}

#[tokio::test]
async fn test_reload_to_empty_policy_stops_patching() {
    let harness = Harness::start(&policy(&[("shop", "checkout", true, 1)]), true).await;

    harness.write_policy("[]");
    assert_eq!(harness.reload(Method::POST).await.0, StatusCode::OK);
    assert!(harness.webhook.snapshot().is_empty());

    let response = harness.review("/mutate", "Deployment", &deployment("checkout")).await;
    assert_eq!(response["allowed"], true);
    assert!(response.get("patch").is_none_or(serde_json::Value::is_null));
    harness.shutdown().await;
}

#[tokio::test]
async fn test_reload_after_coordinator_stopped() {
    let harness = Harness::start("[]", true).await;
    let router = harness.router.clone();
    harness.shutdown().await;

    let request = axum::http::Request::post("/-/reload")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = tower::ServiceExt::oneshot(router, request).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_get_on_reload_is_not_routed() {
    let harness = Harness::start("[]", true).await;
    let (status, _) = harness.get("/-/reload").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    harness.shutdown().await;
}
