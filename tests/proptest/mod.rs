// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Property-based tests for mixed-workload-webhook.
//!
//! Uses proptest to generate random policies and workloads and verify the
//! decision engine invariants.

use k8s_openapi::api::apps::v1::Deployment;
use proptest::prelude::*;
use serde_json::{Value, json};

use mixed_workload_webhook::lifecycle::{
    LifecycleEvent, LifecyclePhase, LifecycleStateMachine, TransitionResult,
};
use mixed_workload_webhook::webhooks::{WorkloadIdentity, build_patch, evaluate};
use mixed_workload_webhook::{PolicyRule, PolicySnapshot};

/// Small name pool so that generated policies contain duplicates.
fn name() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("checkout".to_string()),
        Just("cart".to_string()),
        Just("search".to_string()),
        Just("ledger".to_string()),
    ]
}

fn namespace() -> impl Strategy<Value = String> {
    prop_oneof![Just("shop".to_string()), Just("billing".to_string())]
}

fn rule() -> impl Strategy<Value = PolicyRule> {
    (namespace(), name(), any::<bool>(), any::<i64>())
        .prop_map(|(ns, name, mixed, priority)| PolicyRule::new(ns, name, mixed, priority))
}

fn snapshot() -> impl Strategy<Value = PolicySnapshot> {
    prop::collection::vec(rule(), 0..20).prop_map(PolicySnapshot::new)
}

fn identity(namespace: &str, name: &str) -> WorkloadIdentity {
    WorkloadIdentity {
        kind: "Deployment".to_string(),
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

/// Deployment with `containers` containers and optionally pre-populated maps.
fn deployment(containers: usize, populated: bool) -> Deployment {
    let containers: Vec<Value> = (0..containers)
        .map(|i| json!({"name": format!("c{i}"), "resources": {}}))
        .collect();
    let labels = if populated {
        json!({"hc/mixed-pod": "false"})
    } else {
        json!({})
    };
    serde_json::from_value(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {"name": "checkout", "namespace": "shop"},
        "spec": {
            "selector": {"matchLabels": labels},
            "template": {
                "metadata": {"labels": labels, "annotations": {"hc/riority": "0"}},
                "spec": {"containers": containers}
            }
        }
    }))
    .unwrap()
}

fn any_event() -> impl Strategy<Value = LifecycleEvent> {
    prop_oneof![
        Just(LifecycleEvent::PolicyLoaded),
        Just(LifecycleEvent::StartupFailed),
        Just(LifecycleEvent::ServingStarted),
        Just(LifecycleEvent::ReloadStarted),
        Just(LifecycleEvent::ReloadFinished),
        Just(LifecycleEvent::ShutdownRequested),
        Just(LifecycleEvent::ServerStopped),
    ]
}

proptest! {
    /// The selected index is the last rule that matches.
    #[test]
    fn evaluate_selects_last_match(snapshot in snapshot(), ns in namespace(), name in name()) {
        let expected = snapshot
            .rules()
            .iter()
            .rposition(|r| r.namespace == ns && r.name == name);
        prop_assert_eq!(evaluate(&identity(&ns, &name), &snapshot), expected);
    }

    /// Identities outside the name pool never match.
    #[test]
    fn evaluate_unknown_identity_is_unmatched(snapshot in snapshot(), ns in namespace()) {
        prop_assert_eq!(evaluate(&identity(&ns, "not-in-policy"), &snapshot), None);
    }

    /// Non-mixed rules yield the annotation and the two label operations only;
    /// mixed rules add one node selector operation and five per container.
    #[test]
    fn patch_size_follows_rule(
        containers in 0usize..6,
        mixed in any::<bool>(),
        priority in any::<i64>(),
        populated in any::<bool>(),
    ) {
        let ops = build_patch(
            &deployment(containers, populated),
            &PolicyRule::new("shop", "checkout", mixed, priority),
        );
        let expected = if mixed { 3 + 1 + 5 * containers } else { 3 };
        prop_assert_eq!(ops.len(), expected);
    }

    /// The patch applies cleanly to the object it was built from, and the
    /// priority annotation carries the rule's priority afterwards.
    #[test]
    fn patch_applies_to_source(
        containers in 0usize..4,
        mixed in any::<bool>(),
        priority in any::<i64>(),
        populated in any::<bool>(),
    ) {
        let workload = deployment(containers, populated);
        let ops = build_patch(&workload, &PolicyRule::new("shop", "checkout", mixed, priority));

        let mut doc = serde_json::to_value(&workload).unwrap();
        json_patch::patch(&mut doc, &ops).unwrap();

        let priority_text = priority.to_string();
        prop_assert_eq!(
            doc["spec"]["template"]["metadata"]["annotations"]["hc/riority"].as_str(),
            Some(priority_text.as_str())
        );
        let mixed_text = mixed.to_string();
        prop_assert_eq!(
            doc["spec"]["selector"]["matchLabels"]["hc/mixed-pod"].as_str(),
            Some(mixed_text.as_str())
        );
    }

    /// Readiness is only reported while traffic is accepted, whatever event
    /// sequence the server goes through.
    #[test]
    fn readiness_matches_phase(events in prop::collection::vec(any_event(), 0..20)) {
        let sm = LifecycleStateMachine::new();
        let mut phase = LifecyclePhase::Starting;
        let mut serving_seen = false;
        for event in events {
            if let TransitionResult::Success { to, .. } = sm.transition(phase, event) {
                phase = to;
            }
            serving_seen |= phase == LifecyclePhase::Serving;
            if phase.is_ready() {
                prop_assert!(serving_seen);
            }
        }
    }
}
