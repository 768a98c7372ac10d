//! Mutating admission webhook.
//!
//! - `patch`: JSON Patch construction with add-vs-replace selection
//! - `workload`: typed workload variants dispatched by kind
//! - `engine`: policy match and patch decision
//! - `server`: the `/mutate` HTTP endpoint

pub mod engine;
pub mod patch;
mod server;
pub mod workload;

pub use engine::{Decision, WorkloadIdentity, build_patch, evaluate, mutate};
pub use server::{WebhookState, create_webhook_router};
pub use workload::{PodTemplateWorkload, Workload};

// Re-export kube-rs admission types for contract testing
pub use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
