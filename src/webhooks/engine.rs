//! Mutation decision engine.
//!
//! Decides whether a workload is in the policy and, if it is, builds the full
//! patch for it:
//!
//! 1. priority annotation and mixed label (always)
//! 2. node selector and per-container shadow resources (mixed workloads only)

use json_patch::PatchOperation;
use kube::core::DynamicObject;
use kube::core::admission::AdmissionRequest;
use tracing::{debug, info};

use crate::error::MutateError;
use crate::policy::{PolicyRule, PolicySnapshot};
use crate::webhooks::patch;
use crate::webhooks::workload::{PodTemplateWorkload, Workload};

/// Pod label carrying the rule's `mixed` flag
pub const POD_LABEL_MIXED_KEY: &str = "hc/mixed-pod";
/// Pod annotation carrying the rule's priority
pub const POD_ANNOTATION_PRIORITY_KEY: &str = "hc/riority";
/// Node selector entry routing mixed workloads
pub const POD_NODE_SELECTOR_KEY: &str = "cmos/mixed-schedule";
pub const POD_NODE_SELECTOR_VALUE: &str = "true";

/// Identity of the workload under review
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadIdentity {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl WorkloadIdentity {
    /// Identity from the decoded object's metadata. An object without a
    /// namespace (usual on CREATE) takes the request's namespace.
    pub fn from_workload(workload: &Workload, request_namespace: Option<&str>) -> Self {
        let metadata = workload.template().metadata();
        Self {
            kind: workload.kind().to_string(),
            namespace: metadata
                .namespace
                .as_deref()
                .filter(|ns| !ns.is_empty())
                .or(request_namespace)
                .unwrap_or_default()
                .to_string(),
            name: metadata.name.clone().unwrap_or_default(),
        }
    }
}

/// Find the rule governing `identity`.
///
/// The whole snapshot is scanned and the last matching index wins, so a later
/// duplicate rule overrides an earlier one.
pub fn evaluate(identity: &WorkloadIdentity, snapshot: &PolicySnapshot) -> Option<usize> {
    snapshot
        .rules()
        .iter()
        .enumerate()
        .filter(|(_, rule)| rule.matches(&identity.namespace, &identity.name))
        .map(|(index, _)| index)
        .last()
}

/// Build the ordered patch for a matched workload
pub fn build_patch(workload: &dyn PodTemplateWorkload, rule: &PolicyRule) -> Vec<PatchOperation> {
    let mut ops = Vec::new();

    ops.extend(patch::set_template_annotation(
        workload.template_annotations(),
        POD_ANNOTATION_PRIORITY_KEY,
        &rule.priority.to_string(),
    ));
    ops.extend(patch::set_template_label(
        workload.selector_labels(),
        workload.template_labels(),
        POD_LABEL_MIXED_KEY,
        &rule.mixed.to_string(),
    ));

    if rule.mixed {
        ops.extend(patch::set_node_selector(
            workload.node_selector(),
            POD_NODE_SELECTOR_KEY,
            POD_NODE_SELECTOR_VALUE,
        ));
        ops.extend(patch::add_container_shadow_resources(workload.containers()));
    }

    ops
}

/// Outcome of evaluating one admission request
#[derive(Debug)]
pub enum Decision {
    /// Not in the policy; allowed unchanged
    Skip(WorkloadIdentity),
    /// In the policy; allowed with the given patch
    Patch {
        identity: WorkloadIdentity,
        rule_index: usize,
        operations: Vec<PatchOperation>,
    },
}

impl Decision {
    pub fn operations(&self) -> &[PatchOperation] {
        match self {
            Decision::Skip(_) => &[],
            Decision::Patch { operations, .. } => operations,
        }
    }
}

/// Evaluate an admission request against one snapshot.
///
/// The caller passes the snapshot so the whole evaluation sees a single
/// policy version.
pub fn mutate(
    request: &AdmissionRequest<DynamicObject>,
    snapshot: &PolicySnapshot,
) -> Result<Decision, MutateError> {
    let kind = request.kind.kind.as_str();
    info!(
        uid = %request.uid,
        kind = %kind,
        namespace = ?request.namespace,
        name = %request.name,
        "AdmissionReview received"
    );

    if !Workload::is_supported(kind) {
        return Err(MutateError::UnsupportedKind(kind.to_string()));
    }
    let object = request.object.as_ref().ok_or(MutateError::MissingObject)?;
    let workload = Workload::from_object(kind, object)?;
    let identity = WorkloadIdentity::from_workload(&workload, request.namespace.as_deref());

    let matched = evaluate(&identity, snapshot)
        .and_then(|index| snapshot.get(index).map(|rule| (index, rule)));
    let Some((rule_index, rule)) = matched else {
        debug!(
            uid = %request.uid,
            namespace = %identity.namespace,
            name = %identity.name,
            generation = snapshot.generation(),
            "Workload not in mixed list"
        );
        return Ok(Decision::Skip(identity));
    };

    let operations = build_patch(workload.template(), rule);
    info!(
        uid = %request.uid,
        namespace = %identity.namespace,
        name = %identity.name,
        rule_index,
        mixed = rule.mixed,
        priority = rule.priority,
        operations = operations.len(),
        generation = snapshot.generation(),
        "Workload in mixed list, patching"
    );

    Ok(Decision::Patch {
        identity,
        rule_index,
        operations,
    })
}
