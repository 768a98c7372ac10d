//! Typed workload variants handled by the mutating webhook.
//!
//! Admission requests arrive with an untyped object. The kind tag selects a
//! typed variant; anything without a variant is an `UnsupportedKind` error.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::DynamicObject;

use crate::error::MutateError;

/// A workload with object metadata, a label selector and a pod template.
pub trait PodTemplateWorkload {
    fn metadata(&self) -> &ObjectMeta;
    fn selector_labels(&self) -> Option<&BTreeMap<String, String>>;
    fn template_labels(&self) -> Option<&BTreeMap<String, String>>;
    fn template_annotations(&self) -> Option<&BTreeMap<String, String>>;
    fn node_selector(&self) -> Option<&BTreeMap<String, String>>;
    fn containers(&self) -> &[Container];
}

impl PodTemplateWorkload for Deployment {
    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn selector_labels(&self) -> Option<&BTreeMap<String, String>> {
        self.spec.as_ref()?.selector.match_labels.as_ref()
    }

    fn template_labels(&self) -> Option<&BTreeMap<String, String>> {
        self.spec.as_ref()?.template.metadata.as_ref()?.labels.as_ref()
    }

    fn template_annotations(&self) -> Option<&BTreeMap<String, String>> {
        self.spec
            .as_ref()?
            .template
            .metadata
            .as_ref()?
            .annotations
            .as_ref()
    }

    fn node_selector(&self) -> Option<&BTreeMap<String, String>> {
        self.spec.as_ref()?.template.spec.as_ref()?.node_selector.as_ref()
    }

    fn containers(&self) -> &[Container] {
        self.spec
            .as_ref()
            .and_then(|spec| spec.template.spec.as_ref())
            .map(|pod| pod.containers.as_slice())
            .unwrap_or_default()
    }
}

/// The closed set of workload kinds this webhook mutates
#[derive(Clone, Debug)]
pub enum Workload {
    Deployment(Box<Deployment>),
}

impl Workload {
    /// Whether a kind tag has a variant
    pub fn is_supported(kind: &str) -> bool {
        matches!(kind, "Deployment")
    }

    /// Decode an admission object according to its kind
    pub fn from_object(kind: &str, object: &DynamicObject) -> Result<Self, MutateError> {
        match kind {
            "Deployment" => {
                let value = serde_json::to_value(object)?;
                let deployment: Deployment = serde_json::from_value(value)?;
                Ok(Workload::Deployment(Box::new(deployment)))
            }
            other => Err(MutateError::UnsupportedKind(other.to_string())),
        }
    }

    /// Kind tag of the variant
    pub fn kind(&self) -> &'static str {
        match self {
            Workload::Deployment(_) => "Deployment",
        }
    }

    /// Common pod template view of the variant
    pub fn template(&self) -> &dyn PodTemplateWorkload {
        match self {
            Workload::Deployment(deployment) => deployment.as_ref(),
        }
    }
}
