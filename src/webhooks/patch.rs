//! JSON Patch construction for pod template fields.
//!
//! Every helper is pure and returns operations in the order they must be
//! applied. Map fields follow one add-vs-replace rule:
//!
//! - enclosing map absent, or key absent/empty: `add` at the map path with a
//!   single-entry map as value
//! - key present: `replace` at the key path with the scalar value
//!
//! The `add` form writes the whole map, so any unrelated keys already in it
//! are dropped when the patch is applied. Callers rely on this only for maps
//! that do not yet carry the key.
//!
//! Container shadow resources are the exception: they are added key by key
//! next to the container's own CPU and memory values.

use std::collections::BTreeMap;

use json_patch::{AddOperation, PatchOperation, ReplaceOperation};
use jsonptr::PointerBuf;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde_json::{Value, json};

/// Pod template annotations
pub const TEMPLATE_ANNOTATIONS: [&str; 4] = ["spec", "template", "metadata", "annotations"];
/// Pod template labels
pub const TEMPLATE_LABELS: [&str; 4] = ["spec", "template", "metadata", "labels"];
/// Selector match labels
pub const SELECTOR_MATCH_LABELS: [&str; 3] = ["spec", "selector", "matchLabels"];
/// Pod template node selector
pub const TEMPLATE_NODE_SELECTOR: [&str; 4] = ["spec", "template", "spec", "nodeSelector"];

/// Shadow accounting key for CPU
pub const CONTAINER_RESOURCE_CPU_KEY: &str = "cmos.mixed/cpu";
/// Shadow accounting key for memory
pub const CONTAINER_RESOURCE_MEMORY_KEY: &str = "cmos.mixed/memory";
/// Per-container pod count marker
pub const CONTAINER_RESOURCE_POD_COUNT_KEY: &str = "cmos.mixed/podcount";

/// Serialized form of the zero quantity, used when a container does not
/// declare a CPU or memory value.
const ZERO_QUANTITY: &str = "0";

fn pointer<'a>(tokens: impl IntoIterator<Item = &'a str>) -> PointerBuf {
    PointerBuf::from_tokens(tokens)
}

fn add(path: PointerBuf, value: Value) -> PatchOperation {
    PatchOperation::Add(AddOperation { path, value })
}

fn replace(path: PointerBuf, value: Value) -> PatchOperation {
    PatchOperation::Replace(ReplaceOperation { path, value })
}

fn quantity(map: Option<&BTreeMap<String, Quantity>>, name: &str) -> String {
    map.and_then(|m| m.get(name))
        .map(|q| q.0.clone())
        .unwrap_or_else(|| ZERO_QUANTITY.to_string())
}

fn has_value(target: Option<&BTreeMap<String, String>>, key: &str) -> bool {
    target
        .and_then(|map| map.get(key))
        .is_some_and(|value| !value.is_empty())
}

/// Set one key inside the map at `base`.
///
/// The key is escaped per JSON Pointer rules when the `replace` form is used.
pub fn set_map_entry(
    base: &[&str],
    target: Option<&BTreeMap<String, String>>,
    key: &str,
    value: &str,
) -> PatchOperation {
    if has_value(target, key) {
        let path = pointer(base.iter().copied().chain(std::iter::once(key)));
        replace(path, Value::String(value.to_string()))
    } else {
        add(pointer(base.iter().copied()), json!({ key: value }))
    }
}

/// Set a pod template annotation
pub fn set_template_annotation(
    annotations: Option<&BTreeMap<String, String>>,
    key: &str,
    value: &str,
) -> Vec<PatchOperation> {
    vec![set_map_entry(&TEMPLATE_ANNOTATIONS, annotations, key, value)]
}

/// Set a label on both the selector and the pod template.
///
/// The selector operation comes first. Each map gets its own add-vs-replace
/// decision.
pub fn set_template_label(
    selector_labels: Option<&BTreeMap<String, String>>,
    template_labels: Option<&BTreeMap<String, String>>,
    key: &str,
    value: &str,
) -> Vec<PatchOperation> {
    vec![
        set_map_entry(&SELECTOR_MATCH_LABELS, selector_labels, key, value),
        set_map_entry(&TEMPLATE_LABELS, template_labels, key, value),
    ]
}

/// Set a pod template node selector entry
pub fn set_node_selector(
    node_selector: Option<&BTreeMap<String, String>>,
    key: &str,
    value: &str,
) -> Vec<PatchOperation> {
    vec![set_map_entry(&TEMPLATE_NODE_SELECTOR, node_selector, key, value)]
}

/// Resource maps of one container, tracked while its shadow entries are
/// added so that only the first entry for a missing map creates it.
struct ResourceMaps {
    /// `/spec/template/spec/containers/{i}/resources`
    path: [String; 6],
    resources: bool,
    limits: bool,
    requests: bool,
}

impl ResourceMaps {
    fn new(index: usize, container: &Container) -> Self {
        let resources = container.resources.as_ref();
        Self {
            path: [
                "spec",
                "template",
                "spec",
                "containers",
                index.to_string().as_str(),
                "resources",
            ]
            .map(str::to_string),
            resources: resources.is_some(),
            limits: resources.is_some_and(|r| r.limits.is_some()),
            requests: resources.is_some_and(|r| r.requests.is_some()),
        }
    }

    fn tokens<'a>(&'a self, extra: &'a [&'a str]) -> impl Iterator<Item = &'a str> {
        self.path.iter().map(String::as_str).chain(extra.iter().copied())
    }

    /// Add `key` to the `field` map (`limits` or `requests`).
    fn add(&mut self, field: &str, key: &str, value: String) -> PatchOperation {
        let present = if field == LIMITS { self.limits } else { self.requests };
        let op = if present {
            add(pointer(self.tokens(&[field, key])), Value::String(value))
        } else if self.resources {
            add(pointer(self.tokens(&[field])), json!({ key: value }))
        } else {
            add(pointer(self.tokens(&[])), json!({ field: { key: value } }))
        };

        self.resources = true;
        if field == LIMITS {
            self.limits = true;
        } else {
            self.requests = true;
        }
        op
    }
}

const LIMITS: &str = "limits";
const REQUESTS: &str = "requests";

/// Add shadow resource accounting entries for every container.
///
/// Per container, in order: limits cpu, limits memory, requests cpu,
/// requests memory, requests pod count. Entries are added key by key, so the
/// original CPU and memory values stay in place. A missing `limits` or
/// `requests` map (or a missing `resources` block) is created by the first
/// entry written into it.
pub fn add_container_shadow_resources(containers: &[Container]) -> Vec<PatchOperation> {
    let mut ops = Vec::with_capacity(containers.len() * 5);

    for (index, container) in containers.iter().enumerate() {
        let resources = container.resources.as_ref();
        let limits = resources.and_then(|r| r.limits.as_ref());
        let requests = resources.and_then(|r| r.requests.as_ref());
        let mut maps = ResourceMaps::new(index, container);

        ops.push(maps.add(LIMITS, CONTAINER_RESOURCE_CPU_KEY, quantity(limits, "cpu")));
        ops.push(maps.add(LIMITS, CONTAINER_RESOURCE_MEMORY_KEY, quantity(limits, "memory")));
        ops.push(maps.add(REQUESTS, CONTAINER_RESOURCE_CPU_KEY, quantity(requests, "cpu")));
        ops.push(maps.add(REQUESTS, CONTAINER_RESOURCE_MEMORY_KEY, quantity(requests, "memory")));
        ops.push(maps.add(REQUESTS, CONTAINER_RESOURCE_POD_COUNT_KEY, "1".to_string()));
    }

    ops
}
