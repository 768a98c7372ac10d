//! Policy rules and immutable snapshots.
//!
//! The policy file is a JSON array of rules:
//!
//! ```json
//! [
//!   { "namespace": "shop", "name": "checkout", "mixed": true, "priority": 5 }
//! ]
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PolicyError, Result};

/// A single workload subject to mutation, identified by namespace and name.
///
/// Missing fields take their zero value. Uniqueness is not enforced; the
/// decision engine resolves duplicates.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyRule {
    pub namespace: String,
    pub name: String,
    /// Whether the workload is co-located with other workloads
    pub mixed: bool,
    /// Caller-supplied priority carried into the priority annotation
    pub priority: i64,
}

impl PolicyRule {
    /// Create a rule for the given workload
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        mixed: bool,
        priority: i64,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            mixed,
            priority,
        }
    }

    /// Check whether this rule targets the given workload
    pub fn matches(&self, namespace: &str, name: &str) -> bool {
        self.name == name && self.namespace == namespace
    }
}

/// One fully loaded, immutable version of the rule list.
///
/// Snapshots are never mutated in place. A reload builds a new one and the
/// store swaps it in wholesale.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PolicySnapshot {
    generation: u64,
    rules: Vec<PolicyRule>,
}

impl PolicySnapshot {
    /// Build a snapshot from rules. The generation is assigned on install.
    pub fn new(rules: Vec<PolicyRule>) -> Self {
        Self {
            generation: 0,
            rules,
        }
    }

    /// Read and parse a policy file into a new snapshot.
    ///
    /// Fails on I/O errors and on anything that is not a JSON array of rules.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read(path).await.map_err(|source| PolicyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_slice(path, &content)
    }

    /// Parse policy file contents. `path` is only used for error reporting.
    pub fn from_slice(path: &Path, content: &[u8]) -> Result<Self> {
        let rules: Vec<PolicyRule> =
            serde_json::from_slice(content).map_err(|source| PolicyError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::new(rules))
    }

    /// Stamp the snapshot with the generation it is installed under
    pub(crate) fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    /// Install generation. The boot-time snapshot is generation 1; 0 means
    /// the snapshot was never installed.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Rules in file order
    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    pub fn get(&self, index: usize) -> Option<&PolicyRule> {
        self.rules.get(index)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
