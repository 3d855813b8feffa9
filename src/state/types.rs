//! State types recording what has been provisioned.
//!
//! The state is the engine's only memory between runs: the diff compares the
//! declared deployment against it, and deletes are ordered using the
//! dependencies recorded here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::StateError;
use crate::model::{Properties, ResourceKind};

/// Current version of the state format.
pub const STATE_VERSION: &str = "1";

/// Maximum number of history entries kept.
const MAX_HISTORY: usize = 100;

/// The complete recorded state of a deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentState {
    /// State format version.
    pub version: String,
    /// Deployment id (`<project>-<environment>`).
    pub deployment_id: String,
    /// Incremented on every mutation; plans record the serial they were
    /// synthesized against.
    #[serde(default)]
    pub serial: u64,
    /// Hash of the last fully applied configuration.
    #[serde(default)]
    pub config_hash: String,
    /// Provisioned resources by id.
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceState>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Recent runs, oldest first.
    #[serde(default)]
    pub history: Vec<DeploymentHistoryEntry>,
}

/// Recorded state of a single provisioned resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceState {
    /// Resource id.
    pub id: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Provider-assigned id.
    pub provider_id: String,
    /// Declared properties in canonical form, references unresolved.
    pub properties: Properties,
    /// Hash of the canonical properties.
    pub properties_hash: String,
    /// Output attributes reported by the provider.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Ids this resource depended on when it was last applied.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Values the references resolved to when last applied, keyed by
    /// `node.attribute`.
    #[serde(default)]
    pub resolved_references: BTreeMap<String, String>,
    /// Declaration position when it was last applied.
    #[serde(default)]
    pub position: usize,
    /// When the resource was created.
    pub created_at: DateTime<Utc>,
    /// When the resource was last updated.
    pub updated_at: DateTime<Utc>,
}

/// A single entry in the deployment history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploymentHistoryEntry {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Type of run.
    pub operation: DeploymentOperation,
    /// Configuration hash the run applied.
    pub config_hash: String,
    /// Resources touched by the run.
    pub resources: Vec<String>,
    /// Whether every operation succeeded.
    pub success: bool,
    /// Error message of a failed run.
    #[serde(default)]
    pub error: Option<String>,
}

/// Types of recorded runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentOperation {
    /// Plan execution.
    Apply,
    /// Plan execution removing every resource.
    Destroy,
    /// State refresh from the provider.
    Refresh,
}

impl DeploymentState {
    /// Creates a new empty state.
    #[must_use]
    pub fn new(deployment_id: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            deployment_id: deployment_id.to_string(),
            serial: 0,
            config_hash: String::new(),
            resources: BTreeMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Checks the state format version.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::VersionMismatch`] for any other version.
    pub fn check_version(&self) -> Result<(), StateError> {
        if self.version == STATE_VERSION {
            Ok(())
        } else {
            Err(StateError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found: self.version.clone(),
            })
        }
    }

    /// Gets a resource by id.
    #[must_use]
    pub fn get_resource(&self, id: &str) -> Option<&ResourceState> {
        self.resources.get(id)
    }

    /// Adds or replaces a resource.
    pub fn set_resource(&mut self, resource: ResourceState) {
        self.resources.insert(resource.id.clone(), resource);
        self.touch();
    }

    /// Removes a resource by id.
    pub fn remove_resource(&mut self, id: &str) -> Option<ResourceState> {
        let removed = self.resources.remove(id);
        if removed.is_some() {
            self.touch();
        }
        removed
    }

    /// Records the configuration hash of a fully applied run.
    pub fn set_config_hash(&mut self, hash: &str) {
        if self.config_hash != hash {
            self.config_hash = hash.to_string();
            self.touch();
        }
    }

    /// Adds a history entry, dropping the oldest beyond the limit.
    pub fn add_history(&mut self, entry: DeploymentHistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
        self.touch();
    }

    /// Recorded resource ids.
    #[must_use]
    pub fn resource_ids(&self) -> Vec<&str> {
        self.resources.keys().map(String::as_str).collect()
    }

    /// Returns true if no resource is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    fn touch(&mut self) {
        self.serial += 1;
        self.last_updated = Utc::now();
    }
}

impl ResourceState {
    /// Creates a resource record for a newly provisioned resource.
    #[must_use]
    pub fn new(id: &str, kind: ResourceKind, provider_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            kind,
            provider_id: provider_id.to_string(),
            properties: Properties::new(),
            properties_hash: String::new(),
            attributes: BTreeMap::new(),
            dependencies: Vec::new(),
            resolved_references: BTreeMap::new(),
            position: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Gets an output attribute.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

impl DeploymentHistoryEntry {
    /// Creates a successful history entry.
    #[must_use]
    pub fn new(operation: DeploymentOperation, config_hash: &str, resources: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            resources,
            success: true,
            error: None,
        }
    }

    /// Creates a failed history entry.
    #[must_use]
    pub fn failed(
        operation: DeploymentOperation,
        config_hash: &str,
        resources: Vec<String>,
        error: &str,
    ) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            ..Self::new(operation, config_hash, resources)
        }
    }
}

impl std::fmt::Display for DeploymentOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Apply => "apply",
            Self::Destroy => "destroy",
            Self::Refresh => "refresh",
        };
        write!(f, "{op}")
    }
}
