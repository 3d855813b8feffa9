//! Content hashing for change detection.
//!
//! Hashes are SHA-256 over canonical JSON, so two declarations that differ
//! only in the order of set-valued properties hash the same.

use sha2::{Digest, Sha256};

use crate::model::{schema, Properties, ResourceKind};

use super::spec::StackConfig;

/// Hasher for declarations and property bags.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Hashes the whole declaration: project identity plus every resource in
    /// declaration order.
    #[must_use]
    pub fn hash_config(&self, config: &StackConfig) -> String {
        let mut hasher = Sha256::new();

        hasher.update(config.project.name.as_bytes());
        hasher.update([0]);
        hasher.update(config.project.environment.as_bytes());

        for resource in &config.resources {
            hasher.update([0]);
            hasher.update(resource.id.as_bytes());
            hasher.update([0]);
            hasher.update(resource.kind.as_str().as_bytes());
            hasher.update([0]);
            hasher.update(self.hash_properties(resource.kind, &resource.properties).as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Hashes the canonical form of a property bag.
    #[must_use]
    pub fn hash_properties(&self, kind: ResourceKind, properties: &Properties) -> String {
        self.hash_canonical(&schema::canonicalize(kind, properties))
    }

    /// Hashes a property bag already in canonical form.
    #[must_use]
    pub fn hash_canonical(&self, canonical: &Properties) -> String {
        let json = serde_json::to_string(canonical).unwrap_or_default();
        hex::encode(Sha256::digest(json.as_bytes()))
    }

    /// Returns the first 12 characters of a hash for display.
    #[must_use]
    pub fn short_hash(hash: &str) -> &str {
        hash.get(..12).unwrap_or(hash)
    }

    /// Compares two hashes.
    #[must_use]
    pub fn hashes_match(a: &str, b: &str) -> bool {
        a == b
    }
}
