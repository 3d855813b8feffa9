//! Diff engine comparing the declared deployment against recorded state.
//!
//! Comparison happens on canonical property forms, so reordering a set-valued
//! property is not a change. A reference is compared both as a marker and by
//! the value it resolved to when last applied: if the target's recorded
//! attribute has since moved, the dependent is updated.

use std::collections::BTreeSet;
use tracing::debug;

use crate::config::ConfigHasher;
use crate::error::PlanError;
use crate::model::{
    references_in, schema, Deployment, Properties, PropertyValue, ResourceKind,
};
use crate::state::{DeploymentState, ResourceState};

/// Engine for computing diffs between declared and recorded resources.
#[derive(Debug, Default)]
pub struct DiffEngine {
    hasher: ConfigHasher,
}

/// Difference for a single resource.
#[derive(Debug, Clone)]
pub struct ResourceDiff {
    /// Resource id.
    pub id: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Type of difference.
    pub diff_type: DiffType,
    /// Changed top-level properties, for updates.
    pub changes: Vec<PropertyChange>,
    /// Canonical declared properties, absent for deletes.
    pub canonical: Option<Properties>,
    /// Recorded hash, if recorded.
    pub old_hash: Option<String>,
    /// Declared hash, if declared.
    pub new_hash: Option<String>,
}

/// Type of difference detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffType {
    /// Declared but not recorded.
    Create,
    /// Declared and recorded with different properties.
    Update,
    /// Recorded but no longer declared.
    Delete,
    /// Declared and recorded with equal properties.
    NoChange,
}

/// A changed top-level property.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PropertyChange {
    /// Property name.
    pub field: String,
    /// Recorded value.
    pub old_value: Option<PropertyValue>,
    /// Declared value.
    pub new_value: Option<PropertyValue>,
}

/// Complete diff result.
#[derive(Debug, Default)]
pub struct DiffResult {
    /// Declared resources in declaration order, then deleted ones by id.
    pub diffs: Vec<ResourceDiff>,
    /// Number of resources to create.
    pub creates: usize,
    /// Number of resources to update.
    pub updates: usize,
    /// Number of resources to delete.
    pub deletes: usize,
    /// Number of unchanged resources.
    pub unchanged: usize,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: ConfigHasher::new(),
        }
    }

    /// Computes the diff between the deployment and recorded state.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::KindChanged`] if a recorded id is declared with a
    /// different kind.
    pub fn compute_diff(
        &self,
        deployment: &Deployment,
        state: &DeploymentState,
    ) -> Result<DiffResult, PlanError> {
        let mut diffs = Vec::with_capacity(deployment.len());

        for node in deployment.nodes() {
            let canonical = schema::canonicalize(node.kind, &node.properties);
            let new_hash = self.hasher.hash_canonical(&canonical);

            let diff = match state.get_resource(&node.id) {
                None => {
                    debug!("Resource {} needs to be created", node.id);
                    ResourceDiff {
                        id: node.id.clone(),
                        kind: node.kind,
                        diff_type: DiffType::Create,
                        changes: Vec::new(),
                        canonical: Some(canonical),
                        old_hash: None,
                        new_hash: Some(new_hash),
                    }
                }
                Some(recorded) if recorded.kind != node.kind => {
                    return Err(PlanError::KindChanged {
                        id: node.id.clone(),
                        recorded: recorded.kind.to_string(),
                        declared: node.kind.to_string(),
                    });
                }
                Some(recorded) => {
                    let mut changes = property_changes(&recorded.properties, &canonical);
                    changes.extend(reference_changes(recorded, &canonical, state, &changes));
                    let diff_type = if changes.is_empty() {
                        debug!("Resource {} is up to date", node.id);
                        DiffType::NoChange
                    } else {
                        debug!("Resource {} changed: {} properties", node.id, changes.len());
                        DiffType::Update
                    };

                    ResourceDiff {
                        id: node.id.clone(),
                        kind: node.kind,
                        diff_type,
                        changes,
                        canonical: Some(canonical),
                        old_hash: Some(recorded.properties_hash.clone()),
                        new_hash: Some(new_hash),
                    }
                }
            };
            diffs.push(diff);
        }

        for recorded in state.resources.values() {
            if !deployment.contains(&recorded.id) {
                debug!("Resource {} is no longer declared", recorded.id);
                diffs.push(ResourceDiff {
                    id: recorded.id.clone(),
                    kind: recorded.kind,
                    diff_type: DiffType::Delete,
                    changes: Vec::new(),
                    canonical: None,
                    old_hash: Some(recorded.properties_hash.clone()),
                    new_hash: None,
                });
            }
        }

        let count = |t: DiffType| diffs.iter().filter(|d| d.diff_type == t).count();
        Ok(DiffResult {
            creates: count(DiffType::Create),
            updates: count(DiffType::Update),
            deletes: count(DiffType::Delete),
            unchanged: count(DiffType::NoChange),
            diffs,
        })
    }
}

/// Lists the top-level properties whose canonical values differ.
///
/// Both sides must already be canonical.
fn property_changes(recorded: &Properties, declared: &Properties) -> Vec<PropertyChange> {
    let keys: BTreeSet<&String> = recorded.keys().chain(declared.keys()).collect();

    keys.into_iter()
        .filter_map(|key| {
            let old_value = recorded.get(key);
            let new_value = declared.get(key);
            (old_value != new_value).then(|| PropertyChange {
                field: key.clone(),
                old_value: old_value.cloned(),
                new_value: new_value.cloned(),
            })
        })
        .collect()
}

/// Lists references whose target attribute moved since they were resolved.
///
/// Paths under a top-level property already in `changed` are skipped. A
/// target no longer recorded reports the marker as the new value.
fn reference_changes(
    recorded: &ResourceState,
    declared: &Properties,
    state: &DeploymentState,
    changed: &[PropertyChange],
) -> Vec<PropertyChange> {
    references_in(declared)
        .into_iter()
        .filter(|(path, _)| !changed.iter().any(|c| is_under(path, &c.field)))
        .filter_map(|(path, marker)| {
            let resolved = recorded.resolved_references.get(&marker.to_string())?;
            let current = state
                .get_resource(&marker.node)
                .and_then(|r| r.attribute(&marker.attribute));
            (current != Some(resolved.as_str())).then(|| PropertyChange {
                field: path,
                old_value: Some(PropertyValue::from(resolved.as_str())),
                new_value: Some(current.map_or_else(
                    || PropertyValue::Reference(marker),
                    PropertyValue::from,
                )),
            })
        })
        .collect()
}

fn is_under(path: &str, field: &str) -> bool {
    path.strip_prefix(field)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(['.', '[']))
}

impl DiffResult {
    /// Returns true if any resource would change.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.creates > 0 || self.updates > 0 || self.deletes > 0
    }

    /// Returns the diffs that require an operation.
    #[must_use]
    pub fn actionable_diffs(&self) -> Vec<&ResourceDiff> {
        self.diffs
            .iter()
            .filter(|d| d.diff_type != DiffType::NoChange)
            .collect()
    }
}

impl std::fmt::Display for DiffType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::NoChange => "no change",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ResourceState;

    fn service(groups: &str, count: i64) -> Properties {
        serde_yaml::from_str(&format!(
            "service_name: web\nnetwork: {{ ref: vpc.id }}\ntask_definition: task\n\
             desired_count: {count}\nsecurity_groups: {groups}"
        ))
        .unwrap()
    }

    fn recorded(id: &str, kind: ResourceKind, properties: &Properties) -> ResourceState {
        let mut resource = ResourceState::new(id, kind, &format!("p-{id}"));
        resource.properties = schema::canonicalize(kind, properties);
        resource.properties_hash = ConfigHasher::new().hash_canonical(&resource.properties);
        resource
    }

    fn deployment(properties: Properties) -> Deployment {
        let mut deployment = Deployment::new("demo");
        deployment
            .define_resource(ResourceKind::Service, "web", properties)
            .unwrap();
        deployment
    }

    #[test]
    fn test_set_reorder_is_no_change() {
        let mut state = DeploymentState::new("demo");
        state.set_resource(recorded("web", ResourceKind::Service, &service("[a, b]", 1)));

        let result = DiffEngine::new()
            .compute_diff(&deployment(service("[b, a]", 1)), &state)
            .unwrap();

        assert_eq!(result.diffs[0].diff_type, DiffType::NoChange);
        assert_eq!(result.diffs[0].old_hash, result.diffs[0].new_hash);
        assert!(!result.has_changes());
    }

    #[test]
    fn test_changed_property_is_update_with_detail() {
        let mut state = DeploymentState::new("demo");
        state.set_resource(recorded("web", ResourceKind::Service, &service("[a]", 1)));

        let result = DiffEngine::new()
            .compute_diff(&deployment(service("[a]", 3)), &state)
            .unwrap();

        assert_eq!(result.updates, 1);
        assert_eq!(
            result.diffs[0].changes,
            vec![PropertyChange {
                field: String::from("desired_count"),
                old_value: Some(PropertyValue::from(1)),
                new_value: Some(PropertyValue::from(3)),
            }]
        );
    }

    #[test]
    fn test_undeclared_resource_is_delete() {
        let mut state = DeploymentState::new("demo");
        state.set_resource(recorded("web", ResourceKind::Service, &service("[a]", 1)));
        state.set_resource(recorded(
            "old-vpc",
            ResourceKind::Network,
            &serde_yaml::from_str("is_default: true").unwrap(),
        ));

        let result = DiffEngine::new()
            .compute_diff(&deployment(service("[a]", 1)), &state)
            .unwrap();

        assert_eq!(result.deletes, 1);
        assert_eq!(result.actionable_diffs()[0].id, "old-vpc");
    }

    #[test]
    fn test_moved_reference_target_is_update() {
        let mut state = DeploymentState::new("demo");
        let mut vpc = ResourceState::new("vpc", ResourceKind::Network, "vpc-2");
        vpc.attributes.insert(String::from("id"), String::from("vpc-2"));
        state.set_resource(vpc);
        let mut web = recorded("web", ResourceKind::Service, &service("[a]", 1));
        web.resolved_references
            .insert(String::from("vpc.id"), String::from("vpc-1"));
        state.set_resource(web);

        let result = DiffEngine::new()
            .compute_diff(&deployment(service("[a]", 1)), &state)
            .unwrap();

        let web = result.diffs.iter().find(|d| d.id == "web").unwrap();
        assert_eq!(web.diff_type, DiffType::Update);
        assert_eq!(
            web.changes,
            vec![PropertyChange {
                field: String::from("network"),
                old_value: Some(PropertyValue::from("vpc-1")),
                new_value: Some(PropertyValue::from("vpc-2")),
            }]
        );
    }

    #[test]
    fn test_unmoved_reference_target_is_no_change() {
        let mut state = DeploymentState::new("demo");
        let mut vpc = ResourceState::new("vpc", ResourceKind::Network, "vpc-1");
        vpc.attributes.insert(String::from("id"), String::from("vpc-1"));
        state.set_resource(vpc);
        let mut web = recorded("web", ResourceKind::Service, &service("[a]", 1));
        web.resolved_references
            .insert(String::from("vpc.id"), String::from("vpc-1"));
        state.set_resource(web);

        let result = DiffEngine::new()
            .compute_diff(&deployment(service("[a]", 1)), &state)
            .unwrap();

        let web = result.diffs.iter().find(|d| d.id == "web").unwrap();
        assert_eq!(web.diff_type, DiffType::NoChange);
    }

    #[test]
    fn test_kind_change_rejected() {
        let mut state = DeploymentState::new("demo");
        state.set_resource(recorded(
            "web",
            ResourceKind::Network,
            &serde_yaml::from_str("is_default: true").unwrap(),
        ));

        let err = DiffEngine::new()
            .compute_diff(&deployment(service("[a]", 1)), &state)
            .unwrap_err();

        assert!(matches!(err, PlanError::KindChanged { .. }));
    }
}
