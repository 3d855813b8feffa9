//! Plan types and synthesis.
//!
//! A plan is a single ordered list of operations. Creates and updates follow
//! the dependency graph forward; deletes follow the dependencies recorded in
//! state in reverse. All of them are ordered together, so a mixed plan
//! interleaves by dependency, never by operation kind.
//!
//! An unchanged resource depending on something created or updated in the
//! same plan becomes a deferred update: the executor resolves its references
//! once the dependency has run and only calls the provider if a value moved.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

use crate::error::PlanError;
use crate::graph::{find_cycle, stable_order, DependencyGraph};
use crate::model::{Deployment, Properties, ResourceKind};
use crate::state::{DeploymentState, ResourceState};

use super::diff::{DiffEngine, DiffType, PropertyChange, ResourceDiff};

/// Operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Provision a resource absent from state.
    Create,
    /// Modify a recorded resource whose properties changed.
    Update,
    /// Remove a recorded resource no longer declared.
    Delete,
    /// Leave an unchanged resource alone.
    NoOp,
}

/// A single planned operation.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedOperation {
    /// Operation kind.
    pub kind: OperationKind,
    /// Resource id.
    pub node_id: String,
    /// Resource kind.
    pub resource_kind: ResourceKind,
    /// Canonical declared properties; `None` for deletes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Properties>,
    /// Hash of the declared properties; `None` for deletes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties_hash: Option<String>,
    /// Recorded state; `None` for creates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prior: Option<ResourceState>,
    /// Declared dependencies, or recorded ones for deletes.
    pub dependencies: Vec<String>,
    /// Declaration position, or recorded position for deletes.
    pub position: usize,
    /// Changed top-level properties, for updates.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<PropertyChange>,
    /// Update issued only if a reference resolves differently at execution.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub deferred: bool,
}

/// An ordered deployment plan.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentPlan {
    /// Deployment the plan targets.
    pub deployment_id: String,
    /// When the plan was synthesized.
    pub created_at: DateTime<Utc>,
    /// Hash of the declaration.
    pub config_hash: String,
    /// State serial the plan was synthesized against.
    pub state_serial: u64,
    /// Operations in execution order.
    pub operations: Vec<PlannedOperation>,
}

/// Operation counts by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanCounts {
    /// Creates.
    pub create: usize,
    /// Updates.
    pub update: usize,
    /// Deletes.
    pub delete: usize,
    /// Unchanged resources.
    pub noop: usize,
}

/// Converts the graph and recorded state into an ordered plan.
#[derive(Debug, Default)]
pub struct PlanSynthesizer {
    diff_engine: DiffEngine,
}

impl PlanSynthesizer {
    /// Creates a new synthesizer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            diff_engine: DiffEngine::new(),
        }
    }

    /// Synthesizes a plan.
    ///
    /// Ties among ready operations go to declared resources by position, then
    /// to deleted resources by recorded position.
    ///
    /// # Errors
    ///
    /// - [`PlanError::KindChanged`] if a recorded id changed kind
    /// - [`PlanError::CyclicDependency`] if recorded dependencies form a cycle
    pub fn synthesize(
        &self,
        deployment: &Deployment,
        graph: &DependencyGraph,
        state: &DeploymentState,
        config_hash: &str,
    ) -> Result<DeploymentPlan, PlanError> {
        let diff = self.diff_engine.compute_diff(deployment, state)?;

        let mut declared: Vec<ResourceDiff> = Vec::with_capacity(deployment.len());
        let mut deleted: Vec<ResourceDiff> = Vec::new();
        for resource_diff in diff.diffs {
            if resource_diff.diff_type == DiffType::Delete {
                deleted.push(resource_diff);
            } else {
                declared.push(resource_diff);
            }
        }

        deleted.sort_by_cached_key(|d| {
            let position = state.get_resource(&d.id).map_or(usize::MAX, |r| r.position);
            (position, d.id.clone())
        });

        let offset = declared.len();
        let mut slots: HashMap<&str, usize> = HashMap::new();
        for (i, d) in declared.iter().chain(&deleted).enumerate() {
            slots.insert(d.id.as_str(), i);
        }

        let mut dependencies = vec![BTreeSet::new(); offset + deleted.len()];
        for (i, d) in declared.iter().enumerate() {
            for dependency in graph.dependencies_of(&d.id) {
                if let Some(&slot) = slots.get(dependency) {
                    dependencies[i].insert(slot);
                }
            }
        }
        for (i, d) in deleted.iter().enumerate() {
            let Some(recorded) = state.get_resource(&d.id) else {
                continue;
            };
            for dependency in &recorded.dependencies {
                if let Some(&slot) = slots.get(dependency.as_str()) {
                    dependencies[slot].insert(offset + i);
                }
            }
        }

        let Some(order) = stable_order(&dependencies, |i| i) else {
            let ids: Vec<&str> = declared.iter().chain(&deleted).map(|d| d.id.as_str()).collect();
            let cycle = find_cycle(&dependencies)
                .unwrap_or_default()
                .into_iter()
                .map(|i| ids[i].to_string())
                .collect();
            return Err(PlanError::CyclicDependency { cycle });
        };

        let mut slots: Vec<Option<ResourceDiff>> =
            declared.into_iter().chain(deleted).map(Some).collect();
        let mut operations: Vec<PlannedOperation> = order
            .into_iter()
            .filter_map(|i| slots[i].take())
            .map(|d| operation_from_diff(d, deployment, graph, state))
            .collect();
        defer_dependents(&mut operations);

        let plan = DeploymentPlan {
            deployment_id: deployment.id().to_string(),
            created_at: Utc::now(),
            config_hash: config_hash.to_string(),
            state_serial: state.serial,
            operations,
        };

        debug!(
            deployment = %plan.deployment_id,
            serial = plan.state_serial,
            "Synthesized plan: {}",
            plan.counts()
        );

        Ok(plan)
    }
}

/// Turns no-ops downstream of a create or update into deferred updates.
///
/// `operations` must be in dependency order.
fn defer_dependents(operations: &mut [PlannedOperation]) {
    let mut changing: HashSet<String> = HashSet::new();

    for op in operations.iter_mut() {
        match op.kind {
            OperationKind::Create | OperationKind::Update => {
                changing.insert(op.node_id.clone());
            }
            OperationKind::NoOp if op.dependencies.iter().any(|d| changing.contains(d)) => {
                debug!("Deferring update of {} until its dependencies have run", op.node_id);
                op.kind = OperationKind::Update;
                op.deferred = true;
                changing.insert(op.node_id.clone());
            }
            OperationKind::NoOp | OperationKind::Delete => {}
        }
    }
}

fn operation_from_diff(
    diff: ResourceDiff,
    deployment: &Deployment,
    graph: &DependencyGraph,
    state: &DeploymentState,
) -> PlannedOperation {
    let prior = state.get_resource(&diff.id).cloned();

    let kind = match diff.diff_type {
        DiffType::Create => OperationKind::Create,
        DiffType::Update => OperationKind::Update,
        DiffType::Delete => OperationKind::Delete,
        DiffType::NoChange => OperationKind::NoOp,
    };

    let (dependencies, position) = if kind == OperationKind::Delete {
        prior
            .as_ref()
            .map(|r| (r.dependencies.clone(), r.position))
            .unwrap_or_default()
    } else {
        (
            graph
                .dependencies_of(&diff.id)
                .into_iter()
                .map(ToString::to_string)
                .collect(),
            deployment.get(&diff.id).map_or(0, |n| n.position),
        )
    };

    PlannedOperation {
        kind,
        node_id: diff.id,
        resource_kind: diff.kind,
        properties: diff.canonical,
        properties_hash: diff.new_hash,
        prior,
        dependencies,
        position,
        changes: diff.changes,
        deferred: false,
    }
}

impl DeploymentPlan {
    /// Operation counts by kind.
    #[must_use]
    pub fn counts(&self) -> PlanCounts {
        self.operations
            .iter()
            .fold(PlanCounts::default(), |mut counts, op| {
                match op.kind {
                    OperationKind::Create => counts.create += 1,
                    OperationKind::Update => counts.update += 1,
                    OperationKind::Delete => counts.delete += 1,
                    OperationKind::NoOp => counts.noop += 1,
                }
                counts
            })
    }

    /// Returns true if any operation changes something.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.operations.iter().any(|op| op.kind != OperationKind::NoOp)
    }

    /// Number of operations, no-ops included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns true if the plan has no operations at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl PlannedOperation {
    /// Human-readable description.
    #[must_use]
    pub fn description(&self) -> String {
        match self.kind {
            OperationKind::Create => format!("Create {} '{}'", self.resource_kind, self.node_id),
            OperationKind::Update if self.deferred => format!(
                "Update {} '{}' (if references change)",
                self.resource_kind, self.node_id
            ),
            OperationKind::Update => format!(
                "Update {} '{}' ({})",
                self.resource_kind,
                self.node_id,
                self.changes
                    .iter()
                    .map(|c| c.field.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            OperationKind::Delete => format!("Delete {} '{}'", self.resource_kind, self.node_id),
            OperationKind::NoOp => format!("No change for '{}'", self.node_id),
        }
    }

    /// Provider id of the recorded resource, if any.
    #[must_use]
    pub fn provider_id(&self) -> Option<&str> {
        self.prior.as_ref().map(|r| r.provider_id.as_str())
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::NoOp => "noop",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for PlanCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to delete, {} unchanged",
            self.create, self.update, self.delete, self.noop
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigHasher;
    use crate::graph::ReferenceResolver;
    use crate::model::schema;

    const NETWORK: &str = "is_default: true";
    const ROLE: &str = "role_name: AppRole\nassumed_by: ecs-tasks.amazonaws.com";
    const TASK: &str = "cpu: 256\nmemory: 512\ntask_role: { ref: r1.arn }\n\
                        containers: [{ name: web, image: nginx }]";
    const SERVICE: &str =
        "service_name: web\nnetwork: { ref: n1.id }\ntask_definition: { ref: t1.arn }";

    fn deployment(nodes: &[(ResourceKind, &str, &str)]) -> Deployment {
        let mut deployment = Deployment::new("demo");
        for (kind, id, yaml) in nodes {
            deployment
                .define_resource(*kind, id, serde_yaml::from_str(yaml).unwrap())
                .unwrap();
        }
        deployment
    }

    fn plan(deployment: &Deployment, state: &DeploymentState) -> Result<DeploymentPlan, PlanError> {
        let references = ReferenceResolver::new().resolve(deployment)?;
        let graph = DependencyGraph::build(deployment, &references)?;
        PlanSynthesizer::new().synthesize(deployment, &graph, state, "hash")
    }

    fn summary(plan: &DeploymentPlan) -> Vec<(OperationKind, &str)> {
        plan.operations
            .iter()
            .map(|op| (op.kind, op.node_id.as_str()))
            .collect()
    }

    /// Records every declared resource as applied, as the executor would.
    fn applied_state(deployment: &Deployment, plan: &DeploymentPlan) -> DeploymentState {
        let mut state = DeploymentState::new("demo");
        for op in &plan.operations {
            let node = deployment.get(&op.node_id).unwrap();
            let mut resource = ResourceState::new(&node.id, node.kind, &format!("p-{}", node.id));
            resource.properties = schema::canonicalize(node.kind, &node.properties);
            resource.properties_hash = ConfigHasher::new().hash_canonical(&resource.properties);
            resource.dependencies = op.dependencies.clone();
            resource.position = node.position;
            state.set_resource(resource);
        }
        state
    }

    fn full_stack() -> Deployment {
        deployment(&[
            (ResourceKind::Network, "n1", NETWORK),
            (ResourceKind::Role, "r1", ROLE),
            (ResourceKind::TaskDefinition, "t1", TASK),
            (ResourceKind::Service, "s1", SERVICE),
        ])
    }

    #[test]
    fn test_empty_state_creates_in_dependency_order() {
        let plan = plan(&full_stack(), &DeploymentState::new("demo")).unwrap();

        assert_eq!(
            summary(&plan),
            vec![
                (OperationKind::Create, "n1"),
                (OperationKind::Create, "r1"),
                (OperationKind::Create, "t1"),
                (OperationKind::Create, "s1"),
            ]
        );
        assert_eq!(plan.operations[3].dependencies, vec!["n1", "t1"]);
        assert!(plan.operations.iter().all(|op| op.prior.is_none()));
    }

    #[test]
    fn test_replan_after_apply_is_all_noop() {
        let stack = full_stack();
        let first = plan(&stack, &DeploymentState::new("demo")).unwrap();
        let state = applied_state(&stack, &first);

        let second = plan(&stack, &state).unwrap();

        assert!(!second.has_changes());
        assert_eq!(second.counts().noop, 4);
        assert_eq!(second.state_serial, state.serial);
    }

    #[test]
    fn test_dependent_deleted_before_dependency() {
        let stack = full_stack();
        let first = plan(&stack, &DeploymentState::new("demo")).unwrap();
        let state = applied_state(&stack, &first);

        let remaining = deployment(&[(ResourceKind::Network, "n1", NETWORK)]);
        let plan = plan(&remaining, &state).unwrap();

        assert_eq!(
            summary(&plan),
            vec![
                (OperationKind::Delete, "s1"),
                (OperationKind::NoOp, "n1"),
                (OperationKind::Delete, "t1"),
                (OperationKind::Delete, "r1"),
            ]
        );
        assert_eq!(plan.counts().delete, 3);
    }

    #[test]
    fn test_delete_of_dependent_precedes_update_of_dependency() {
        let stack = full_stack();
        let first = plan(&stack, &DeploymentState::new("demo")).unwrap();
        let state = applied_state(&stack, &first);

        let changed = deployment(&[
            (ResourceKind::Network, "n1", "cidr: 10.0.0.0/16"),
            (ResourceKind::Role, "r1", ROLE),
            (ResourceKind::TaskDefinition, "t1", TASK),
        ]);
        let plan = plan(&changed, &state).unwrap();

        assert_eq!(
            summary(&plan),
            vec![
                (OperationKind::NoOp, "r1"),
                (OperationKind::Delete, "s1"),
                (OperationKind::Update, "n1"),
                (OperationKind::NoOp, "t1"),
            ]
        );
        assert_eq!(plan.operations[2].changes.len(), 2);
    }

    #[test]
    fn test_dependent_of_updated_resource_is_deferred() {
        let stack = full_stack();
        let first = plan(&stack, &DeploymentState::new("demo")).unwrap();
        let state = applied_state(&stack, &first);

        let changed = deployment(&[
            (ResourceKind::Network, "n1", NETWORK),
            (ResourceKind::Role, "r1", ROLE),
            (
                ResourceKind::TaskDefinition,
                "t1",
                "cpu: 256\nmemory: 1024\ntask_role: { ref: r1.arn }\n\
                 containers: [{ name: web, image: nginx }]",
            ),
            (ResourceKind::Service, "s1", SERVICE),
        ]);
        let plan = plan(&changed, &state).unwrap();

        assert_eq!(
            summary(&plan),
            vec![
                (OperationKind::NoOp, "n1"),
                (OperationKind::NoOp, "r1"),
                (OperationKind::Update, "t1"),
                (OperationKind::Update, "s1"),
            ]
        );
        assert!(!plan.operations[2].deferred);
        assert!(plan.operations[3].deferred);
        assert!(plan.operations[3].changes.is_empty());
    }

    #[test]
    fn test_replaced_dependent_deleted_first() {
        let old = deployment(&[
            (ResourceKind::Network, "n1", NETWORK),
            (
                ResourceKind::LoadBalancer,
                "old-lb",
                "network: { ref: n1.id }\nlistener_port: 80",
            ),
        ]);
        let first = plan(&old, &DeploymentState::new("demo")).unwrap();
        let state = applied_state(&old, &first);

        let new = deployment(&[
            (
                ResourceKind::LoadBalancer,
                "new-lb",
                "network: { ref: n1.id }\nlistener_port: 443",
            ),
            (ResourceKind::Network, "n1", NETWORK),
        ]);
        let plan = plan(&new, &state).unwrap();

        assert_eq!(
            summary(&plan),
            vec![
                (OperationKind::Delete, "old-lb"),
                (OperationKind::NoOp, "n1"),
                (OperationKind::Create, "new-lb"),
            ]
        );
    }

    #[test]
    fn test_kind_change_rejected_before_planning() {
        let mut state = DeploymentState::new("demo");
        state.set_resource(ResourceState::new("n1", ResourceKind::Role, "role-1"));

        let err = plan(&deployment(&[(ResourceKind::Network, "n1", NETWORK)]), &state).unwrap_err();
        assert!(matches!(err, PlanError::KindChanged { .. }));
    }

    #[test]
    fn test_recorded_cycle_reported() {
        let mut state = DeploymentState::new("demo");
        let mut a = ResourceState::new("a", ResourceKind::Network, "net-a");
        a.dependencies = vec![String::from("b")];
        let mut b = ResourceState::new("b", ResourceKind::Network, "net-b");
        b.dependencies = vec![String::from("a")];
        state.set_resource(a);
        state.set_resource(b);

        let err = plan(&Deployment::new("demo"), &state).unwrap_err();
        let PlanError::CyclicDependency { cycle } = err else {
            panic!("expected a cycle");
        };
        assert_eq!(cycle.len(), 3);
    }
}
