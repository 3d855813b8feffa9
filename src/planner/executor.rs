//! Plan executor for applying deployment plans.
//!
//! Operations run strictly one at a time in plan order. State is saved after
//! every successful operation, so an interrupted run leaves exactly the
//! completed prefix recorded. The first failure stops the run and every
//! remaining operation is reported as skipped.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ApplyError, PlanError, ProviderError, ProviderOperationError, Result, StackError};
use crate::graph::substitute;
use crate::model::{references_in, AttributeRef, Properties, ResolvedProperties};
use crate::provider::{Attributes, ResourceProvider};
use crate::state::{
    DeploymentHistoryEntry, DeploymentOperation, DeploymentState, ResourceState, StateStore,
};

use super::plan::{DeploymentPlan, OperationKind, PlannedOperation};

/// Executor for deployment plans.
pub struct PlanExecutor<'a> {
    /// Provider operations are issued against.
    provider: &'a dyn ResourceProvider,
    /// Store the state is saved to after each operation.
    store: &'a dyn StateStore,
    /// Checked between operations.
    cancellation: CancellationToken,
    /// Recorded in the history entry.
    operation: DeploymentOperation,
}

/// Status of a single operation after execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    /// The provider call succeeded and state was saved.
    Succeeded,
    /// No-op; nothing was called.
    Unchanged,
    /// The operation failed.
    Failed,
    /// Never attempted.
    Skipped,
}

/// Result of a single operation.
#[derive(Debug, Clone, Serialize)]
pub struct OperationOutcome {
    /// Position in the plan.
    pub index: usize,
    /// Resource id.
    pub node_id: String,
    /// Operation kind.
    pub operation: OperationKind,
    /// Outcome.
    pub status: OutcomeStatus,
    /// Provider id after the operation, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    /// Error message, for failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of executing a whole plan.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    /// One outcome per plan operation, in plan order.
    pub outcomes: Vec<OperationOutcome>,
    /// The operation that stopped the run, if any.
    pub failure: Option<ProviderOperationError>,
    /// Whether the run stopped on cancellation.
    pub cancelled: bool,
}

impl<'a> PlanExecutor<'a> {
    /// Creates a new plan executor.
    #[must_use]
    pub fn new(provider: &'a dyn ResourceProvider, store: &'a dyn StateStore) -> Self {
        Self {
            provider,
            store,
            cancellation: CancellationToken::new(),
            operation: DeploymentOperation::Apply,
        }
    }

    /// Sets the token checked between operations.
    #[must_use]
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Sets the operation recorded in history.
    #[must_use]
    pub const fn with_operation(mut self, operation: DeploymentOperation) -> Self {
        self.operation = operation;
        self
    }

    /// Executes a plan against `state`, saving after each operation.
    ///
    /// Provider failures do not surface as `Err`; they are reported in the
    /// returned [`ExecutionResult`]. Use [`ExecutionResult::into_result`] to
    /// turn a partial run into an error.
    ///
    /// # Errors
    ///
    /// - [`PlanError::StalePlan`] if `state` changed since the plan was made
    /// - any state store error; a run that cannot record progress stops
    pub async fn execute(
        &self,
        plan: &DeploymentPlan,
        state: &mut DeploymentState,
    ) -> Result<ExecutionResult> {
        if plan.state_serial != state.serial {
            return Err(PlanError::StalePlan {
                plan_serial: plan.state_serial,
                state_serial: state.serial,
            }
            .into());
        }

        info!(
            "Executing plan with {} operations against {}",
            plan.len(),
            self.provider.provider_type()
        );

        let mut outcomes = Vec::with_capacity(plan.len());
        let mut failure: Option<ProviderOperationError> = None;
        let mut cancelled = false;

        for (index, op) in plan.operations.iter().enumerate() {
            if failure.is_none() && !cancelled && self.cancellation.is_cancelled() {
                warn!("Cancelled before operation {index}: {}", op.description());
                cancelled = true;
            }

            if failure.is_some() || cancelled {
                outcomes.push(OperationOutcome::new(index, op, OutcomeStatus::Skipped));
                continue;
            }

            if op.kind == OperationKind::NoOp {
                debug!("Skipping unchanged resource {}", op.node_id);
                outcomes.push(OperationOutcome::new(index, op, OutcomeStatus::Unchanged));
                continue;
            }

            info!("[{}/{}] {}", index + 1, plan.len(), op.description());

            match self.apply_operation(op, state).await {
                Ok(Applied::Changed(provider_id)) => {
                    self.store.save(state).await?;
                    outcomes.push(OperationOutcome {
                        provider_id,
                        ..OperationOutcome::new(index, op, OutcomeStatus::Succeeded)
                    });
                }
                Ok(Applied::Unchanged) => {
                    outcomes.push(OperationOutcome::new(index, op, OutcomeStatus::Unchanged));
                }
                Err(message) => {
                    error!("Operation {index} failed: {message}");
                    outcomes.push(OperationOutcome {
                        error: Some(message.clone()),
                        ..OperationOutcome::new(index, op, OutcomeStatus::Failed)
                    });
                    failure = Some(ProviderOperationError {
                        index,
                        node_id: op.node_id.clone(),
                        operation: op.kind,
                        message,
                    });
                }
            }
        }

        let result = ExecutionResult {
            outcomes,
            failure,
            cancelled,
        };

        let touched: Vec<String> = result
            .outcomes
            .iter()
            .filter(|o| matches!(o.status, OutcomeStatus::Succeeded | OutcomeStatus::Failed))
            .map(|o| o.node_id.clone())
            .collect();
        let entry = match (&result.failure, result.cancelled) {
            (Some(failure), _) => DeploymentHistoryEntry::failed(
                self.operation,
                &plan.config_hash,
                touched,
                &failure.to_string(),
            ),
            (None, true) => DeploymentHistoryEntry::failed(
                self.operation,
                &plan.config_hash,
                touched,
                "cancelled",
            ),
            (None, false) => DeploymentHistoryEntry::new(self.operation, &plan.config_hash, touched),
        };
        state.add_history(entry);
        if result.success() {
            state.set_config_hash(&plan.config_hash);
        }
        self.store.save(state).await?;

        info!(
            "Plan finished: {} completed, {} unchanged, {} failed, {} skipped",
            result.completed(),
            result.unchanged(),
            result.failed(),
            result.skipped()
        );

        Ok(result)
    }

    /// Issues one provider call and records its effect in `state`.
    ///
    /// Returns the failure message if the operation failed.
    async fn apply_operation(
        &self,
        op: &PlannedOperation,
        state: &mut DeploymentState,
    ) -> std::result::Result<Applied, String> {
        match op.kind {
            OperationKind::Create => {
                let (resolved, references) = resolve(op, state)?;
                let created = self
                    .provider
                    .create_resource(op.resource_kind, &resolved)
                    .await
                    .map_err(|e| e.to_string())?;

                let mut resource =
                    ResourceState::new(&op.node_id, op.resource_kind, &created.provider_id);
                record(&mut resource, op, created.attributes, references);
                state.set_resource(resource);

                info!("Created {} '{}' ({})", op.resource_kind, op.node_id, created.provider_id);
                Ok(Applied::Changed(Some(created.provider_id)))
            }
            OperationKind::Update => {
                let mut resource = op
                    .prior
                    .clone()
                    .ok_or_else(|| format!("no recorded state for '{}'", op.node_id))?;
                let (resolved, references) = resolve(op, state)?;
                if op.deferred && references == resource.resolved_references {
                    debug!("References of '{}' resolved unchanged", op.node_id);
                    return Ok(Applied::Unchanged);
                }

                let attributes = self
                    .provider
                    .update_resource(&resource.provider_id, op.resource_kind, &resolved)
                    .await
                    .map_err(|e| e.to_string())?;

                record(&mut resource, op, attributes, references);
                let provider_id = resource.provider_id.clone();
                state.set_resource(resource);

                info!("Updated {} '{}' ({provider_id})", op.resource_kind, op.node_id);
                Ok(Applied::Changed(Some(provider_id)))
            }
            OperationKind::Delete => {
                let provider_id = op
                    .provider_id()
                    .ok_or_else(|| format!("no recorded state for '{}'", op.node_id))?;

                match self.provider.delete_resource(provider_id).await {
                    Ok(()) => info!("Deleted {} '{}' ({provider_id})", op.resource_kind, op.node_id),
                    Err(StackError::Provider(ProviderError::NotFound { .. })) => {
                        warn!("Resource '{}' ({provider_id}) was already gone", op.node_id);
                    }
                    Err(e) => return Err(e.to_string()),
                }

                state.remove_resource(&op.node_id);
                Ok(Applied::Changed(None))
            }
            OperationKind::NoOp => Ok(Applied::Unchanged),
        }
    }
}

/// Outcome of a single successful operation.
enum Applied {
    /// The provider was called; carries the provider id, if any remains.
    Changed(Option<String>),
    /// Nothing needed doing.
    Unchanged,
}

/// Substitutes references with attributes recorded by earlier operations.
///
/// Also returns the value each reference resolved to, keyed by marker.
fn resolve(
    op: &PlannedOperation,
    state: &DeploymentState,
) -> std::result::Result<(ResolvedProperties, BTreeMap<String, String>), String> {
    let empty = Properties::new();
    let properties = op.properties.as_ref().unwrap_or(&empty);
    let lookup = |marker: &AttributeRef| {
        state
            .get_resource(&marker.node)
            .and_then(|r| r.attribute(&marker.attribute))
            .map(ToString::to_string)
    };

    let resolved = substitute(properties, &lookup)
        .map_err(|marker| format!("reference {marker} has no recorded value"))?;
    let references = references_in(properties)
        .into_iter()
        .filter_map(|(_, marker)| lookup(&marker).map(|value| (marker.to_string(), value)))
        .collect();

    Ok((resolved, references))
}

fn record(
    resource: &mut ResourceState,
    op: &PlannedOperation,
    mut attributes: Attributes,
    references: BTreeMap<String, String>,
) {
    attributes
        .entry(String::from("id"))
        .or_insert_with(|| resource.provider_id.clone());

    resource.properties = op.properties.clone().unwrap_or_default();
    resource.properties_hash = op.properties_hash.clone().unwrap_or_default();
    resource.attributes = attributes;
    resource.dependencies.clone_from(&op.dependencies);
    resource.resolved_references = references;
    resource.position = op.position;
    resource.updated_at = Utc::now();
}

impl OperationOutcome {
    fn new(index: usize, op: &PlannedOperation, status: OutcomeStatus) -> Self {
        Self {
            index,
            node_id: op.node_id.clone(),
            operation: op.kind,
            status,
            provider_id: op.provider_id().map(ToString::to_string),
            error: None,
        }
    }
}

impl ExecutionResult {
    fn count(&self, status: OutcomeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    /// Operations that succeeded.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.count(OutcomeStatus::Succeeded)
    }

    /// No-op operations.
    #[must_use]
    pub fn unchanged(&self) -> usize {
        self.count(OutcomeStatus::Unchanged)
    }

    /// Operations that failed; zero or one.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(OutcomeStatus::Failed)
    }

    /// Operations never attempted.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(OutcomeStatus::Skipped)
    }

    /// Returns true if every operation ran.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.failure.is_none() && !self.cancelled
    }

    /// Converts a partial run into an [`ApplyError`].
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError::PartialFailure`] or [`ApplyError::Cancelled`]
    /// unless every operation ran.
    pub fn into_result(self) -> Result<Self> {
        let completed = self.completed();
        let skipped = self.skipped();

        match (&self.failure, self.cancelled) {
            (Some(failure), _) => Err(ApplyError::PartialFailure {
                failure: failure.clone(),
                completed,
                skipped,
            }
            .into()),
            (None, true) => Err(ApplyError::Cancelled { completed, skipped }.into()),
            (None, false) => Ok(self),
        }
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Succeeded => "succeeded",
            Self::Unchanged => "unchanged",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StateError;
    use crate::graph::{DependencyGraph, ReferenceResolver};
    use crate::model::{Deployment, ResourceKind};
    use crate::planner::PlanSynthesizer;
    use crate::provider::{MockResourceProvider, ProvisionedResource, SimulatedProvider};
    use crate::state::{LocalStateStore, MockStateStore};
    use mockall::Sequence;
    use tempfile::TempDir;

    fn stack() -> Deployment {
        stack_with("is_default: true", 512)
    }

    fn stack_with(network: &str, task_memory: i64) -> Deployment {
        let task = format!(
            "cpu: 256\nmemory: {task_memory}\ntask_role: {{ ref: r1.arn }}\n\
             containers: [{{ name: web, image: nginx }}]"
        );
        let mut deployment = Deployment::new("demo");
        for (kind, id, yaml) in [
            (ResourceKind::Network, "n1", network),
            (
                ResourceKind::Role,
                "r1",
                "role_name: AppRole\nassumed_by: ecs-tasks.amazonaws.com",
            ),
            (ResourceKind::TaskDefinition, "t1", task.as_str()),
            (
                ResourceKind::Service,
                "s1",
                "service_name: web\nnetwork: { ref: n1.id }\ntask_definition: { ref: t1.arn }",
            ),
        ] {
            deployment
                .define_resource(kind, id, serde_yaml::from_str(yaml).unwrap())
                .unwrap();
        }
        deployment
    }

    fn plan(deployment: &Deployment, state: &DeploymentState) -> DeploymentPlan {
        let references = ReferenceResolver::new().resolve(deployment).unwrap();
        let graph = DependencyGraph::build(deployment, &references).unwrap();
        PlanSynthesizer::new()
            .synthesize(deployment, &graph, state, "config-hash")
            .unwrap()
    }

    fn local_store() -> (LocalStateStore, TempDir) {
        let temp = TempDir::new().unwrap();
        (LocalStateStore::new(temp.path(), "demo"), temp)
    }

    fn statuses(result: &ExecutionResult) -> Vec<OutcomeStatus> {
        result.outcomes.iter().map(|o| o.status).collect()
    }

    #[tokio::test]
    async fn test_full_apply_resolves_references_from_state() {
        let provider = SimulatedProvider::new();
        let (store, _temp) = local_store();
        let mut state = DeploymentState::new("demo");
        let plan = plan(&stack(), &state);

        let result = PlanExecutor::new(&provider, &store)
            .execute(&plan, &mut state)
            .await
            .unwrap();

        assert!(result.success());
        assert_eq!(result.completed(), 4);
        assert_eq!(state.config_hash, "config-hash");

        let role_arn = state.get_resource("r1").unwrap().attribute("arn").unwrap();
        let task = state.get_resource("t1").unwrap();
        let sent = provider.properties_of(&task.provider_id).await.unwrap();
        assert_eq!(sent["task_role"], role_arn);
        assert_eq!(task.dependencies, vec!["r1"]);

        let saved = store.load().await.unwrap().unwrap();
        assert_eq!(saved, state);
        assert!(saved.history.last().unwrap().success);
    }

    #[tokio::test]
    async fn test_failure_stops_run_and_keeps_completed_prefix() {
        let provider = SimulatedProvider::new().fail_on_mutation(3);
        let (store, _temp) = local_store();
        let mut state = DeploymentState::new("demo");
        let plan = plan(&stack(), &state);

        let result = PlanExecutor::new(&provider, &store)
            .execute(&plan, &mut state)
            .await
            .unwrap();

        assert_eq!(
            statuses(&result),
            vec![
                OutcomeStatus::Succeeded,
                OutcomeStatus::Succeeded,
                OutcomeStatus::Failed,
                OutcomeStatus::Skipped,
            ]
        );
        let failure = result.failure.clone().unwrap();
        assert_eq!(failure.index, 2);
        assert_eq!(failure.node_id, "t1");
        assert_eq!(provider.mutation_count().await, 3);

        let saved = store.load().await.unwrap().unwrap();
        assert_eq!(saved.resource_ids(), vec!["n1", "r1"]);
        assert!(saved.config_hash.is_empty());
        assert!(!saved.history.last().unwrap().success);

        let err = result.into_result().unwrap_err();
        assert!(matches!(
            err,
            StackError::Apply(ApplyError::PartialFailure { completed: 2, skipped: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_skips_everything() {
        let provider = SimulatedProvider::new();
        let (store, _temp) = local_store();
        let mut state = DeploymentState::new("demo");
        let plan = plan(&stack(), &state);
        let token = CancellationToken::new();
        token.cancel();

        let result = PlanExecutor::new(&provider, &store)
            .with_cancellation(token)
            .execute(&plan, &mut state)
            .await
            .unwrap();

        assert!(result.cancelled);
        assert_eq!(result.skipped(), 4);
        assert!(provider.calls().await.is_empty());
        assert!(matches!(
            result.into_result().unwrap_err(),
            StackError::Apply(ApplyError::Cancelled { completed: 0, skipped: 4 })
        ));
    }

    #[tokio::test]
    async fn test_moved_attribute_reaches_dependent() {
        let provider = SimulatedProvider::new();
        let (store, _temp) = local_store();
        let mut state = DeploymentState::new("demo");
        let first = plan(&stack(), &state);
        PlanExecutor::new(&provider, &store)
            .execute(&first, &mut state)
            .await
            .unwrap();
        let old_arn = state.get_resource("t1").unwrap().attribute("arn").unwrap().to_string();

        let resized = stack_with("is_default: true", 1024);
        let second = plan(&resized, &state);
        let result = PlanExecutor::new(&provider, &store)
            .execute(&second, &mut state)
            .await
            .unwrap();

        assert!(result.success());
        let new_arn = state.get_resource("t1").unwrap().attribute("arn").unwrap();
        assert_ne!(new_arn, old_arn);

        let service = state.get_resource("s1").unwrap();
        let sent = provider.properties_of(&service.provider_id).await.unwrap();
        assert_eq!(sent["task_definition"], new_arn);
        assert_eq!(service.resolved_references["t1.arn"], new_arn);

        assert!(!plan(&resized, &state).has_changes());
    }

    #[tokio::test]
    async fn test_deferred_update_skipped_when_references_unchanged() {
        let provider = SimulatedProvider::new();
        let (store, _temp) = local_store();
        let mut state = DeploymentState::new("demo");
        let first = plan(&stack(), &state);
        PlanExecutor::new(&provider, &store)
            .execute(&first, &mut state)
            .await
            .unwrap();

        let widened = stack_with("cidr: 10.0.0.0/16", 512);
        let second = plan(&widened, &state);
        assert!(second.operations[3].deferred);
        let before = provider.mutation_count().await;

        let result = PlanExecutor::new(&provider, &store)
            .execute(&second, &mut state)
            .await
            .unwrap();

        assert_eq!(
            statuses(&result),
            vec![
                OutcomeStatus::Succeeded,
                OutcomeStatus::Unchanged,
                OutcomeStatus::Unchanged,
                OutcomeStatus::Unchanged,
            ]
        );
        assert_eq!(provider.mutation_count().await, before + 1);
        assert!(!plan(&widened, &state).has_changes());
    }

    #[tokio::test]
    async fn test_cancellation_between_operations_keeps_completed_resource() {
        let (store, _temp) = local_store();
        let mut state = DeploymentState::new("demo");
        let plan = plan(&stack(), &state);
        let token = CancellationToken::new();

        let mut provider = MockResourceProvider::new();
        provider.expect_provider_type().return_const("mock");
        let cancel = token.clone();
        provider
            .expect_create_resource()
            .times(1)
            .returning(move |_, _| {
                cancel.cancel();
                Ok(ProvisionedResource {
                    provider_id: String::from("vpc-1"),
                    attributes: Attributes::new(),
                })
            });

        let result = PlanExecutor::new(&provider, &store)
            .with_cancellation(token)
            .execute(&plan, &mut state)
            .await
            .unwrap();

        assert!(result.cancelled);
        assert_eq!(
            statuses(&result),
            vec![
                OutcomeStatus::Succeeded,
                OutcomeStatus::Skipped,
                OutcomeStatus::Skipped,
                OutcomeStatus::Skipped,
            ]
        );

        let saved = store.load().await.unwrap().unwrap();
        assert_eq!(saved.resource_ids(), vec!["n1"]);
        assert_eq!(saved.get_resource("n1").unwrap().provider_id, "vpc-1");
        assert!(!saved.history.last().unwrap().success);
    }

    #[tokio::test]
    async fn test_stale_plan_rejected() {
        let provider = SimulatedProvider::new();
        let (store, _temp) = local_store();
        let mut state = DeploymentState::new("demo");
        let plan = plan(&stack(), &state);
        state.set_resource(ResourceState::new("other", ResourceKind::Network, "net-9"));

        let err = PlanExecutor::new(&provider, &store)
            .execute(&plan, &mut state)
            .await
            .unwrap_err();

        assert!(matches!(err, StackError::Plan(PlanError::StalePlan { .. })));
        assert!(provider.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_delete_of_vanished_resource_succeeds() {
        let mut state = DeploymentState::new("demo");
        state.set_resource(ResourceState::new("old", ResourceKind::Network, "net-1"));
        let plan = plan(&Deployment::new("demo"), &state);

        let mut provider = MockResourceProvider::new();
        provider.expect_provider_type().return_const("mock");
        provider
            .expect_delete_resource()
            .withf(|id| id == "net-1")
            .times(1)
            .returning(|id| {
                Err(ProviderError::NotFound {
                    provider_id: id.to_string(),
                }
                .into())
            });
        let mut store = MockStateStore::new();
        store.expect_save().times(2).returning(|_| Ok(()));

        let result = PlanExecutor::new(&provider, &store)
            .execute(&plan, &mut state)
            .await
            .unwrap();

        assert!(result.success());
        assert!(state.is_empty());
    }

    #[tokio::test]
    async fn test_operations_issued_in_plan_order() {
        let mut deployment = Deployment::new("demo");
        deployment
            .define_resource(
                ResourceKind::LoadBalancer,
                "lb",
                serde_yaml::from_str("network: { ref: vpc.id }\nlistener_port: 80").unwrap(),
            )
            .unwrap();
        deployment
            .define_resource(
                ResourceKind::Network,
                "vpc",
                serde_yaml::from_str("cidr: 10.0.0.0/16").unwrap(),
            )
            .unwrap();
        let mut state = DeploymentState::new("demo");
        let plan = plan(&deployment, &state);

        let mut seq = Sequence::new();
        let mut provider = MockResourceProvider::new();
        provider.expect_provider_type().return_const("mock");
        provider
            .expect_create_resource()
            .withf(|kind, _| *kind == ResourceKind::Network)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| {
                Ok(ProvisionedResource {
                    provider_id: String::from("vpc-123"),
                    attributes: Attributes::new(),
                })
            });
        provider
            .expect_create_resource()
            .withf(|kind, properties| {
                *kind == ResourceKind::LoadBalancer && properties["network"] == "vpc-123"
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| {
                Ok(ProvisionedResource {
                    provider_id: String::from("lb-1"),
                    attributes: Attributes::new(),
                })
            });
        let mut store = MockStateStore::new();
        store.expect_save().times(3).returning(|_| Ok(()));

        let result = PlanExecutor::new(&provider, &store)
            .execute(&plan, &mut state)
            .await
            .unwrap();

        assert!(result.success());
        assert_eq!(state.get_resource("vpc").unwrap().attribute("id"), Some("vpc-123"));
    }

    #[tokio::test]
    async fn test_state_save_failure_stops_run() {
        let mut state = DeploymentState::new("demo");
        let plan = plan(&stack(), &state);

        let mut provider = MockResourceProvider::new();
        provider.expect_provider_type().return_const("mock");
        provider.expect_create_resource().times(1).returning(|_, _| {
            Ok(ProvisionedResource {
                provider_id: String::from("vpc-1"),
                attributes: Attributes::new(),
            })
        });
        let mut store = MockStateStore::new();
        store
            .expect_save()
            .times(1)
            .returning(|_| Err(StateError::write("disk full").into()));

        let err = PlanExecutor::new(&provider, &store)
            .execute(&plan, &mut state)
            .await
            .unwrap_err();

        assert!(matches!(err, StackError::State(StateError::WriteFailed { .. })));
    }
}
