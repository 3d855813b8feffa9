//! Deployer orchestrating a full run.
//!
//! A run loads the declaration, resolves references, builds the graph,
//! synthesizes a plan against recorded state and executes it under the state
//! lock. Drift detection and refresh compare recorded state with what the
//! provider reports.

use std::collections::BTreeSet;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ConfigHasher, StackConfig};
use crate::error::Result;
use crate::graph::{DependencyGraph, ReferenceResolver};
use crate::model::Deployment;
use crate::planner::{DeploymentPlan, ExecutionResult, PlanExecutor, PlanSynthesizer};
use crate::provider::ResourceProvider;
use crate::state::{
    generate_holder_id, DeploymentHistoryEntry, DeploymentOperation, DeploymentState, StateStore,
};

/// Orchestrates planning and execution for one stack.
pub struct Deployer<'a> {
    /// Stack declaration.
    config: &'a StackConfig,
    /// State store.
    store: &'a dyn StateStore,
    /// Provider.
    provider: &'a dyn ResourceProvider,
    /// Checked between operations.
    cancellation: CancellationToken,
    /// Configuration hasher.
    hasher: ConfigHasher,
    /// Plan synthesizer.
    synthesizer: PlanSynthesizer,
}

/// Differences between recorded state and the provider.
#[derive(Debug, Default, Serialize)]
pub struct DriftReport {
    /// Recorded resources the provider no longer has.
    pub missing: Vec<String>,
    /// Recorded resources whose attributes changed out of band.
    pub changed: Vec<AttributeDrift>,
    /// Number of recorded resources checked.
    pub total_recorded: usize,
}

/// An attribute whose provider value differs from the recorded one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributeDrift {
    /// Resource id.
    pub id: String,
    /// Attribute name.
    pub attribute: String,
    /// Recorded value.
    pub recorded: Option<String>,
    /// Value the provider reports.
    pub actual: Option<String>,
}

impl<'a> Deployer<'a> {
    /// Creates a new deployer.
    #[must_use]
    pub fn new(
        config: &'a StackConfig,
        store: &'a dyn StateStore,
        provider: &'a dyn ResourceProvider,
    ) -> Self {
        Self {
            config,
            store,
            provider,
            cancellation: CancellationToken::new(),
            hasher: ConfigHasher::new(),
            synthesizer: PlanSynthesizer::new(),
        }
    }

    /// Sets the token checked between operations.
    #[must_use]
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Builds the deployment and its dependency graph from the declaration.
    ///
    /// # Errors
    ///
    /// Returns any planning error: schema, reference or cycle.
    pub fn build_deployment(&self) -> Result<(Deployment, DependencyGraph)> {
        let deployment = Deployment::from_config(self.config)?;
        let references = ReferenceResolver::new().resolve(&deployment)?;
        let graph = DependencyGraph::build(&deployment, &references)?;

        debug!(
            "Built deployment {} with {} resources and {} references",
            deployment.id(),
            deployment.len(),
            references.len()
        );

        Ok((deployment, graph))
    }

    /// Loads recorded state, or an empty state if none exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn load_state(&self) -> Result<DeploymentState> {
        let deployment_id = self.config.deployment_id();
        let state = self.store.load().await?;

        Ok(state.unwrap_or_else(|| {
            debug!("No recorded state for {deployment_id}, starting empty");
            DeploymentState::new(&deployment_id)
        }))
    }

    /// Synthesizes the plan converging recorded state to the declaration.
    ///
    /// # Errors
    ///
    /// Returns a planning error before any provider call is made.
    pub async fn plan(&self) -> Result<DeploymentPlan> {
        info!(
            "Planning {}/{}",
            self.config.project.name, self.config.project.environment
        );

        let (deployment, graph) = self.build_deployment()?;
        let state = self.load_state().await?;
        let config_hash = self.hasher.hash_config(self.config);

        Ok(self
            .synthesizer
            .synthesize(&deployment, &graph, &state, &config_hash)?)
    }

    /// Synthesizes a plan deleting every recorded resource.
    ///
    /// # Errors
    ///
    /// Returns an error if state cannot be read or recorded dependencies
    /// form a cycle.
    pub async fn plan_destroy(&self) -> Result<DeploymentPlan> {
        info!("Planning destroy of {}", self.config.deployment_id());

        let deployment = Deployment::new(self.config.deployment_id());
        let graph = DependencyGraph::build(&deployment, &BTreeSet::new())?;
        let state = self.load_state().await?;

        Ok(self
            .synthesizer
            .synthesize(&deployment, &graph, &state, "")?)
    }

    /// Executes a plan under the state lock.
    ///
    /// State is reloaded after the lock is taken, so a plan made against
    /// state another run has since changed is rejected as stale. The lock is
    /// released whether or not execution succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be taken, the plan is stale, or
    /// state cannot be saved. Provider failures are reported in the result.
    pub async fn execute_plan(
        &self,
        plan: &DeploymentPlan,
        operation: DeploymentOperation,
    ) -> Result<ExecutionResult> {
        let lock = self
            .store
            .acquire_lock(&generate_holder_id(), &operation.to_string())
            .await?;

        let result = self.execute_locked(plan, operation).await;

        if let Err(e) = self.store.release_lock(&lock.lock_id).await {
            warn!("Failed to release state lock {}: {e}", lock.lock_id);
        }

        result
    }

    async fn execute_locked(
        &self,
        plan: &DeploymentPlan,
        operation: DeploymentOperation,
    ) -> Result<ExecutionResult> {
        let mut state = self.load_state().await?;

        PlanExecutor::new(self.provider, self.store)
            .with_cancellation(self.cancellation.clone())
            .with_operation(operation)
            .execute(plan, &mut state)
            .await
    }

    /// Plans and executes the declaration.
    ///
    /// # Errors
    ///
    /// See [`Self::plan`] and [`Self::execute_plan`].
    pub async fn apply(&self) -> Result<ExecutionResult> {
        let plan = self.plan().await?;
        info!("Plan: {}", plan.counts());
        self.execute_plan(&plan, DeploymentOperation::Apply).await
    }

    /// Deletes every recorded resource, dependents first.
    ///
    /// # Errors
    ///
    /// See [`Self::plan_destroy`] and [`Self::execute_plan`].
    pub async fn destroy(&self) -> Result<ExecutionResult> {
        let plan = self.plan_destroy().await?;
        info!("Destroy plan: {}", plan.counts());
        self.execute_plan(&plan, DeploymentOperation::Destroy).await
    }

    /// Compares recorded state with what the provider reports.
    ///
    /// # Errors
    ///
    /// Returns an error if state cannot be read or a provider read fails.
    pub async fn check_drift(&self) -> Result<DriftReport> {
        info!("Checking for drift in {}", self.config.deployment_id());

        let state = self.load_state().await?;
        let mut report = DriftReport {
            total_recorded: state.resources.len(),
            ..DriftReport::default()
        };

        for resource in state.resources.values() {
            match self.provider.read_resource(&resource.provider_id).await? {
                None => {
                    warn!("Resource '{}' ({}) no longer exists", resource.id, resource.provider_id);
                    report.missing.push(resource.id.clone());
                }
                Some(actual) => {
                    let names: BTreeSet<&String> =
                        resource.attributes.keys().chain(actual.attributes.keys()).collect();
                    for name in names {
                        let recorded = resource.attributes.get(name);
                        let reported = actual.attributes.get(name);
                        if recorded != reported {
                            report.changed.push(AttributeDrift {
                                id: resource.id.clone(),
                                attribute: name.clone(),
                                recorded: recorded.cloned(),
                                actual: reported.cloned(),
                            });
                        }
                    }
                }
            }
        }

        Ok(report)
    }

    /// Reconciles recorded state with the provider under the state lock.
    ///
    /// Vanished resources are dropped from state so the next plan recreates
    /// them; changed attributes are overwritten with the provider's values.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be taken or state cannot be saved.
    pub async fn refresh(&self) -> Result<DriftReport> {
        let lock = self
            .store
            .acquire_lock(
                &generate_holder_id(),
                &DeploymentOperation::Refresh.to_string(),
            )
            .await?;

        let result = self.refresh_locked().await;

        if let Err(e) = self.store.release_lock(&lock.lock_id).await {
            warn!("Failed to release state lock {}: {e}", lock.lock_id);
        }

        result
    }

    async fn refresh_locked(&self) -> Result<DriftReport> {
        let report = self.check_drift().await?;
        if !report.has_drift() {
            info!("State matches the provider, nothing to refresh");
            return Ok(report);
        }

        let mut state = self.load_state().await?;

        for id in &report.missing {
            state.remove_resource(id);
        }
        for drift in &report.changed {
            if let Some(mut resource) = state.get_resource(&drift.id).cloned() {
                match &drift.actual {
                    Some(value) => {
                        resource.attributes.insert(drift.attribute.clone(), value.clone());
                    }
                    None => {
                        resource.attributes.remove(&drift.attribute);
                    }
                }
                state.set_resource(resource);
            }
        }

        let touched = report
            .missing
            .iter()
            .chain(report.changed.iter().map(|d| &d.id))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let config_hash = state.config_hash.clone();
        state.add_history(DeploymentHistoryEntry::new(
            DeploymentOperation::Refresh,
            &config_hash,
            touched,
        ));

        info!("Saving refreshed state for {}", state.deployment_id);
        self.store.save(&state).await?;

        Ok(report)
    }
}

impl DriftReport {
    /// Returns true if any recorded resource drifted.
    #[must_use]
    pub fn has_drift(&self) -> bool {
        !self.missing.is_empty() || !self.changed.is_empty()
    }

    /// Number of distinct resources that drifted.
    #[must_use]
    pub fn drifted_count(&self) -> usize {
        self.missing
            .iter()
            .chain(self.changed.iter().map(|d| &d.id))
            .collect::<BTreeSet<_>>()
            .len()
    }
}

impl std::fmt::Display for DriftReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.has_drift() {
            return write!(
                f,
                "No drift detected across {} recorded resources",
                self.total_recorded
            );
        }

        writeln!(f, "Drift detected:")?;
        for id in &self.missing {
            writeln!(f, "  - {id}: missing")?;
        }
        for drift in &self.changed {
            writeln!(
                f,
                "  - {}.{}: {} -> {}",
                drift.id,
                drift.attribute,
                drift.recorded.as_deref().unwrap_or("(none)"),
                drift.actual.as_deref().unwrap_or("(none)")
            )?;
        }
        Ok(())
    }
}
