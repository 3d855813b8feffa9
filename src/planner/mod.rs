//! Planning module for deployment operations.
//!
//! This module compares the declared deployment against recorded state,
//! synthesizes an ordered plan of create, update and delete operations, and
//! executes it against a provider.

mod diff;
mod executor;
mod plan;

pub use diff::{DiffEngine, DiffResult, DiffType, PropertyChange, ResourceDiff};
pub use executor::{ExecutionResult, OperationOutcome, OutcomeStatus, PlanExecutor};
pub use plan::{DeploymentPlan, OperationKind, PlanCounts, PlanSynthesizer, PlannedOperation};
