// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![forbid(unsafe_code)]               // Unsafe code is forbidden
#![warn(missing_docs)]                // All public items must be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::panic))]

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # stackplan
//!
//! A declarative provisioning engine: describe resources and the references
//! between them, and stackplan works out what to create, update and delete,
//! and in which order.
//!
//! ## Overview
//!
//! - Declare resources in `stackplan.yaml`, wiring them together with
//!   `{ ref: <id>.<attribute> }` markers
//! - Plan against recorded state and review every operation before it runs
//! - Apply sequentially with fail-fast semantics; state is saved after every
//!   operation, so a failed run can simply be planned again
//!
//! ## Pipeline
//!
//! 1. **Model**: the declaration becomes typed [`model::ResourceNode`]s,
//!    validated against per-kind schemas
//! 2. **Graph**: references become edges of a [`graph::DependencyGraph`];
//!    cycles are rejected before anything runs
//! 3. **Plan**: the [`planner::PlanSynthesizer`] diffs declared against
//!    recorded state and orders operations by dependency
//! 4. **Execute**: the [`planner::PlanExecutor`] issues each operation
//!    against a [`provider::ResourceProvider`]
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing, validation and hashing
//! - [`model`]: Resource kinds, property values and schemas
//! - [`graph`]: Reference resolution and topological ordering
//! - [`planner`]: Diff, plan synthesis and execution
//! - [`provider`]: Simulated and HTTP provider clients
//! - [`state`]: State storage backends (local, S3) and locking
//! - [`deployer`]: End-to-end orchestration, drift detection and refresh
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: my-app
//!   environment: prod
//!
//! resources:
//!   - id: vpc
//!     kind: network
//!     properties:
//!       is_default: true
//!   - id: my-app-lb
//!     kind: load_balancer
//!     properties:
//!       network: { ref: vpc.id }
//!       listener_port: 80
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod deployer;
pub mod error;
pub mod graph;
pub mod model;
pub mod planner;
pub mod provider;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, StackConfig};
pub use deployer::{Deployer, DriftReport};
pub use error::{Result, StackError};
pub use graph::{DependencyGraph, ReferenceResolver};
pub use model::{Deployment, ResourceKind};
pub use planner::{DeploymentPlan, ExecutionResult, PlanExecutor, PlanSynthesizer};
pub use provider::{HttpProvider, ResourceProvider, SimulatedProvider};
pub use state::{DeploymentState, LocalStateStore, S3StateStore, StateStore};
