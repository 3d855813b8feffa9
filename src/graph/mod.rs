//! Reference resolution and dependency graph construction.
//!
//! The resolver turns reference markers into edges; the graph builder rejects
//! cycles and computes a deterministic topological order.

mod dag;
mod resolver;

pub use dag::DependencyGraph;
pub(crate) use dag::{find_cycle, stable_order};
pub use resolver::{substitute, Reference, ReferenceResolver};
