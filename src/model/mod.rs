//! Resource node model.
//!
//! A [`Deployment`] holds the declared resources in declaration order. Each
//! node has a [`ResourceKind`], an id unique within the deployment, and a
//! property bag validated against the kind's schema at definition time.

mod deployment;
mod kind;
mod property;
pub mod schema;

pub use deployment::{Deployment, ResourceNode};
pub use kind::ResourceKind;
pub use property::{
    references_in, AttributeRef, Properties, PropertyValue, ResolvedProperties, REFERENCE_KEY,
};
