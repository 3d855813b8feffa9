//! Provider clients.
//!
//! The executor only sees [`ResourceProvider`]. [`SimulatedProvider`] backs
//! tests and local runs; [`HttpProvider`] talks to an external provisioning
//! gateway.

mod api;
mod http;
mod simulated;

#[cfg(test)]
pub use api::MockResourceProvider;
pub use api::{Attributes, ProvisionedResource, ResourceProvider};
pub use http::{HttpProvider, DEFAULT_TIMEOUT_SECS, TOKEN_ENV_VAR};
pub use simulated::{CallKind, ProviderCall, SimulatedProvider};
