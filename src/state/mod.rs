//! State management.
//!
//! Records every provisioned resource with its provider id, output attributes,
//! canonical properties, and the dependencies it had when last applied.

mod local;
mod lock;
mod s3;
mod store;
mod types;

pub use local::{LocalStateStore, DEFAULT_STATE_DIR};
pub use lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS};
pub use s3::S3StateStore;
#[cfg(test)]
pub use store::MockStateStore;
pub use store::StateStore;
pub use types::{
    DeploymentHistoryEntry, DeploymentOperation, DeploymentState, ResourceState, STATE_VERSION,
};
