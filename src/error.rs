//! Error types for the stackplan provisioning engine.
//!
//! This module provides the error hierarchy for every stage of a run:
//! configuration, planning (model, references, graph, diff), provider calls,
//! state management, and plan execution.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::planner::OperationKind;

/// The main error type for the stackplan engine.
#[derive(Debug, Error)]
pub enum StackError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Planning errors (raised before any provider call).
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Provider API errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Plan execution did not fully succeed.
    #[error("Apply error: {0}")]
    Apply(#[from] ApplyError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },
}

/// A single schema violation on a resource property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    /// Property path, e.g. `containers[0].image`.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

/// Planning errors.
///
/// Every variant is raised while building the model, resolving references,
/// ordering the graph, or synthesizing the plan. None of them can occur after
/// the first provider call.
#[derive(Debug, Error)]
pub enum PlanError {
    /// A resource id was declared twice.
    #[error("Duplicate resource id: {id}")]
    DuplicateId {
        /// The duplicated id.
        id: String,
    },

    /// A resource id does not follow the naming rules.
    #[error("Invalid resource id '{id}': {reason}")]
    InvalidId {
        /// The offending id.
        id: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Properties do not match the kind's schema.
    #[error(
        "Resource '{id}' ({kind}) failed schema validation: {}",
        join_violations(.violations)
    )]
    SchemaValidation {
        /// Resource id.
        id: String,
        /// Resource kind.
        kind: String,
        /// Every violated field.
        violations: Vec<FieldViolation>,
    },

    /// A reference names a resource that is not declared.
    #[error("Resource '{source_id}' references unknown resource '{target}' at {path}")]
    UnknownReference {
        /// Resource holding the reference.
        source_id: String,
        /// The undefined target id.
        target: String,
        /// Property path of the reference marker.
        path: String,
    },

    /// A reference names an attribute the target kind does not expose.
    #[error(
        "Resource '{source_id}' references attribute '{attribute}' of '{target}' ({kind}), \
         which only exposes: {available}"
    )]
    InvalidAttribute {
        /// Resource holding the reference.
        source_id: String,
        /// Referenced resource id.
        target: String,
        /// Kind of the referenced resource.
        kind: String,
        /// The attribute that does not exist.
        attribute: String,
        /// Attributes the kind does expose.
        available: String,
    },

    /// The resource graph contains a cycle.
    #[error("Cyclic dependency detected: {}", .cycle.join(" -> "))]
    CyclicDependency {
        /// Full cycle path, first and last element are the same id.
        cycle: Vec<String>,
    },

    /// A resource changed kind between runs.
    #[error(
        "Resource '{id}' is recorded as {recorded} but declared as {declared}; \
         remove it and apply before re-adding it with the new kind"
    )]
    KindChanged {
        /// Resource id.
        id: String,
        /// Kind recorded in state.
        recorded: String,
        /// Kind in the current declaration.
        declared: String,
    },

    /// The plan was synthesized against an older state.
    #[error("Plan is stale: synthesized against state serial {plan_serial}, state is at {state_serial}")]
    StalePlan {
        /// Serial the plan was built against.
        plan_serial: u64,
        /// Serial of the state being applied to.
        state_serial: u64,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State could not be written.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the write failure.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// S3 backend error.
    #[error("S3 state backend error: {message}")]
    S3Error {
        /// Description of the S3 error.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Provider API errors.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Authentication failed.
    #[error("Provider authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the auth failure.
        message: String,
    },

    /// API request failed.
    #[error("Provider request failed: {status} - {message}")]
    RequestFailed {
        /// HTTP status code.
        status: u16,
        /// Error message from the provider.
        message: String,
    },

    /// Rate limited.
    #[error("Provider rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// The provider has no resource with this id.
    #[error("Resource not found: {provider_id}")]
    NotFound {
        /// Provider-assigned id.
        provider_id: String,
    },

    /// The provider refused the operation.
    #[error("Provider rejected the operation: {message}")]
    Rejected {
        /// Reason reported by the provider.
        message: String,
    },

    /// Network error.
    #[error("Network error communicating with provider: {message}")]
    NetworkError {
        /// Description of the network error.
        message: String,
    },

    /// Invalid response from API.
    #[error("Invalid response from provider: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },
}

/// A provider operation failure, attached to the operation that raised it.
#[derive(Debug, Clone, Error, Serialize)]
#[error("{operation} '{node_id}' (operation {index}) failed: {message}")]
pub struct ProviderOperationError {
    /// Zero-based position of the operation in the plan.
    pub index: usize,
    /// Resource id of the operation.
    pub node_id: String,
    /// Operation kind.
    pub operation: OperationKind,
    /// Provider error message.
    pub message: String,
}

/// Plan execution outcome errors.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// An operation failed and the rest of the plan was skipped.
    #[error("{failure}; {completed} completed, {skipped} skipped")]
    PartialFailure {
        /// The failed operation.
        failure: ProviderOperationError,
        /// Operations that completed before the failure.
        completed: usize,
        /// Operations never attempted.
        skipped: usize,
    },

    /// Execution was cancelled between operations.
    #[error("Apply cancelled after {completed} operations, {skipped} skipped")]
    Cancelled {
        /// Operations that completed before cancellation.
        completed: usize,
        /// Operations never attempted.
        skipped: usize,
    },
}

/// Result type alias for stackplan operations.
pub type Result<T> = std::result::Result<T, StackError>;

fn join_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl std::fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl FieldViolation {
    /// Creates a violation for a property path.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl StackError {
    /// Returns true if the caller may retry the whole run unchanged.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Provider(
                ProviderError::RateLimited { .. } | ProviderError::NetworkError { .. }
            ) | Self::State(StateError::LockFailed { .. } | StateError::LockedByOther { .. })
        )
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a parse error without a source location.
    #[must_use]
    pub fn parse(message: impl Into<String>) -> Self {
        Self::ParseError {
            message: message.into(),
            location: None,
        }
    }
}

impl StateError {
    /// Creates an S3 error with the given message.
    #[must_use]
    pub fn s3(message: impl Into<String>) -> Self {
        Self::S3Error {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates a request error.
    #[must_use]
    pub fn request(status: u16, message: impl Into<String>) -> Self {
        Self::RequestFailed {
            status,
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    /// Creates a rejection error.
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_violation_lists_every_field() {
        let err = PlanError::SchemaValidation {
            id: String::from("task"),
            kind: String::from("task_definition"),
            violations: vec![
                FieldViolation::new("cpu", "required property is missing"),
                FieldViolation::new("memory", "required property is missing"),
            ],
        };

        let message = err.to_string();
        assert!(message.contains("cpu: required property is missing"));
        assert!(message.contains("memory: required property is missing"));
    }

    #[test]
    fn test_cycle_message_names_path() {
        let err = PlanError::CyclicDependency {
            cycle: vec![String::from("a"), String::from("b"), String::from("a")],
        };
        assert_eq!(err.to_string(), "Cyclic dependency detected: a -> b -> a");
    }

    #[test]
    fn test_retryable() {
        let err = StackError::from(ProviderError::network("connection reset"));
        assert!(err.is_retryable());

        let err = StackError::from(PlanError::DuplicateId { id: String::from("a") });
        assert!(!err.is_retryable());
    }
}
