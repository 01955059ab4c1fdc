//! Error Types
//!
//! Normal state-machine transitions (a repeat counter running out, an empty
//! branch, an event arriving for a block that already left) are never errors.
//! What remains is collaborator failures, which propagate to the host, and
//! problems loading or saving a workflow definition.

use std::path::PathBuf;

use thiserror::Error;

use crate::workflow::validator::ValidationError;

/// Failure reported by an external timer or countdown collaborator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    #[error("timer service failed: {0}")]
    Timer(String),
    #[error("countdown service failed: {0}")]
    Countdown(String),
}

/// Errors returned by [`Execution`](crate::execution::Execution) operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("execution has already been started")]
    AlreadyStarted,
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Errors raised while loading, validating or saving workflow definitions.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("failed to access workflow file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse workflow: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid workflow: {0}")]
    Invalid(#[from] ValidationError),
    #[error("failed to serialize workflow: {0}")]
    Serialize(#[source] serde_yaml::Error),
}
