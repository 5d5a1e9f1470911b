//! Error types for stratus.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.

use crate::types::{RegionId, RemoteStackId, StackStatus};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for stratus operations.
pub type Result<T> = std::result::Result<T, StratusError>;

/// Main error type for stratus.
#[derive(Error, Debug)]
pub enum StratusError {
    // Driver errors
    #[error("Failed to create remote stack in region {region}: {reason}")]
    CreateFailed { region: RegionId, reason: String },

    #[error("Failed to read remote stack status in region {region}: {reason}")]
    Poll { region: RegionId, reason: String },

    #[error("Remote stack {remote_id} not found in region {region}")]
    RemoteNotFound { region: RegionId, remote_id: RemoteStackId },

    #[error("Failed to delete remote stack in region {region}: {reason}")]
    DeleteFailed { region: RegionId, reason: String },

    // Waiting errors
    #[error("Timed out waiting for {operation} (last status: {last_status})")]
    Timeout { operation: String, last_status: StackStatus },

    #[error("Parent stack outputs are not available while status is {status}")]
    NotReady { status: StackStatus },

    #[error("Child stack {name} settled in {actual}, expected {expected}")]
    UnexpectedStatus { name: String, expected: StackStatus, actual: StackStatus },

    // Declaration errors
    #[error("Duplicate child stack name: {name}")]
    DuplicateChild { name: String },

    #[error("Child stack not found: {name}")]
    ChildNotFound { name: String },

    #[error("Child stacks for parent {parent} were already created")]
    AlreadyCreated { parent: String },

    #[error("Duplicate output key: {key}")]
    DuplicateOutputKey { key: String },

    #[error("Invalid state: {reason}")]
    InvalidState { reason: String },

    // Configuration errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StratusError {
    /// Whether the error means the remote stack is already gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::RemoteNotFound { .. })
    }
}
