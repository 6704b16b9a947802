//! Driver errors
//!
//! The canonical error kinds every backend maps onto. HTTP mapping happens
//! in the API layer; drivers only distinguish the kinds below.

use thiserror::Error;

/// Errors returned by [`Driver`](crate::Driver) implementations.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The provided sandbox configuration is invalid.
    #[error("invalid sandbox configuration: {0}")]
    InvalidConfig(String),

    /// No resources available to create new sandboxes.
    #[error("resource limit exhausted: {0}")]
    ResourceExhausted(String),

    /// The requested sandbox does not exist.
    #[error("sandbox '{id}' not found")]
    NotFound { id: String },

    /// Attempt to start an already running sandbox.
    #[error("sandbox '{id}' already running")]
    AlreadyRunning { id: String },

    /// Attempt to connect to or operate on a non-running sandbox.
    #[error("sandbox '{id}' not running")]
    NotRunning { id: String },

    /// Failed to establish a stream to the in-sandbox agent.
    #[error("failed to connect to sandbox agent '{id}': {reason}")]
    ConnectionFailed { id: String, reason: String },

    /// An operation exceeded its deadline.
    #[error("operation timed out")]
    Timeout,

    /// No backend registered under the requested name.
    #[error("unknown driver: {0}")]
    UnknownDriver(String),

    /// I/O failure while moving sandbox data.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A backend failure that has no canonical kind; the engine error string
    /// is preserved for the client.
    #[error("backend error: {0}")]
    Backend(String),
}

impl DriverError {
    /// True when a stop/cleanup path can treat this error as success.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DriverError::NotFound { .. })
    }
}

pub type Result<T, E = DriverError> = std::result::Result<T, E>;
