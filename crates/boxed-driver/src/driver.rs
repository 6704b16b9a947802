//! Abstract sandbox backend interface
//!
//! Defines the `Driver` trait implemented by every backend (Docker today,
//! micro-VMs later). The lifecycle of a sandbox is:
//!
//! 1. `create` - provisions the environment
//! 2. `start` - boots it; the agent becomes connectable
//! 3. `connect` - establishes a raw bidirectional stream to the agent
//! 4. `stop` - tears down and frees every resource
//!
//! Operations are plain futures; dropping one cancels it, and callers that
//! need deadlines wrap calls in `tokio::time::timeout`. TTL enforcement runs
//! on detached tasks so it never inherits a request's cancellation.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::{FileEntry, SandboxConfig};
use crate::error::{DriverError, Result};

/// Lifecycle state of a sandbox. A sandbox is in exactly one state at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxState {
    /// Being provisioned.
    Creating,
    /// Running with a live, connectable agent.
    Ready,
    /// Being terminated.
    Stopping,
    /// Terminated.
    Stopped,
    /// Unrecoverable failure; `SandboxInfo::error` carries the cause.
    Error,
}

impl std::fmt::Display for SandboxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SandboxState::Creating => "creating",
            SandboxState::Ready => "ready",
            SandboxState::Stopping => "stopping",
            SandboxState::Stopped => "stopped",
            SandboxState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Runtime information about a sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxInfo {
    pub id: String,
    pub state: SandboxState,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<SandboxConfig>,
    pub driver_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A bidirectional byte stream to the in-sandbox agent. Reads yield the
/// agent's stdout with the engine's stream multiplexing already removed;
/// writes reach the agent's stdin unframed. The stream is exclusively owned
/// by the caller that obtained it and must be dropped on every termination
/// path.
pub trait AgentStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AgentStream for T {}

/// Boxed agent stream handed out by [`Driver::connect`].
pub type AgentConn = Box<dyn AgentStream>;

/// The backend abstraction. Implementations must be safe for concurrent use;
/// operations on different sandboxes are independent and operations on the
/// same sandbox are not serialized by the driver.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Provision a new sandbox and return its opaque ID. The sandbox is not
    /// started; call [`start`](Driver::start) to boot it.
    async fn create(&self, cfg: SandboxConfig) -> Result<String>;

    /// Boot a previously created sandbox. After a successful return the
    /// sandbox is ready and the agent is connectable.
    async fn start(&self, id: &str) -> Result<()>;

    /// Terminate a sandbox and release all associated resources. Stopping a
    /// sandbox that is already gone returns [`DriverError::NotFound`], which
    /// cleanup paths treat as success.
    async fn stop(&self, id: &str) -> Result<()>;

    /// Establish a bidirectional stream to the agent inside the sandbox.
    async fn connect(&self, id: &str) -> Result<AgentConn>;

    /// List files at `path` (resolved against the working directory when
    /// relative).
    async fn list_files(&self, id: &str, path: &str) -> Result<Vec<FileEntry>>;

    /// Write `content` to `path` inside the sandbox.
    async fn put_file(&self, id: &str, path: &str, content: Bytes) -> Result<()>;

    /// Read the file at `path`; the returned reader yields the raw bytes.
    async fn get_file(&self, id: &str, path: &str) -> Result<Box<dyn AsyncRead + Send + Unpin>>;

    /// Runtime information about one sandbox.
    async fn info(&self, id: &str) -> Result<SandboxInfo>;

    /// All sandboxes managed by this driver, optionally filtered by state.
    async fn list(&self, states: Option<&[SandboxState]>) -> Result<Vec<SandboxInfo>>;

    /// Identifier for this backend (e.g. `docker`).
    fn driver_name(&self) -> &'static str;

    /// Health check against the backend engine.
    async fn healthy(&self) -> Result<()>;

    /// Release resources held by the driver itself.
    async fn close(&self) -> Result<()>;
}

/// Backend selection options passed to [`create_driver`].
#[derive(Debug, Clone, Default)]
pub struct DriverOptions {
    /// Host path to the compiled agent binary (Docker backend).
    pub agent_path: Option<PathBuf>,
}

/// Create a driver by backend name. Knows every compiled-in backend; unknown
/// names fail with [`DriverError::UnknownDriver`].
pub async fn create_driver(name: &str, opts: DriverOptions) -> Result<Arc<dyn Driver>> {
    match name {
        crate::docker::DRIVER_NAME => Ok(Arc::new(crate::docker::DockerDriver::new(opts).await?)),
        crate::mock::DRIVER_NAME => Ok(Arc::new(crate::mock::MockDriver::new())),
        other => Err(DriverError::UnknownDriver(other.to_string())),
    }
}

/// Names of all compiled-in backends.
pub fn available_drivers() -> &'static [&'static str] {
    &[crate::docker::DRIVER_NAME, crate::mock::DRIVER_NAME]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(SandboxState::Ready).unwrap(),
            serde_json::json!("ready")
        );
        assert_eq!(SandboxState::Stopping.to_string(), "stopping");
    }

    #[tokio::test]
    async fn unknown_driver_is_rejected() {
        let err = create_driver("firecracker", DriverOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DriverError::UnknownDriver(name) if name == "firecracker"));
    }

    #[test]
    fn driver_registry_lists_backends() {
        assert!(available_drivers().contains(&"docker"));
        assert!(available_drivers().contains(&"mock"));
    }
}
