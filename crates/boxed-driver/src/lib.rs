//! Sandbox backend abstraction and implementations
//!
//! This crate owns everything between the control plane and the container
//! engine:
//!
//! - [`Driver`]: the backend-neutral contract (lifecycle, agent connection,
//!   file I/O, introspection). Implementations are selected by name through
//!   [`create_driver`].
//! - [`docker`]: the Docker implementation — resource-capped containers, image
//!   pull-on-miss, context file injection, TTL-enforced teardown and the
//!   startup sweep of orphaned sandboxes.
//! - [`demux`]: the stream demultiplexer that turns the engine's hijacked,
//!   multiplexed agent stream into a clean stdout reader plus a passthrough
//!   stdin writer.
//! - [`mock`]: an in-memory driver whose simulated agent speaks the real wire
//!   protocol; API-level tests run against it without a Docker daemon.

pub mod config;
pub mod demux;
pub mod docker;
pub mod driver;
pub mod error;
pub mod mock;

pub use config::{FileEntry, FileInjection, NetworkPolicy, SandboxConfig};
pub use driver::{
    available_drivers, create_driver, AgentConn, AgentStream, Driver, DriverOptions, SandboxInfo,
    SandboxState,
};
pub use error::{DriverError, Result};
