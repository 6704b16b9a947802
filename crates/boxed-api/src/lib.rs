//! Boxed control plane - HTTP and WebSocket surface
//!
//! Exposes sandbox lifecycle, code execution, filesystem access and
//! interactive sessions under `/v1`, backed by any [`boxed_driver::Driver`].
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use boxed_api::{ApiServer, ServerConfig};
//! use boxed_driver::mock::MockDriver;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::default();
//!     let server = ApiServer::new(config, Arc::new(MockDriver::new()));
//!     server.run().await
//! }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod templates;

use std::sync::Arc;
use std::time::Duration;

use boxed_driver::Driver;

pub use config::ServerConfig;
pub use error::{ApiError, Result};
pub use router::build_router;
pub use server::ApiServer;
pub use templates::{resolve_template, DEFAULT_IMAGE};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub driver: Arc<dyn Driver>,
    /// Hard deadline for one code execution.
    pub exec_timeout: Duration,
}
