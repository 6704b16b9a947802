//! API server

use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use boxed_driver::Driver;

use crate::config::ServerConfig;
use crate::router::build_router;
use crate::AppState;

/// The Boxed control plane server.
pub struct ApiServer {
    config: ServerConfig,
    driver: Arc<dyn Driver>,
}

impl ApiServer {
    pub fn new(config: ServerConfig, driver: Arc<dyn Driver>) -> Self {
        Self { config, driver }
    }

    fn state(&self) -> AppState {
        AppState {
            driver: self.driver.clone(),
            exec_timeout: self.config.exec_timeout,
        }
    }

    /// Run until the listener fails.
    pub async fn run(self) -> anyhow::Result<()> {
        let router = build_router(self.state(), self.config.api_key.as_deref());

        info!(
            bind = %self.config.bind,
            driver = self.driver.driver_name(),
            auth = self.config.api_key.is_some(),
            "starting control plane"
        );

        let listener = TcpListener::bind(self.config.bind).await?;
        axum::serve(listener, router).await?;
        Ok(())
    }

    /// Run until `shutdown` completes, then drain in-flight requests.
    pub async fn run_with_shutdown(
        self,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let router = build_router(self.state(), self.config.api_key.as_deref());

        info!(
            bind = %self.config.bind,
            driver = self.driver.driver_name(),
            auth = self.config.api_key.is_some(),
            "starting control plane"
        );

        let listener = TcpListener::bind(self.config.bind).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("control plane shut down");
        Ok(())
    }
}
