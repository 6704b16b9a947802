//! `boxed serve` - run the control plane

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use boxed_api::{ApiServer, ServerConfig};
use boxed_driver::{create_driver, Driver, DriverOptions};

pub async fn run(
    port: u16,
    driver_name: &str,
    agent_path: Option<PathBuf>,
    exec_timeout: u64,
    api_key: Option<String>,
) -> Result<()> {
    let driver = create_driver(driver_name, DriverOptions { agent_path })
        .await
        .with_context(|| format!("failed to initialize '{driver_name}' driver"))?;

    tokio::time::timeout(Duration::from_secs(5), driver.healthy())
        .await
        .context("driver health check timed out")?
        .context("driver health check failed")?;

    let config = ServerConfig {
        bind: SocketAddr::from(([0, 0, 0, 0], port)),
        api_key,
        exec_timeout: Duration::from_secs(exec_timeout),
    };

    let server = ApiServer::new(config, driver.clone());
    server.run_with_shutdown(shutdown_signal()).await?;

    driver.close().await?;
    Ok(())
}

/// Completes on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
