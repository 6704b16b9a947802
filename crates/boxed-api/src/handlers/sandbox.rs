//! Sandbox lifecycle endpoints
//!
//! The external API unifies create and start: `POST /v1/sandbox` returns a
//! sandbox already in `ready`. If the start fails after a successful create,
//! a detached cleanup stop keeps the failed container from leaking past the
//! request.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use boxed_driver::{Driver, FileInjection, NetworkPolicy, SandboxConfig, SandboxInfo};

use crate::error::Result;
use crate::templates::resolve_template;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateSandboxRequest {
    pub template: String,
    /// Sandbox lifetime in seconds; 0 means the driver default.
    pub timeout: u64,
    pub metadata: HashMap<String, String>,
    pub network_policy: NetworkPolicy,
    pub context: Vec<FileInjection>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSandboxResponse {
    pub sandbox_id: String,
    pub status: String,
}

pub async fn create_sandbox(
    State(state): State<AppState>,
    Json(req): Json<CreateSandboxRequest>,
) -> Result<(StatusCode, Json<CreateSandboxResponse>)> {
    let cfg = SandboxConfig {
        image: resolve_template(&req.template),
        timeout: Duration::from_secs(req.timeout),
        labels: req.metadata,
        network_policy: req.network_policy,
        context: req.context,
        ..Default::default()
    };

    let id = state.driver.create(cfg).await?;

    if let Err(err) = state.driver.start(&id).await {
        tracing::warn!(sandbox = %id, error = %err, "start failed after create, cleaning up");
        let driver = state.driver.clone();
        let orphan = id.clone();
        // Cleanup runs on a fresh task so it survives the failing request.
        tokio::spawn(async move {
            if let Err(err) = driver.stop(&orphan).await {
                if !err.is_not_found() {
                    tracing::warn!(sandbox = %orphan, error = %err, "cleanup stop failed");
                }
            }
        });
        return Err(err.into());
    }

    Ok((
        StatusCode::CREATED,
        Json(CreateSandboxResponse {
            sandbox_id: id,
            status: "ready".to_string(),
        }),
    ))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListSandboxesResponse {
    pub sandboxes: Vec<SandboxInfo>,
}

pub async fn list_sandboxes(State(state): State<AppState>) -> Result<Json<ListSandboxesResponse>> {
    let sandboxes = state.driver.list(None).await?;
    Ok(Json(ListSandboxesResponse { sandboxes }))
}

pub async fn stop_sandbox(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.driver.stop(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
