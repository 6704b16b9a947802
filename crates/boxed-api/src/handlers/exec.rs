//! Code execution endpoint
//!
//! One `exec` request produces a stream of notifications which are folded
//! into an aggregate result: stdout/stderr buffers, artifacts in arrival
//! order, and the exit code if a terminal `exit` event arrived. RPC-level
//! failures and in-stream `error` events land in stderr instead of aborting
//! the HTTP response.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::{AsyncRead, AsyncWrite};

use boxed_driver::Driver;
use boxed_proto::{Artifact, Event, Message, Request, RpcStream};

use crate::error::{ApiError, Result};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ExecRequest {
    pub code: String,
    pub language: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExecResponse {
    pub stdout: String,
    pub stderr: String,
    pub artifacts: Vec<Artifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// Map a language identifier to the in-sandbox command line.
fn language_command(language: &str, code: &str) -> Option<(&'static str, Vec<String>)> {
    match language {
        "python" => Some(("python3", vec!["-c".to_string(), code.to_string()])),
        "javascript" | "node" => Some(("node", vec!["-e".to_string(), code.to_string()])),
        "bash" | "sh" => Some(("bash", vec!["-c".to_string(), code.to_string()])),
        _ => None,
    }
}

pub async fn exec_sandbox(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ExecRequest>,
) -> Result<Json<ExecResponse>> {
    let (cmd, args) = language_command(&req.language, &req.code).ok_or_else(|| {
        ApiError::BadRequest(format!("unsupported language: {}", req.language))
    })?;

    let conn = state.driver.connect(&id).await?;
    let mut rpc = RpcStream::new(conn);

    rpc.send(&Request::new("exec", json!({"cmd": cmd, "args": args}), 1))
        .await
        .map_err(|e| ApiError::Internal(format!("failed to send exec request: {e}")))?;

    match tokio::time::timeout(state.exec_timeout, collect_execution(&mut rpc)).await {
        // Partial output is discarded; the stream closes when `rpc` drops.
        Err(_elapsed) => Err(ApiError::Timeout("execution timed out".to_string())),
        Ok(Err(err)) => Err(ApiError::Internal(format!("agent stream error: {err}"))),
        Ok(Ok(result)) => Ok(Json(result)),
    }
}

/// Drain the notification stream into an aggregate result. Terminates on the
/// first `exit` event, on an RPC error response, or at end of stream.
async fn collect_execution<T>(
    rpc: &mut RpcStream<T>,
) -> std::result::Result<ExecResponse, boxed_proto::codec::CodecError>
where
    T: AsyncRead + AsyncWrite,
{
    let mut result = ExecResponse {
        stdout: String::new(),
        stderr: String::new(),
        artifacts: Vec::new(),
        exit_code: None,
    };

    while let Some(message) = rpc.next_message().await? {
        match message {
            Message::Response(response) => {
                if let Some(error) = response.error {
                    // The exec never started; no events will follow.
                    result
                        .stderr
                        .push_str(&format!("\nRPC Error: {}\n", error.message));
                    break;
                }
            }
            Message::Event(Event::Stdout { chunk }) => result.stdout.push_str(&chunk),
            Message::Event(Event::Stderr { chunk }) => result.stderr.push_str(&chunk),
            Message::Event(Event::Artifact(artifact)) => result.artifacts.push(artifact),
            Message::Event(Event::Exit { code }) => {
                result.exit_code = Some(code);
                break;
            }
            Message::Event(Event::Error { message }) => {
                result
                    .stderr
                    .push_str(&format!("\nRuntime Error: {message}\n"));
            }
            Message::Event(Event::Other { method }) => {
                tracing::debug!(method = %method, "ignoring unknown agent event");
            }
        }
    }

    Ok(result)
}
