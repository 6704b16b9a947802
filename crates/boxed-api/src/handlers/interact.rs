//! Interactive session bridge
//!
//! Welds a client WebSocket to the agent stream. Outbound, every framed line
//! from the agent is forwarded verbatim as a text message. Inbound, messages
//! already carrying a JSON-RPC `method` pass through untouched; anything
//! else is wrapped as a `repl.input` notification. The first failure on
//! either direction tears down both.

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, HeaderMap},
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use boxed_driver::Driver;
use boxed_proto::Request;

use crate::error::{ApiError, Result};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct InteractQuery {
    pub lang: Option<String>,
}

/// Map the `lang` parameter to the in-sandbox shell command.
fn shell_command(lang: Option<&str>) -> &'static str {
    match lang {
        Some("python") => "python3",
        _ => "bash",
    }
}

/// Missing origins (CLI and SDK clients) and same-host origins are accepted.
/// Production deployments are expected to substitute a stricter policy.
fn origin_allowed(origin: Option<&str>) -> bool {
    match origin {
        None => true,
        Some(origin) => {
            origin.starts_with("http://localhost")
                || origin.starts_with("https://localhost")
                || origin.starts_with("http://127.0.0.1")
        }
    }
}

pub async fn interact_sandbox(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<InteractQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response> {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok());
    if !origin_allowed(origin) {
        return Err(ApiError::Forbidden("origin not allowed".to_string()));
    }

    let shell = shell_command(query.lang.as_deref());
    let driver = state.driver.clone();
    Ok(ws.on_upgrade(move |socket| async move {
        if let Err(err) = bridge_session(socket, driver, &id, shell).await {
            tracing::debug!(sandbox = %id, error = %err, "interactive session ended");
        }
    }))
}

async fn bridge_session(
    socket: WebSocket,
    driver: Arc<dyn Driver>,
    id: &str,
    shell: &str,
) -> anyhow::Result<()> {
    let conn = driver.connect(id).await?;
    let (mut agent_rx, mut agent_tx) = boxed_proto::split(conn);

    agent_tx
        .send(&Request::new("repl.start", json!({"cmd": shell}), 1))
        .await?;

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Agent -> client: framed lines out as text messages, verbatim.
    let mut agent_to_client = tokio::spawn(async move {
        loop {
            match agent_rx.next_line().await {
                Ok(Some(line)) => {
                    if ws_tx.send(WsMessage::Text(line)).await.is_err() {
                        break;
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }
    });

    // Client -> agent: JSON-RPC passes through, raw input is wrapped.
    let mut client_to_agent = tokio::spawn(async move {
        while let Some(message) = ws_rx.next().await {
            let Ok(message) = message else { break };
            let text = match message {
                WsMessage::Text(text) => text,
                WsMessage::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                WsMessage::Close(_) => break,
                // Pings and pongs are answered by the protocol stack.
                _ => continue,
            };

            let is_rpc = serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .and_then(|value| value.get("method").cloned())
                .is_some_and(|method| !method.is_null());

            let sent = if is_rpc {
                agent_tx.send_raw(&text).await
            } else {
                agent_tx
                    .send(&Request::notification("repl.input", json!({"data": text})))
                    .await
            };
            if sent.is_err() {
                break;
            }
        }
    });

    // Closing either side is the cancellation: the survivor is aborted and
    // dropping the halves closes the socket and the agent stream.
    tokio::select! {
        _ = &mut agent_to_client => client_to_agent.abort(),
        _ = &mut client_to_agent => agent_to_client.abort(),
    }

    Ok(())
}
