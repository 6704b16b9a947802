//! `boxed repl` - interactive sandbox session
//!
//! Raw stdin lines go up as text frames; the bridge wraps them as
//! `repl.input` notifications. Incoming frames are JSON-RPC events which are
//! rendered to the terminal.

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::tungstenite::Message;

use crate::client::ApiClient;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EventFrame {
    method: String,
    params: EventParams,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EventParams {
    chunk: String,
    message: String,
    code: i32,
}

pub async fn run(client: &ApiClient, id: &str, lang: Option<&str>) -> Result<()> {
    let url = client.interact_url(id, lang);
    println!("Connecting to {url}...");

    let (socket, _) = tokio_tungstenite::connect_async(&url)
        .await
        .context("websocket dial failed; is the server running?")?;
    let (mut ws_tx, mut ws_rx) = socket.split();

    println!("Connected! Type your commands below. CTRL+C to exit.");

    // Local stdin -> sandbox.
    let stdin_pump = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if ws_tx.send(Message::Text(format!("{line}\n"))).await.is_err() {
                break;
            }
        }
    });

    // Sandbox -> local terminal.
    loop {
        tokio::select! {
            message = ws_rx.next() => {
                let Some(Ok(message)) = message else {
                    println!("\nConnection closed");
                    break;
                };
                let Message::Text(text) = message else { continue };
                match serde_json::from_str::<EventFrame>(&text) {
                    Ok(frame) => match frame.method.as_str() {
                        "stdout" | "stderr" => {
                            print!("{}", frame.params.chunk);
                            std::io::stdout().flush().ok();
                        }
                        "error" => println!("\n[Error] {}", frame.params.message),
                        "exit" => {
                            println!("\n[Process exited with code {}]", frame.params.code);
                            break;
                        }
                        _ => {}
                    },
                    Err(_) => print!("{text}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nInterrupt received, closing...");
                break;
            }
        }
    }

    stdin_pump.abort();
    Ok(())
}
