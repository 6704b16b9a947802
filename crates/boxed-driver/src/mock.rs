//! In-memory mock driver for tests and development
//!
//! Sandboxes live in a shared map; `connect` hands out a stream to a
//! simulated agent task that speaks the real wire protocol (line-delimited
//! JSON-RPC over the engine's multiplexed framing), so coordinator and
//! bridge code paths run unmodified against it.
//!
//! The simulated agent echoes: `exec` replies with the submitted code on
//! stdout plus a spawn notice on stderr, and a REPL echoes every `repl.input`
//! back as a `stdout` event.

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use tokio::io::DuplexStream;
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

use boxed_proto::{ExecParams, ReplInputParams, Request, Response, MAX_LINE_BYTES};

use crate::config::{FileEntry, SandboxConfig};
use crate::demux::{self, MuxFrame, MuxFrameCodec};
use crate::driver::{AgentConn, Driver, SandboxInfo, SandboxState};
use crate::error::{DriverError, Result};

pub const DRIVER_NAME: &str = "mock";

struct MockFile {
    data: Bytes,
    modified: DateTime<Utc>,
}

struct MockSandbox {
    state: SandboxState,
    config: SandboxConfig,
    files: HashMap<String, MockFile>,
    created_at: DateTime<Utc>,
}

/// In-memory [`Driver`] implementation.
#[derive(Default)]
pub struct MockDriver {
    sandboxes: Arc<Mutex<HashMap<String, MockSandbox>>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn resolve(cfg: &SandboxConfig, path: &str) -> String {
        if path.starts_with('/') {
            path.to_string()
        } else {
            format!("{}/{}", cfg.work_dir.trim_end_matches('/'), path)
        }
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn create(&self, mut cfg: SandboxConfig) -> Result<String> {
        cfg.validate()?;

        let id = format!("mock-{}", uuid::Uuid::new_v4().simple());
        let mut files = HashMap::new();

        for injection in &cfg.context {
            let data = base64::engine::general_purpose::STANDARD
                .decode(&injection.content_base64)
                .map_err(|e| {
                    DriverError::InvalidConfig(format!(
                        "context file '{}' is not valid base64: {e}",
                        injection.path
                    ))
                })?;
            files.insert(
                Self::resolve(&cfg, &injection.path),
                MockFile {
                    data: data.into(),
                    modified: Utc::now(),
                },
            );
        }

        let ttl = cfg.timeout;
        self.sandboxes.lock().await.insert(
            id.clone(),
            MockSandbox {
                state: SandboxState::Creating,
                config: cfg,
                files,
                created_at: Utc::now(),
            },
        );

        // Detached TTL task, same shape as the Docker backend.
        let sandboxes = Arc::clone(&self.sandboxes);
        let expired = id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if sandboxes.lock().await.remove(&expired).is_some() {
                tracing::info!(sandbox = %expired, "sandbox reclaimed by TTL");
            }
        });

        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        let mut sandboxes = self.sandboxes.lock().await;
        let sandbox = sandboxes
            .get_mut(id)
            .ok_or_else(|| DriverError::NotFound { id: id.to_string() })?;
        if sandbox.state == SandboxState::Ready {
            return Err(DriverError::AlreadyRunning { id: id.to_string() });
        }
        sandbox.state = SandboxState::Ready;
        Ok(())
    }

    async fn stop(&self, id: &str) -> Result<()> {
        self.sandboxes
            .lock()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| DriverError::NotFound { id: id.to_string() })
    }

    async fn connect(&self, id: &str) -> Result<AgentConn> {
        let sandboxes = self.sandboxes.lock().await;
        let sandbox = sandboxes
            .get(id)
            .ok_or_else(|| DriverError::NotFound { id: id.to_string() })?;
        if sandbox.state != SandboxState::Ready {
            return Err(DriverError::NotRunning { id: id.to_string() });
        }

        let (driver_side, agent_side) = tokio::io::duplex(64 * 1024);
        tokio::spawn(run_mock_agent(agent_side));
        Ok(Box::new(demux::from_raw(driver_side)))
    }

    async fn list_files(&self, id: &str, path: &str) -> Result<Vec<FileEntry>> {
        let sandboxes = self.sandboxes.lock().await;
        let sandbox = sandboxes
            .get(id)
            .ok_or_else(|| DriverError::NotFound { id: id.to_string() })?;
        let abs = Self::resolve(&sandbox.config, path);
        let prefix = format!("{}/", abs.trim_end_matches('/'));

        let mut entries: Vec<FileEntry> = sandbox
            .files
            .iter()
            .filter(|(stored, _)| **stored == abs || stored.starts_with(&prefix))
            .map(|(stored, file)| FileEntry {
                name: Path::new(stored)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| stored.clone()),
                path: stored.trim_start_matches('/').to_string(),
                size: file.data.len() as u64,
                mode: 0o644,
                is_dir: false,
                last_modified: file.modified,
            })
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn put_file(&self, id: &str, path: &str, content: Bytes) -> Result<()> {
        let mut sandboxes = self.sandboxes.lock().await;
        let sandbox = sandboxes
            .get_mut(id)
            .ok_or_else(|| DriverError::NotFound { id: id.to_string() })?;
        let abs = Self::resolve(&sandbox.config, path);
        sandbox.files.insert(
            abs,
            MockFile {
                data: content,
                modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get_file(
        &self,
        id: &str,
        path: &str,
    ) -> Result<Box<dyn tokio::io::AsyncRead + Send + Unpin>> {
        let sandboxes = self.sandboxes.lock().await;
        let sandbox = sandboxes
            .get(id)
            .ok_or_else(|| DriverError::NotFound { id: id.to_string() })?;
        let abs = Self::resolve(&sandbox.config, path);
        let file = sandbox
            .files
            .get(&abs)
            .ok_or_else(|| DriverError::Backend(format!("'{abs}' missing from archive")))?;
        Ok(Box::new(Cursor::new(file.data.to_vec())))
    }

    async fn info(&self, id: &str) -> Result<SandboxInfo> {
        let sandboxes = self.sandboxes.lock().await;
        let sandbox = sandboxes
            .get(id)
            .ok_or_else(|| DriverError::NotFound { id: id.to_string() })?;
        Ok(SandboxInfo {
            id: id.to_string(),
            state: sandbox.state,
            created_at: sandbox.created_at,
            config: Some(sandbox.config.clone()),
            driver_type: DRIVER_NAME.to_string(),
            ip_address: None,
            error: None,
        })
    }

    async fn list(&self, states: Option<&[SandboxState]>) -> Result<Vec<SandboxInfo>> {
        let sandboxes = self.sandboxes.lock().await;
        let mut infos: Vec<SandboxInfo> = sandboxes
            .iter()
            .filter(|(_, s)| states.map_or(true, |wanted| wanted.contains(&s.state)))
            .map(|(id, s)| SandboxInfo {
                id: id.clone(),
                state: s.state,
                created_at: s.created_at,
                config: None,
                driver_type: DRIVER_NAME.to_string(),
                ip_address: None,
                error: None,
            })
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(infos)
    }

    fn driver_name(&self) -> &'static str {
        DRIVER_NAME
    }

    async fn healthy(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// The simulated in-sandbox agent: reads JSON-RPC lines from stdin, writes
/// notifications through the engine framing (including stderr noise frames,
/// so the demux sideline path is always exercised).
async fn run_mock_agent(io: DuplexStream) {
    let (read, write) = tokio::io::split(io);
    let mut stdin = FramedRead::new(read, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
    let mut out = FramedWrite::new(write, MuxFrameCodec::new());

    while let Some(Ok(line)) = stdin.next().await {
        let Ok(req) = serde_json::from_str::<Request>(&line) else {
            continue;
        };
        match req.method.as_str() {
            "exec" => {
                let params: ExecParams = req
                    .params
                    .and_then(|p| serde_json::from_value(p).ok())
                    .unwrap_or_default();
                if let Some(id) = req.id {
                    let _ = send_message(&mut out, &Response::success(id, json!(null))).await;
                }
                let _ = out
                    .send(MuxFrame::stderr("mock-agent: spawning process\n"))
                    .await;
                let _ = send_event(
                    &mut out,
                    "stderr",
                    json!({"chunk": format!("spawned {}\n", params.cmd)}),
                )
                .await;
                let code = params.args.last().cloned().unwrap_or_default();
                let _ = send_event(&mut out, "stdout", json!({"chunk": code})).await;
                let _ = send_event(&mut out, "exit", json!({"code": 0})).await;
                // The agent process exits once the command completes.
                break;
            }
            "repl.start" => {
                if let Some(id) = req.id {
                    let _ = send_message(&mut out, &Response::success(id, json!(null))).await;
                }
                let _ = send_event(&mut out, "stdout", json!({"chunk": "$ "})).await;
            }
            "repl.input" => {
                let Some(params) = req
                    .params
                    .and_then(|p| serde_json::from_value::<ReplInputParams>(p).ok())
                else {
                    continue;
                };
                let _ = send_event(&mut out, "stdout", json!({"chunk": params.data})).await;
            }
            _ => {
                if let Some(id) = req.id {
                    let _ = send_message(
                        &mut out,
                        &Response::failure(
                            id,
                            boxed_proto::error_codes::METHOD_NOT_FOUND,
                            format!("unknown method: {}", req.method),
                        ),
                    )
                    .await;
                }
            }
        }
    }
}

async fn send_event(
    out: &mut FramedWrite<tokio::io::WriteHalf<DuplexStream>, MuxFrameCodec>,
    method: &str,
    params: serde_json::Value,
) -> std::io::Result<()> {
    send_message(out, &Request::notification(method, params)).await
}

async fn send_message<T: serde::Serialize>(
    out: &mut FramedWrite<tokio::io::WriteHalf<DuplexStream>, MuxFrameCodec>,
    msg: &T,
) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(msg).expect("wire messages serialize");
    line.push(b'\n');
    out.send(MuxFrame::stdout(line)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxed_proto::{Event, Message, RpcStream};
    use std::time::Duration;

    fn ready_config() -> SandboxConfig {
        SandboxConfig {
            image: "python:3.10-slim".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn lifecycle_round_trip() {
        let driver = MockDriver::new();
        let id = driver.create(ready_config()).await.unwrap();

        assert!(matches!(
            driver.connect(&id).await,
            Err(DriverError::NotRunning { .. })
        ));

        driver.start(&id).await.unwrap();
        assert_eq!(
            driver.info(&id).await.unwrap().state,
            SandboxState::Ready
        );
        assert!(matches!(
            driver.start(&id).await,
            Err(DriverError::AlreadyRunning { .. })
        ));

        driver.stop(&id).await.unwrap();
        assert!(matches!(
            driver.stop(&id).await,
            Err(DriverError::NotFound { .. })
        ));
        assert!(matches!(
            driver.info(&id).await,
            Err(DriverError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn put_then_get_returns_same_bytes() {
        let driver = MockDriver::new();
        let id = driver.create(ready_config()).await.unwrap();

        let payload = Bytes::from_static(b"Uploaded Content");
        driver.put_file(&id, "upload.txt", payload.clone()).await.unwrap();

        let mut reader = driver.get_file(&id, "upload.txt").await.unwrap();
        let mut back = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut back)
            .await
            .unwrap();
        assert_eq!(back, payload);

        let listed = driver.list_files(&id, "/workspace").await.unwrap();
        assert!(listed.iter().any(|f| f.name == "upload.txt"));
    }

    #[tokio::test]
    async fn context_injection_round_trip() {
        let driver = MockDriver::new();
        let mut cfg = ready_config();
        cfg.context.push(crate::config::FileInjection {
            path: "hello.txt".to_string(),
            content_base64: base64::engine::general_purpose::STANDARD.encode("Hello from Context"),
        });
        let id = driver.create(cfg).await.unwrap();

        let mut reader = driver.get_file(&id, "hello.txt").await.unwrap();
        let mut back = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut reader, &mut back)
            .await
            .unwrap();
        assert_eq!(back, "Hello from Context");
    }

    #[tokio::test]
    async fn invalid_context_base64_fails_create() {
        let driver = MockDriver::new();
        let mut cfg = ready_config();
        cfg.context.push(crate::config::FileInjection {
            path: "bad.bin".to_string(),
            content_base64: "%%% not base64 %%%".to_string(),
        });
        assert!(matches!(
            driver.create(cfg).await,
            Err(DriverError::InvalidConfig(_))
        ));
        assert!(driver.list(None).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_reclaims_sandbox() {
        let driver = MockDriver::new();
        let mut cfg = ready_config();
        cfg.timeout = Duration::from_secs(2);
        let id = driver.create(cfg).await.unwrap();
        driver.start(&id).await.unwrap();

        tokio::time::sleep(Duration::from_secs(3)).await;

        assert!(matches!(
            driver.info(&id).await,
            Err(DriverError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn exec_streams_through_real_protocol() {
        let driver = MockDriver::new();
        let id = driver.create(ready_config()).await.unwrap();
        driver.start(&id).await.unwrap();

        let conn = driver.connect(&id).await.unwrap();
        let mut rpc = RpcStream::new(conn);
        rpc.send(&Request::new(
            "exec",
            json!({"cmd": "python3", "args": ["-c", "print('hi')"]}),
            1,
        ))
        .await
        .unwrap();

        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut exit = None;
        while let Some(msg) = rpc.next_message().await.unwrap() {
            match msg {
                Message::Event(Event::Stdout { chunk }) => stdout.push_str(&chunk),
                Message::Event(Event::Stderr { chunk }) => stderr.push_str(&chunk),
                Message::Event(Event::Exit { code }) => {
                    exit = Some(code);
                    break;
                }
                _ => {}
            }
        }

        assert_eq!(stdout, "print('hi')");
        assert_eq!(stderr, "spawned python3\n");
        assert_eq!(exit, Some(0));
    }
}
