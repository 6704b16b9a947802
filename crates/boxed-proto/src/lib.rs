//! JSON-RPC 2.0 message types for control plane <-> agent communication.
//!
//! The agent speaks line-delimited JSON-RPC over its stdio stream: one JSON
//! object per newline-terminated UTF-8 line. Requests flow toward the agent;
//! responses and notification events flow back. The framing layer lives in
//! [`codec`].

pub mod codec;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use codec::{split, RpcReader, RpcStream, RpcWriter, MAX_LINE_BYTES};

/// Protocol version carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC 2.0 error codes.
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// A JSON-RPC 2.0 request. Notifications omit `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl Request {
    /// Create a request expecting a response bound to `id`.
    pub fn new(method: impl Into<String>, params: Value, id: i64) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params: Some(params),
            id: Some(Value::from(id)),
        }
    }

    /// Create a notification (no response expected).
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params: Some(params),
            id: None,
        }
    }
}

/// A JSON-RPC 2.0 response. Exactly one of `result`/`error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Value,
}

impl Response {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
            id,
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Parameters for the `exec` method.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecParams {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<std::collections::HashMap<String, String>>,
    /// Milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i64>,
}

/// Parameters for the `repl.start` method.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplStartParams {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<std::collections::HashMap<String, String>>,
}

/// Parameters for the `repl.input` method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplInputParams {
    pub data: String,
}

/// A file surfaced by the agent during execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: String,
    #[serde(default)]
    pub mime: String,
    /// Inline payload for small artifacts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_base64: Option<String>,
    /// Out-of-band location for artifacts too large to inline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A notification event emitted by the agent, discriminated by method name.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Stdout { chunk: String },
    Stderr { chunk: String },
    Artifact(Artifact),
    Exit { code: i32 },
    Error { message: String },
    /// A method this client does not understand; carried for diagnostics.
    Other { method: String },
}

impl Event {
    /// Decode an event from a notification's method and params.
    ///
    /// Returns `None` for notifications whose params are malformed for the
    /// method they claim; the stream itself survives such events.
    pub fn decode(method: &str, params: &Value) -> Option<Event> {
        match method {
            "stdout" => Some(Event::Stdout {
                chunk: params.get("chunk")?.as_str()?.to_string(),
            }),
            "stderr" => Some(Event::Stderr {
                chunk: params.get("chunk")?.as_str()?.to_string(),
            }),
            "artifact" => serde_json::from_value(params.clone())
                .ok()
                .map(Event::Artifact),
            "exit" => Some(Event::Exit {
                code: narrow_exit_code(params.get("code")?.as_f64()?)?,
            }),
            "error" => Some(Event::Error {
                message: params.get("message")?.as_str()?.to_string(),
            }),
            other => Some(Event::Other {
                method: other.to_string(),
            }),
        }
    }
}

/// Narrow a JSON number (decoded as f64) to an i32 exit code, truncating
/// toward zero. Non-finite or out-of-range values are rejected.
fn narrow_exit_code(code: f64) -> Option<i32> {
    if !code.is_finite() {
        return None;
    }
    let truncated = code.trunc();
    if truncated < f64::from(i32::MIN) || truncated > f64::from(i32::MAX) {
        return None;
    }
    Some(truncated as i32)
}

/// A classified incoming message.
#[derive(Debug, Clone)]
pub enum Message {
    /// An object carrying a non-null `id`, bound to an outstanding request.
    Response(Response),
    /// A notification, decoded by method.
    Event(Event),
}

/// Classify one wire line. Returns `None` when the line is not a usable
/// JSON-RPC message; callers skip such lines.
pub fn classify(line: &str) -> Option<Message> {
    let value: Value = serde_json::from_str(line).ok()?;
    if !value.is_object() {
        return None;
    }
    let has_id = value.get("id").is_some_and(|id| !id.is_null());
    if has_id {
        return serde_json::from_value::<Response>(value)
            .ok()
            .map(Message::Response);
    }
    let method = value.get("method")?.as_str()?.to_string();
    let params = value.get("params").cloned().unwrap_or(Value::Null);
    Event::decode(&method, &params).map(Message::Event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_round_trip() {
        let req = Request::new("exec", json!({"cmd": "python3"}), 1);
        let line = serde_json::to_string(&req).unwrap();
        let back: Request = serde_json::from_str(&line).unwrap();
        assert_eq!(back.method, "exec");
        assert_eq!(back.id, Some(json!(1)));
        assert_eq!(back.jsonrpc, JSONRPC_VERSION);
    }

    #[test]
    fn notification_omits_id() {
        let note = Request::notification("repl.input", json!({"data": "ls\n"}));
        let line = serde_json::to_string(&note).unwrap();
        assert!(!line.contains("\"id\""));
    }

    #[test]
    fn classify_response_by_id() {
        let msg = classify(r#"{"jsonrpc":"2.0","id":1,"result":"ok"}"#).unwrap();
        match msg {
            Message::Response(resp) => {
                assert_eq!(resp.result, Some(json!("ok")));
                assert!(resp.error.is_none());
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn classify_null_id_as_notification() {
        let msg =
            classify(r#"{"jsonrpc":"2.0","id":null,"method":"stdout","params":{"chunk":"hi"}}"#)
                .unwrap();
        assert!(matches!(msg, Message::Event(Event::Stdout { ref chunk }) if chunk == "hi"));
    }

    #[test]
    fn classify_rejects_non_objects() {
        assert!(classify("[1,2,3]").is_none());
        assert!(classify("not json").is_none());
        assert!(classify("42").is_none());
    }

    #[test]
    fn decode_artifact_event() {
        let msg = classify(
            r#"{"jsonrpc":"2.0","method":"artifact","params":{"path":"/output/plot.png","mime":"image/png","data_base64":"aGk="}}"#,
        )
        .unwrap();
        match msg {
            Message::Event(Event::Artifact(artifact)) => {
                assert_eq!(artifact.path, "/output/plot.png");
                assert_eq!(artifact.mime, "image/png");
                assert_eq!(artifact.data_base64.as_deref(), Some("aGk="));
                assert!(artifact.url.is_none());
            }
            other => panic!("expected artifact, got {other:?}"),
        }
    }

    #[test]
    fn exit_code_narrows_toward_zero() {
        assert_eq!(narrow_exit_code(0.0), Some(0));
        assert_eq!(narrow_exit_code(1.0), Some(1));
        assert_eq!(narrow_exit_code(1.9), Some(1));
        assert_eq!(narrow_exit_code(-1.9), Some(-1));
        assert_eq!(narrow_exit_code(137.0), Some(137));
    }

    #[test]
    fn exit_code_rejects_out_of_range() {
        assert_eq!(narrow_exit_code(f64::NAN), None);
        assert_eq!(narrow_exit_code(f64::INFINITY), None);
        assert_eq!(narrow_exit_code(1e12), None);
        assert_eq!(narrow_exit_code(-1e12), None);
    }

    #[test]
    fn exit_event_with_bad_code_is_dropped() {
        assert!(classify(r#"{"jsonrpc":"2.0","method":"exit","params":{"code":1e300}}"#).is_none());
        assert!(classify(r#"{"jsonrpc":"2.0","method":"exit","params":{}}"#).is_none());
    }

    #[test]
    fn unknown_method_is_carried() {
        let msg = classify(r#"{"jsonrpc":"2.0","method":"metrics.sample","params":{}}"#).unwrap();
        assert!(matches!(msg, Message::Event(Event::Other { ref method }) if method == "metrics.sample"));
    }
}
