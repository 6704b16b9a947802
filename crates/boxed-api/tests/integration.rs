//! Control plane integration tests
//!
//! Drive the real router against the in-memory mock driver; its simulated
//! agent speaks the real wire protocol through the stream demuxer, so these
//! cover the full exec/interact path without a Docker daemon.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tower::ServiceExt;

use boxed_api::{build_router, AppState};
use boxed_driver::{mock::MockDriver, Driver};

fn test_state() -> (AppState, Arc<MockDriver>) {
    let driver = Arc::new(MockDriver::new());
    (
        AppState {
            driver: driver.clone(),
            exec_timeout: Duration::from_secs(10),
        },
        driver,
    )
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn create_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/sandbox")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn create_sandbox(router: &axum::Router) -> String {
    let response = router
        .clone()
        .oneshot(create_request(json!({"template": "python:3.10-slim"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ready");
    body["sandbox_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn lifecycle_and_exec_round_trip() {
    let (state, _) = test_state();
    let router = build_router(state, None);

    let id = create_sandbox(&router).await;

    // Execute code; the simulated agent echoes the submitted code on stdout.
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/v1/sandbox/{id}/exec"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({"language": "python", "code": "print('Lifecycle Test Success')"})
                        .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["stdout"]
        .as_str()
        .unwrap()
        .contains("Lifecycle Test Success"));
    assert_eq!(body["exit_code"], json!(0));
    assert!(body["stderr"].as_str().unwrap().contains("spawned python3"));

    // Listing includes the sandbox.
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v1/sandbox")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let listed: Vec<&str> = body["sandboxes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_str().unwrap())
        .collect();
    assert!(listed.contains(&id.as_str()));

    // Stop is 204; a second stop is 404.
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/v1/sandbox/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/v1/sandbox/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_language_is_a_client_error() {
    let (state, driver) = test_state();
    let router = build_router(state, None);

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/sandbox/whatever/exec")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({"language": "cobol", "code": "DISPLAY 'HI'"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("cobol"));

    // Rejected before any backend call: no sandbox side effects.
    assert!(driver.list(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn exec_on_missing_sandbox_is_not_found() {
    let (state, _) = test_state();
    let router = build_router(state, None);

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/sandbox/nope/exec")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({"language": "python", "code": "1"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn auth_guards_every_v1_route() {
    let (state, _) = test_state();
    let router = build_router(state, Some("sesame"));

    for (method, uri) in [
        ("GET", "/v1/sandbox"),
        ("POST", "/v1/sandbox"),
        ("DELETE", "/v1/sandbox/x"),
        ("POST", "/v1/sandbox/x/exec"),
        ("GET", "/v1/sandbox/x/files"),
        ("GET", "/v1/sandbox/x/files/content"),
    ] {
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.status(),
            StatusCode::UNAUTHORIZED,
            "{method} {uri} must require the API key"
        );
    }

    // Wrong key is rejected.
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v1/sandbox")
                .header("X-Boxed-API-Key", "guess")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Header form.
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v1/sandbox")
                .header("X-Boxed-API-Key", "sesame")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Query parameter form.
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v1/sandbox?api_key=sesame")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn context_injection_is_readable_after_create() {
    let (state, _) = test_state();
    let router = build_router(state, None);

    let encoded = base64::engine::general_purpose::STANDARD.encode("Hello from Context");
    let response = router
        .clone()
        .oneshot(create_request(json!({
            "template": "python:3.10-slim",
            "context": [{"path": "hello.txt", "content_base64": encoded}],
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let id = body_json(response).await["sandbox_id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/v1/sandbox/{id}/files/content?path=hello.txt"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap(),
        "application/octet-stream"
    );
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"Hello from Context");
}

#[tokio::test]
async fn upload_round_trips_and_lists() {
    let (state, _) = test_state();
    let router = build_router(state, None);

    let id = create_sandbox(&router).await;

    let boundary = "boxed-test-boundary";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"path\"\r\n\r\n\
         /workspace\r\n\
         --{boundary}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"upload.txt\"\r\n\
         Content-Type: text/plain\r\n\r\n\
         Uploaded Content\r\n\
         --{boundary}--\r\n"
    );

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/v1/sandbox/{id}/files"))
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "uploaded");
    assert_eq!(body["path"], "/workspace/upload.txt");

    // Listing shows the uploaded basename.
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/v1/sandbox/{id}/files?path=/workspace"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let names: Vec<&str> = body["files"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"upload.txt"));

    // Downloading returns exactly the uploaded bytes.
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!(
                    "/v1/sandbox/{id}/files/content?path=/workspace/upload.txt"
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"Uploaded Content");
}

#[tokio::test]
async fn invalid_context_fails_create_with_client_error() {
    let (state, driver) = test_state();
    let router = build_router(state, None);

    let response = router
        .oneshot(create_request(json!({
            "template": "python:3.10-slim",
            "context": [{"path": "bad.bin", "content_base64": "%%%"}],
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(driver.list(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn interactive_session_echoes_input() {
    let (state, _) = test_state();
    let router = build_router(state, None);

    let id = create_sandbox(&router).await;

    // The bridge needs a real socket; serve the router on an ephemeral port.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let url = format!("ws://{addr}/v1/sandbox/{id}/interact");
    let (mut socket, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    socket
        .send(tokio_tungstenite::tungstenite::Message::Text(
            "echo 'boxed-session-id-123'\n".to_string(),
        ))
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let mut echoed = false;
    while tokio::time::Instant::now() < deadline {
        let message = tokio::time::timeout_at(deadline, socket.next())
            .await
            .ok()
            .flatten();
        let Some(Ok(tokio_tungstenite::tungstenite::Message::Text(text))) = message else {
            break;
        };
        let Ok(value) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        if value["method"] == "stdout"
            && value["params"]["chunk"]
                .as_str()
                .is_some_and(|chunk| chunk.contains("boxed-session-id-123"))
        {
            echoed = true;
            break;
        }
    }
    assert!(echoed, "expected the REPL to echo the session marker");

    drop(socket);
    server.abort();
}
