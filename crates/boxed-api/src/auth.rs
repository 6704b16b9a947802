//! Shared API key authentication
//!
//! When a key is configured, every `/v1/*` request must present it via the
//! `X-Boxed-API-Key` header or the `api_key` query parameter. The query form
//! exists for CLI ergonomics and quick debugging.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::error::ApiError;

/// Name of the header carrying the shared API key.
pub const API_KEY_HEADER: &str = "X-Boxed-API-Key";

/// Middleware enforcing the configured API key. Only installed when a key is
/// present in the server configuration.
pub async fn require_api_key(
    State(expected): State<String>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| query_api_key(request.uri().query()));

    match presented {
        Some(key) if key == expected => Ok(next.run(request).await),
        _ => Err(ApiError::Unauthorized(
            "invalid or missing API key".to_string(),
        )),
    }
}

fn query_api_key(query: Option<&str>) -> Option<String> {
    let query = query?;
    serde_urlencoded::from_str::<Vec<(String, String)>>(query)
        .ok()?
        .into_iter()
        .find(|(name, _)| name == "api_key")
        .map(|(_, value)| value)
}
