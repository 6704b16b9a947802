//! Router construction

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::auth;
use crate::handlers;
use crate::AppState;

/// Largest accepted request body (multipart uploads included).
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Build the `/v1` router. The auth middleware is installed only when an API
/// key is configured.
pub fn build_router(state: AppState, api_key: Option<&str>) -> Router {
    let mut v1 = Router::new()
        .route(
            "/sandbox",
            post(handlers::sandbox::create_sandbox).get(handlers::sandbox::list_sandboxes),
        )
        .route("/sandbox/:id", delete(handlers::sandbox::stop_sandbox))
        .route("/sandbox/:id/exec", post(handlers::exec::exec_sandbox))
        .route(
            "/sandbox/:id/files",
            get(handlers::files::list_files).post(handlers::files::upload_file),
        )
        .route(
            "/sandbox/:id/files/content",
            get(handlers::files::download_file),
        )
        .route(
            "/sandbox/:id/interact",
            get(handlers::interact::interact_sandbox),
        );

    if let Some(key) = api_key {
        v1 = v1.layer(middleware::from_fn_with_state(
            key.to_string(),
            auth::require_api_key,
        ));
    }

    Router::new()
        .nest("/v1", v1.with_state(state))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
}
