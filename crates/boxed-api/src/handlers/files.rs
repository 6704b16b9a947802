//! Sandbox filesystem endpoints
//!
//! Uploads name a destination *directory* in the `path` form field; the
//! stored file keeps the original multipart filename. Renaming on upload is
//! deliberately unsupported.

use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::header,
    response::Response,
    Json,
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

use boxed_driver::{Driver, FileEntry};

use crate::error::{ApiError, Result};
use crate::AppState;

/// Default destination directory for uploads without a `path` field.
const DEFAULT_UPLOAD_DIR: &str = "/uploads";

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FilesResponse {
    pub files: Vec<FileEntry>,
}

pub async fn list_files(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
) -> Result<Json<FilesResponse>> {
    let path = query.path.unwrap_or_else(|| "/".to_string());
    let files = state.driver.list_files(&id, &path).await?;
    Ok(Json(FilesResponse { files }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub status: String,
    pub path: String,
}

pub async fn upload_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    let mut dest_dir = DEFAULT_UPLOAD_DIR.to_string();
    let mut upload: Option<(String, bytes::Bytes)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("path") => {
                dest_dir = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("invalid path field: {e}")))?;
            }
            Some("file") => {
                let name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| ApiError::BadRequest("file part needs a filename".into()))?;
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("failed to read file part: {e}")))?;
                upload = Some((name, data));
            }
            _ => {}
        }
    }

    let (name, data) = upload.ok_or_else(|| ApiError::BadRequest("file required".to_string()))?;
    let full_path = format!("{}/{}", dest_dir.trim_end_matches('/'), name);

    state.driver.put_file(&id, &full_path, data).await?;

    Ok(Json(UploadResponse {
        status: "uploaded".to_string(),
        path: full_path,
    }))
}

pub async fn download_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
) -> Result<Response> {
    let path = query
        .path
        .ok_or_else(|| ApiError::BadRequest("path required".to_string()))?;

    let reader = state.driver.get_file(&id, &path).await?;
    let body = Body::from_stream(ReaderStream::new(reader));

    Response::builder()
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .body(body)
        .map_err(|e| ApiError::Internal(format!("failed to build response: {e}")))
}
