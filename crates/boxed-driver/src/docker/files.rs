//! Tar-based filesystem operations against the engine archive API
//!
//! The engine speaks tar for both directions: downloads arrive as a tar
//! stream of the requested path, uploads are a tar archive extracted into a
//! destination directory.

use bollard::container::{DownloadFromContainerOptions, UploadToContainerOptions};
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use futures_util::StreamExt;
use std::io::{Cursor, Read};
use std::path::Path;

use super::DockerDriver;
use crate::config::FileEntry;
use crate::error::{DriverError, Result};

pub(super) async fn list_files(
    driver: &DockerDriver,
    id: &str,
    path: &str,
) -> Result<Vec<FileEntry>> {
    let abs = resolve_path(driver, id, path).await?;
    let archive = fetch_archive(driver, id, &abs).await?;

    let mut reader = tar::Archive::new(Cursor::new(archive));
    let mut entries = Vec::new();

    for entry in reader
        .entries()
        .map_err(|e| DriverError::Backend(format!("tar read error: {e}")))?
    {
        let entry = entry.map_err(|e| DriverError::Backend(format!("tar read error: {e}")))?;
        let header = entry.header();

        let raw_path = entry
            .path()
            .map_err(|e| DriverError::Backend(format!("tar entry path error: {e}")))?
            .to_string_lossy()
            .into_owned();
        let trimmed = raw_path.trim_start_matches('/').to_string();

        let name = Path::new(&trimmed)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| trimmed.clone());

        let last_modified = header
            .mtime()
            .ok()
            .and_then(|secs| Utc.timestamp_opt(secs as i64, 0).single())
            .unwrap_or_else(Utc::now);

        entries.push(FileEntry {
            name,
            path: trimmed,
            size: header.size().unwrap_or(0),
            mode: header.mode().unwrap_or(0),
            is_dir: header.entry_type().is_dir(),
            last_modified,
        });
    }

    Ok(entries)
}

pub(super) async fn put_file(
    driver: &DockerDriver,
    id: &str,
    path: &str,
    content: Bytes,
) -> Result<()> {
    let abs = resolve_path(driver, id, path).await?;

    let target = Path::new(&abs);
    let file_name = target
        .file_name()
        .ok_or_else(|| DriverError::InvalidConfig(format!("'{abs}' has no file name")))?
        .to_string_lossy()
        .into_owned();
    // The archive lands in the directory containing the file.
    let dir = target
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "/".to_string());

    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(Utc::now().timestamp().max(0) as u64);
    builder
        .append_data(&mut header, &file_name, &content[..])
        .map_err(|e| DriverError::Backend(format!("tar write failed: {e}")))?;
    let archive = builder
        .into_inner()
        .map_err(|e| DriverError::Backend(format!("tar close failed: {e}")))?;

    driver
        .docker
        .upload_to_container(
            id,
            Some(UploadToContainerOptions {
                path: dir,
                ..Default::default()
            }),
            archive.into(),
        )
        .await
        .map_err(|e| DriverError::Backend(format!("engine copy failed: {e}")))
}

pub(super) async fn get_file(
    driver: &DockerDriver,
    id: &str,
    path: &str,
) -> Result<Box<dyn tokio::io::AsyncRead + Send + Unpin>> {
    let abs = resolve_path(driver, id, path).await?;
    let archive = fetch_archive(driver, id, &abs).await?;

    // The engine wraps the file in a tar stream; the payload of the first
    // entry is the file content.
    let mut reader = tar::Archive::new(Cursor::new(archive));
    let mut entries = reader
        .entries()
        .map_err(|e| DriverError::Backend(format!("tar read error: {e}")))?;
    let mut first = entries
        .next()
        .ok_or_else(|| DriverError::Backend(format!("'{abs}' missing from archive")))?
        .map_err(|e| DriverError::Backend(format!("tar read error: {e}")))?;

    let mut data = Vec::with_capacity(first.size() as usize);
    first
        .read_to_end(&mut data)
        .map_err(|e| DriverError::Backend(format!("tar payload read error: {e}")))?;

    Ok(Box::new(Cursor::new(data)))
}

/// Resolve a path against the container's working directory when relative.
async fn resolve_path(driver: &DockerDriver, id: &str, path: &str) -> Result<String> {
    if path.starts_with('/') {
        return Ok(path.to_string());
    }
    let inspect = driver
        .docker
        .inspect_container(id, None)
        .await
        .map_err(|e| driver.map_err(id, e))?;
    let work_dir = inspect
        .config
        .and_then(|c| c.working_dir)
        .filter(|w| !w.is_empty())
        .unwrap_or_else(|| "/".to_string());
    Ok(format!("{}/{}", work_dir.trim_end_matches('/'), path))
}

/// Download `path` from the container as a complete tar archive.
async fn fetch_archive(driver: &DockerDriver, id: &str, path: &str) -> Result<Vec<u8>> {
    let mut stream = driver.docker.download_from_container(
        id,
        Some(DownloadFromContainerOptions {
            path: path.to_string(),
        }),
    );

    let mut archive = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk =
            chunk.map_err(|e| DriverError::Backend(format!("failed to read '{path}': {e}")))?;
        archive.extend_from_slice(&chunk);
    }
    Ok(archive)
}
