//! `boxed fs` - sandbox filesystem helpers

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::client::ApiClient;

/// Split `ID:/path` remote syntax. Returns `None` when there is no path part.
fn split_remote(remote: &str) -> Option<(&str, &str)> {
    let (id, path) = remote.split_once(':')?;
    if id.is_empty() || path.is_empty() {
        return None;
    }
    Some((id, path))
}

pub async fn ls(client: &ApiClient, id: &str, path: Option<&str>) -> Result<()> {
    let (id, path) = match split_remote(id) {
        Some((id, remote_path)) => (id, remote_path.to_string()),
        None => (id, path.unwrap_or("/").to_string()),
    };

    let files = client.list_files(id, &path).await?;

    println!("{:<12} {:>10}  {:<20} {}", "MODE", "SIZE", "UPDATED", "NAME");
    for file in files {
        let mode = if file.is_dir {
            "drwxr-xr-x"
        } else {
            "-rw-r--r--"
        };
        println!(
            "{:<12} {:>10}  {:<20} {}",
            mode,
            file.size,
            file.last_modified.format("%Y-%m-%d %H:%M:%S"),
            file.name
        );
    }
    Ok(())
}

pub async fn cp(client: &ApiClient, local: &Path, remote: &str) -> Result<()> {
    let Some((id, dest_dir)) = split_remote(remote) else {
        bail!("invalid remote format; use ID:/path/to/dir");
    };

    let data = std::fs::read(local)
        .with_context(|| format!("failed to read local file {}", local.display()))?;
    let file_name = local
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .context("local path has no file name")?;

    // The destination is a directory; the upload keeps the local filename.
    let uploaded = client.upload_file(id, dest_dir, &file_name, data).await?;
    println!("Uploaded to {}", uploaded.path);
    Ok(())
}
