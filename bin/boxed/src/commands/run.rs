//! `boxed run` - one-shot code execution
//!
//! Creates a sandbox, executes the code, prints the output, saves any inline
//! artifacts under `./artifacts/`, and tears the sandbox down. The sandbox
//! process exit code is reported in the output, not as the CLI exit code.

use anyhow::{Context, Result};
use base64::Engine;
use std::io::Write;
use std::path::Path;

use crate::client::ApiClient;

pub async fn run(client: &ApiClient, code: &str, template: &str, timeout: u64, language: &str) -> Result<()> {
    let created = client
        .create_sandbox(template, timeout, Vec::new())
        .await
        .context("failed to create sandbox")?;
    let id = created.sandbox_id;
    println!("📦 Sandbox {id} created");

    let result = match client.exec(&id, language, code).await {
        Ok(result) => result,
        Err(err) => {
            let _ = client.stop(&id).await;
            return Err(err.context("execution failed"));
        }
    };

    print!("{}", result.stdout);
    std::io::stdout().flush().ok();
    if !result.stderr.is_empty() {
        eprint!("{}", result.stderr);
    }

    if !result.artifacts.is_empty() {
        let dir = Path::new("artifacts");
        std::fs::create_dir_all(dir).context("failed to create artifacts directory")?;
        println!("\n📂 Artifacts:");
        for artifact in &result.artifacts {
            let Some(encoded) = &artifact.data_base64 else {
                if let Some(url) = &artifact.url {
                    println!("  - {} (remote: {url})", artifact.path);
                }
                continue;
            };
            let data = match base64::engine::general_purpose::STANDARD.decode(encoded) {
                Ok(data) => data,
                Err(err) => {
                    println!("  - failed to decode {}: {err}", artifact.path);
                    continue;
                }
            };
            let file_name = Path::new(&artifact.path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "artifact".to_string());
            let local = dir.join(&file_name);
            let size = data.len();
            std::fs::write(&local, data)
                .with_context(|| format!("failed to write {}", local.display()))?;
            println!("  - {} ({size} bytes)", local.display());
        }
    }

    if let Some(code) = result.exit_code {
        if code != 0 {
            eprintln!("\n[process exited with code {code}]");
        }
    } else {
        eprintln!("\n[process ended without an exit event]");
    }

    if !client.stop(&id).await.context("cleanup failed")? {
        tracing::debug!(sandbox = %id, "sandbox already reclaimed");
    }
    Ok(())
}
