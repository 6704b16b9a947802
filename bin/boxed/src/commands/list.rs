//! `boxed list` - tabulate active sandboxes

use anyhow::Result;

use crate::client::ApiClient;

pub async fn run(client: &ApiClient) -> Result<()> {
    let sandboxes = client.list().await?;

    println!("{:<66} {:<10} {:<8} {}", "ID", "STATE", "DRIVER", "CREATED");
    for sandbox in sandboxes {
        println!(
            "{:<66} {:<10} {:<8} {}",
            sandbox.id,
            sandbox.state.to_string(),
            sandbox.driver_type,
            sandbox.created_at.to_rfc3339()
        );
    }
    Ok(())
}
