//! Boxed - sandbox orchestration for untrusted code
//!
//! `boxed serve` runs the control plane; the remaining subcommands are
//! clients of its HTTP/WebSocket API. The CLI exits non-zero on connection
//! or protocol failures; sandbox process exit codes are surfaced in the
//! command output instead.

mod cli;
mod client;
mod commands;

use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, FsCommands};
use client::ApiClient;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    let result = dispatch(&cli).await;
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: &Cli) -> anyhow::Result<()> {
    let client = ApiClient::new(cli.api_url.clone(), cli.api_key.clone());

    match &cli.command {
        Commands::Serve {
            port,
            driver,
            agent_path,
            exec_timeout,
        } => {
            commands::serve::run(
                *port,
                driver,
                agent_path.clone(),
                *exec_timeout,
                cli.api_key.clone(),
            )
            .await
        }
        Commands::Run {
            code,
            template,
            timeout,
            language,
        } => commands::run::run(&client, code, template, *timeout, language).await,
        Commands::Repl { id, lang } => commands::repl::run(&client, id, lang.as_deref()).await,
        Commands::List => commands::list::run(&client).await,
        Commands::Fs { command } => match command {
            FsCommands::Ls { id, path } => commands::files::ls(&client, id, path.as_deref()).await,
            FsCommands::Cp { local, remote } => commands::files::cp(&client, local, remote).await,
        },
    }
}

fn init_logging(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose {
            "debug,hyper=info"
        } else {
            "info"
        })
    });

    // Structured logs in production, human-readable everywhere else.
    let json = cli.json_log || std::env::var("BOXED_ENV").as_deref() == Ok("production");
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}
