//! CLI argument definitions for the `boxed` entry point.
//!
//! `serve` runs the control plane in-process; every other subcommand talks
//! to a running server over its HTTP/WebSocket API.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Boxed sandbox orchestration platform
#[derive(Parser)]
#[command(
    name = "boxed",
    version,
    about = "Provision ephemeral sandboxes and run untrusted code in them"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    pub json_log: bool,

    /// API key for authentication
    #[arg(long, global = true, env = "BOXED_API_KEY")]
    pub api_key: Option<String>,

    /// Base URL of the control plane
    #[arg(long, global = true, default_value = "http://localhost:8080")]
    pub api_url: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the control plane server
    Serve {
        /// HTTP server port
        #[arg(short, long, env = "PORT", default_value_t = 8080)]
        port: u16,

        /// Backend driver
        #[arg(short, long, default_value = "docker")]
        driver: String,

        /// Host path of the agent binary mounted into sandboxes
        #[arg(long, env = "BOXED_AGENT_PATH")]
        agent_path: Option<PathBuf>,

        /// Hard deadline for a single execution, in seconds
        #[arg(long, default_value_t = 300)]
        exec_timeout: u64,
    },

    /// Run code in an ephemeral sandbox
    Run {
        /// The code to execute
        code: String,

        /// Template or image for the sandbox
        #[arg(short, long, default_value = "")]
        template: String,

        /// Sandbox lifetime in seconds
        #[arg(long, default_value_t = 300)]
        timeout: u64,

        /// Language of the submitted code
        #[arg(short, long, default_value = "python")]
        language: String,
    },

    /// Start an interactive session in a sandbox
    Repl {
        /// Sandbox ID
        id: String,

        /// In-sandbox shell (bash default, python supported)
        #[arg(long)]
        lang: Option<String>,
    },

    /// List active sandboxes
    List,

    /// Manage files in a sandbox
    Fs {
        #[command(subcommand)]
        command: FsCommands,
    },
}

#[derive(Subcommand)]
pub enum FsCommands {
    /// List files in a directory
    Ls {
        /// Sandbox ID, optionally as ID:PATH
        id: String,

        /// Directory to list
        path: Option<String>,
    },

    /// Upload a local file into a sandbox directory
    Cp {
        /// Local file to upload
        local: PathBuf,

        /// Destination as ID:DIR (the filename is kept)
        remote: String,
    },
}
