//! Subcommand implementations

pub mod files;
pub mod list;
pub mod repl;
pub mod run;
pub mod serve;
