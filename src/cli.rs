// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `flowsched`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "flowsched",
    version,
    about = "Schedule a task-flow job (LOOP / REPLICATE / IF) and print its result.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the job file (TOML).
    ///
    /// Default: `Flowsched.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Flowsched.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `FLOWSCHED_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the task graph, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Write the final job snapshot (JSON) to this path.
    #[arg(long, value_name = "PATH")]
    pub snapshot: Option<String>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
