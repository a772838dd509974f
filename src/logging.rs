// src/logging.rs

//! Logging setup for `flowsched` using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the filter:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `FLOWSCHED_LOG` environment variable: a level ("debug") or full
//!    directives ("info,flowsched::dag=trace")
//! 3. default to `info`
//!
//! Logs are sent to STDERR; stdout carries the job result as JSON.

use anyhow::{Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogLevel;

pub const LOG_ENV: &str = "FLOWSCHED_LOG";

/// Initialise global logging subscriber.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = match cli_level {
        Some(lvl) => EnvFilter::new(directive_for(lvl)),
        None => filter_from_env(std::env::var(LOG_ENV).ok().as_deref()),
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("failed to install log subscriber: {e}"))?;

    Ok(())
}

fn directive_for(lvl: LogLevel) -> &'static str {
    match lvl {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}

/// Filter from the raw env value; unparsable or empty values fall back to
/// `info`.
fn filter_from_env(value: Option<&str>) -> EnvFilter {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| if s.eq_ignore_ascii_case("warning") { "warn" } else { s })
        .and_then(|s| EnvFilter::try_new(s).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}
