// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{JobFile, RawJobFile};
use crate::errors::Result;

/// Load a job file from a given path and return the raw `RawJobFile`.
///
/// This only performs TOML deserialization; it does **not** validate the
/// job graph. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawJobFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    let raw: RawJobFile = toml::from_str(&contents)?;
    debug!(path = %path.display(), tasks = raw.task.len(), "job file parsed");
    Ok(raw)
}

/// Load a job file and run it through the same validation as job
/// submission (names, references, blocks, flow declarations, cycles).
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<JobFile> {
    let raw = load_from_path(&path)?;
    JobFile::try_from(raw)
}

/// Default job file: `Flowsched.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Flowsched.toml")
}
