//! Compute-or-load persistence for intermediate pipeline results.
//!
//! The engine itself never touches the filesystem; callers wrap expensive
//! steps (source aggregation, normalization) in [`Checkpoint::compute_or_load`]
//! so a rerun picks up where the last one stopped.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::document::write_atomic;
use crate::{DistributionError, Result};

pub trait Checkpoint {
    /// Stored JSON for `name`, if present.
    fn load(&self, name: &str) -> Result<Option<String>>;

    fn store(&self, name: &str, json: &str) -> Result<()>;

    /// Return the stored value for `name`, or run `compute` and store its
    /// result.
    fn compute_or_load<T, E, F>(&self, name: &str, compute: F) -> std::result::Result<T, E>
    where
        Self: Sized,
        T: Serialize + DeserializeOwned,
        E: From<DistributionError>,
        F: FnOnce() -> std::result::Result<T, E>,
    {
        if let Some(json) = self.load(name)? {
            let value = serde_json::from_str(&json).map_err(DistributionError::from)?;
            info!("Loaded checkpoint '{}'", name);
            return Ok(value);
        }
        let value = compute()?;
        let json = serde_json::to_string_pretty(&value).map_err(DistributionError::from)?;
        self.store(name, &json)?;
        debug!("Stored checkpoint '{}'", name);
        Ok(value)
    }
}

/// One `<name>.json` file per checkpoint under `dir`.
#[derive(Debug, Clone)]
pub struct JsonCheckpoint {
    dir: PathBuf,
}

impl JsonCheckpoint {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
            && !name.starts_with('.');
        if !valid {
            return Err(DistributionError::InvalidCheckpointName(name.to_string()));
        }
        Ok(self.dir.join(format!("{name}.json")))
    }

    /// Delete a stored checkpoint. Missing files are not an error.
    pub fn invalidate(&self, name: &str) -> Result<()> {
        match std::fs::remove_file(self.path_for(name)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Checkpoint for JsonCheckpoint {
    fn load(&self, name: &str) -> Result<Option<String>> {
        match std::fs::read_to_string(self.path_for(name)?) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, name: &str, json: &str) -> Result<()> {
        write_atomic(&self.path_for(name)?, json)?;
        Ok(())
    }
}

/// Always recomputes, stores nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCheckpoint;

impl Checkpoint for NoCheckpoint {
    fn load(&self, _name: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn store(&self, _name: &str, _json: &str) -> Result<()> {
        Ok(())
    }
}
