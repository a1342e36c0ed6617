//! Durable per-job checkpoints.
//!
//! One JSON object per job, mapping page index (as a string key) to page
//! text, rewritten in full after every page:
//!
//! ```json
//! {"2": "first page text", "3": "", "4": "--BLANK--"}
//! ```
//!
//! The escalation state lives next to it in `<job_id>.state.json`, so a
//! resumed job continues a cooldown or a permanent fallback instead of
//! starting over in `Normal`:
//!
//! ```json
//! {"mode": {"mode": "cooldown", "remaining": 3}, "consecutive_primary_failures": 2}
//! ```
//!
//! Writes go to a temp file in the same directory followed by a rename, so a
//! crash mid-write leaves the previous checkpoint intact.

use crate::error::WikiscanError;
use crate::orchestrator::state::EngineSnapshot;
use crate::output::PageResultMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Storage for [`PageResultMap`]s, partitioned by job id.
pub trait CheckpointStore: Send + Sync {
    /// Load a job's map; a job that never ran yields an empty map.
    fn load(&self, job_id: &str) -> Result<PageResultMap, WikiscanError>;

    /// Replace a job's map atomically.
    fn save(&self, job_id: &str, results: &PageResultMap) -> Result<(), WikiscanError>;

    /// Load a job's escalation state; `None` when none was saved.
    fn load_state(&self, job_id: &str) -> Result<Option<EngineSnapshot>, WikiscanError>;

    /// Replace a job's escalation state atomically.
    fn save_state(&self, job_id: &str, state: &EngineSnapshot) -> Result<(), WikiscanError>;
}

/// Whether a checkpointed page counts as done on resume.
///
/// Empty text marks a dual failure and is retried.
pub fn is_complete(text: &str) -> bool {
    !text.trim().is_empty()
}

/// Reject job ids that could escape the checkpoint directory.
pub fn validate_job_id(job_id: &str) -> Result<(), WikiscanError> {
    let ok = !job_id.is_empty()
        && !job_id.starts_with('.')
        && job_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if ok {
        Ok(())
    } else {
        Err(WikiscanError::InvalidConfig(format!(
            "job id '{job_id}' may only contain letters, digits, '.', '_' and '-'"
        )))
    }
}

/// [`CheckpointStore`] writing `<dir>/<job_id>.json`.
#[derive(Debug, Clone)]
pub struct JsonCheckpointStore {
    dir: PathBuf,
}

impl JsonCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, job_id: &str) -> PathBuf {
        self.dir.join(format!("{job_id}.json"))
    }

    pub fn state_path_for(&self, job_id: &str) -> PathBuf {
        self.dir.join(format!("{job_id}.state.json"))
    }

    /// Delete a job's checkpoint and state. Missing files are not an error.
    pub fn remove(&self, job_id: &str) -> Result<(), WikiscanError> {
        validate_job_id(job_id)?;
        for path in [self.path_for(job_id), self.state_path_for(job_id)] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(WikiscanError::CheckpointWrite { path, source }),
            }
        }
        Ok(())
    }

    /// Read `path`; a missing file yields `None`.
    fn read_json<T: DeserializeOwned>(path: PathBuf) -> Result<Option<T>, WikiscanError> {
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(WikiscanError::CheckpointRead {
                    path,
                    detail: e.to_string(),
                })
            }
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| WikiscanError::CheckpointRead {
                path,
                detail: e.to_string(),
            })
    }

    /// Temp file in the same directory, fsync, rename over `path`.
    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), WikiscanError> {
        let write_err = |source: std::io::Error| WikiscanError::CheckpointWrite {
            path: path.to_path_buf(),
            source,
        };

        std::fs::create_dir_all(&self.dir).map_err(write_err)?;
        let json = serde_json::to_vec(value).map_err(|e| write_err(std::io::Error::other(e)))?;

        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(write_err)?;
        tmp.write_all(&json).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(path).map_err(|e| write_err(e.error))?;
        Ok(())
    }
}

impl CheckpointStore for JsonCheckpointStore {
    fn load(&self, job_id: &str) -> Result<PageResultMap, WikiscanError> {
        validate_job_id(job_id)?;
        let path = self.path_for(job_id);
        let map: PageResultMap = Self::read_json(path.clone())?.unwrap_or_default();
        debug!("Loaded checkpoint {} ({} pages)", path.display(), map.len());
        Ok(map)
    }

    fn save(&self, job_id: &str, results: &PageResultMap) -> Result<(), WikiscanError> {
        validate_job_id(job_id)?;
        let path = self.path_for(job_id);
        self.write_json(&path, results)?;
        debug!("Checkpoint {} ← {} pages", path.display(), results.len());
        Ok(())
    }

    fn load_state(&self, job_id: &str) -> Result<Option<EngineSnapshot>, WikiscanError> {
        validate_job_id(job_id)?;
        Self::read_json(self.state_path_for(job_id))
    }

    fn save_state(&self, job_id: &str, state: &EngineSnapshot) -> Result<(), WikiscanError> {
        validate_job_id(job_id)?;
        self.write_json(&self.state_path_for(job_id), state)
    }
}
