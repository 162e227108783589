// src/store.rs

//! Persistence of run records and the cross-process run lock.
//!
//! Layout under the state directory:
//!
//! ```text
//! <state_dir>/runs/<run_id>.json     one serialized RunRecord per run
//! <state_dir>/locks/<pipeline>.lock  present while a run of <pipeline> is active
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::errors::{PipedagError, Result};
use crate::fs::FileSystem;
use crate::record::RunRecord;

#[derive(Clone)]
pub struct RunStore {
    fs: Arc<dyn FileSystem>,
    root: PathBuf,
}

impl fmt::Debug for RunStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunStore").field("root", &self.root).finish()
    }
}

impl RunStore {
    pub fn new(fs: Arc<dyn FileSystem>, root: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, run_id: &str) -> PathBuf {
        self.root.join("runs").join(format!("{run_id}.json"))
    }

    fn lock_path(&self, pipeline_id: &str) -> PathBuf {
        self.root.join("locks").join(format!("{pipeline_id}.lock"))
    }

    /// Write (or overwrite) the record of a run.
    pub fn save(&self, record: &RunRecord) -> Result<()> {
        let path = self.record_path(&record.run_id);
        let json = serde_json::to_vec_pretty(record)?;
        self.fs.write(&path, &json)?;
        debug!(run_id = %record.run_id, path = ?path, "run record saved");
        Ok(())
    }

    /// Load a persisted record, failing with `RunNotFound` if there is none.
    pub fn load(&self, run_id: &str) -> Result<RunRecord> {
        let path = self.record_path(run_id);
        if !self.fs.is_file(&path) {
            return Err(PipedagError::RunNotFound(run_id.to_string()));
        }
        let text = self.fs.read_to_string(&path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Ids of every persisted run, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let dir = self.root.join("runs");
        if !self.fs.is_dir(&dir) {
            return Ok(Vec::new());
        }
        let mut ids: Vec<String> = self
            .fs
            .read_dir(&dir)?
            .into_iter()
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Take the run lock of a pipeline.
    ///
    /// Fails with `RunLocked` while another holder (in this or another
    /// process) keeps the lock file. The lock is released when the returned
    /// guard is dropped.
    pub fn acquire_lock(&self, pipeline_id: &str, run_id: &str) -> Result<RunLock> {
        let path = self.lock_path(pipeline_id);
        if !self.fs.create_new(&path, run_id.as_bytes())? {
            let holder = self
                .fs
                .read_to_string(&path)
                .map(|s| s.trim().to_string())
                .unwrap_or_else(|_| "unknown".to_string());
            warn!(
                pipeline = %pipeline_id,
                holder = %holder,
                path = ?path,
                "run lock held; remove the file if that run is no longer alive"
            );
            return Err(PipedagError::RunLocked {
                pipeline: pipeline_id.to_string(),
                holder,
                path,
            });
        }
        debug!(pipeline = %pipeline_id, path = ?path, "run lock acquired");
        Ok(RunLock {
            fs: Arc::clone(&self.fs),
            path,
        })
    }
}

/// Guard for a held run lock; removes the lock file on drop.
pub struct RunLock {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
}

impl fmt::Debug for RunLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunLock").field("path", &self.path).finish()
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = self.fs.remove_file(&self.path) {
            warn!(path = ?self.path, error = %e, "failed to release run lock");
        } else {
            debug!(path = ?self.path, "run lock released");
        }
    }
}
