// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! Task-level failures never show up here: they are recorded in the
//! [`RunRecord`](crate::record::RunRecord) of the run they belong to. This
//! enum covers graph construction, configuration, the run controller and the
//! CLI plumbing around it.

use std::path::PathBuf;

use thiserror::Error;

use crate::engine::TaskId;

#[derive(Error, Debug)]
pub enum PipedagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// An edge references a task id that was never declared.
    #[error("Task not found: '{task}' (referenced by '{referenced_by}')")]
    TaskNotFound { task: TaskId, referenced_by: TaskId },

    #[error("Duplicate task id: {0}")]
    DuplicateTask(TaskId),

    /// The task graph contains a cycle; the payload names one node on it.
    #[error("cycle detected in task graph involving task '{0}'")]
    DagCycle(TaskId),

    #[error("Pipeline not found: {0}")]
    PipelineNotFound(String),

    /// A run of this pipeline is already active.
    #[error("pipeline '{0}' already has an active run")]
    AlreadyRunning(String),

    /// The lock file of another run is present. A holder that died without
    /// cleaning up leaves it behind; deleting the file releases the pipeline.
    #[error("pipeline '{pipeline}' is locked by run '{holder}' (lock file {})", path.display())]
    RunLocked {
        pipeline: String,
        holder: String,
        path: PathBuf,
    },

    /// The run was aborted by an operator request.
    #[error("run '{0}' was cancelled")]
    Cancelled(String),

    /// The run finished with at least one failed task.
    #[error("run '{0}' failed")]
    RunFailed(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipedagError {
    /// Process exit code used by the CLI for this error.
    ///
    /// - `1`: the run finished but failed
    /// - `3`: another run of the same pipeline is active or holds the lock
    /// - `4`: configuration, IO or any other error
    /// - `130`: the run was cancelled (Ctrl-C)
    pub fn exit_code(&self) -> i32 {
        match self {
            PipedagError::RunFailed(_) => 1,
            PipedagError::AlreadyRunning(_) | PipedagError::RunLocked { .. } => 3,
            PipedagError::Cancelled(_) => 130,
            _ => 4,
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, PipedagError>;
