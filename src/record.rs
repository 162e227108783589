// src/record.rs

//! Observable result of one pipeline run.
//!
//! A [`RunRecord`] is owned by exactly one run. The engine's event loop is its
//! only writer; everything else sees snapshots (clones). Every task id of the
//! graph has an entry in [`RunRecord::attempts`], empty if the task was never
//! reached.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::TaskId;
use crate::errors::PipedagError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl AttemptStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AttemptStatus::Pending => "pending",
            AttemptStatus::Running => "running",
            AttemptStatus::Succeeded => "succeeded",
            AttemptStatus::Failed => "failed",
            AttemptStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// One execution instance of a task within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAttempt {
    pub task_id: TaskId,
    /// 1-based.
    pub attempt_number: u32,
    pub status: AttemptStatus,
    pub error: Option<String>,
    pub output: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl TaskAttempt {
    pub fn new(task_id: TaskId, attempt_number: u32, now: DateTime<Utc>) -> Self {
        Self {
            task_id,
            attempt_number,
            status: AttemptStatus::Pending,
            error: None,
            output: None,
            created_at: now,
            started_at: None,
            ended_at: None,
        }
    }

    /// Pending -> Running. Returns `false` (and changes nothing) from any
    /// other state.
    pub fn start(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != AttemptStatus::Pending {
            return false;
        }
        self.status = AttemptStatus::Running;
        self.started_at = Some(now);
        true
    }

    /// Move to a terminal state. Terminal states are write-once: returns
    /// `false` if the attempt already ended.
    pub fn finish(
        &mut self,
        status: AttemptStatus,
        error: Option<String>,
        output: Option<Value>,
        now: DateTime<Utc>,
    ) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.error = error;
        self.output = output;
        self.ended_at = Some(now);
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub pipeline_id: String,
    pub status: RunStatus,
    /// Set when the run was aborted by an operator request.
    #[serde(default)]
    pub cancelled: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub attempts: BTreeMap<TaskId, Vec<TaskAttempt>>,
}

impl RunRecord {
    pub fn new<'a>(
        run_id: impl Into<String>,
        pipeline_id: impl Into<String>,
        task_ids: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            pipeline_id: pipeline_id.into(),
            status: RunStatus::Pending,
            cancelled: false,
            started_at: None,
            ended_at: None,
            attempts: task_ids
                .into_iter()
                .map(|id| (id.to_string(), Vec::new()))
                .collect(),
        }
    }

    /// All attempts of a task, oldest first.
    pub fn attempts_of(&self, task: &str) -> &[TaskAttempt] {
        self.attempts.get(task).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn latest_attempt(&self, task: &str) -> Option<&TaskAttempt> {
        self.attempts_of(task).last()
    }

    pub(crate) fn latest_attempt_mut(&mut self, task: &str) -> Option<&mut TaskAttempt> {
        self.attempts.get_mut(task).and_then(|v| v.last_mut())
    }

    /// Status of the task's most recent attempt, `None` if it never got one.
    pub fn task_status(&self, task: &str) -> Option<AttemptStatus> {
        self.latest_attempt(task).map(|a| a.status)
    }

    pub(crate) fn push_attempt(&mut self, attempt: TaskAttempt) {
        self.attempts
            .entry(attempt.task_id.clone())
            .or_default()
            .push(attempt);
    }

    /// Ids of tasks whose latest attempt has the given status.
    pub fn tasks_with_status(&self, status: AttemptStatus) -> Vec<&str> {
        self.attempts
            .iter()
            .filter(|(_, attempts)| attempts.last().map(|a| a.status) == Some(status))
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Map a finished record onto the CLI's error taxonomy.
    pub fn ensure_succeeded(&self) -> Result<(), PipedagError> {
        match self.status {
            RunStatus::Succeeded => Ok(()),
            _ if self.cancelled => Err(PipedagError::Cancelled(self.run_id.clone())),
            _ => Err(PipedagError::RunFailed(self.run_id.clone())),
        }
    }
}

impl fmt::Display for RunRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "run {} (pipeline {})", self.run_id, self.pipeline_id)?;
        write!(f, "  status: {:?}", self.status)?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        writeln!(f)?;
        if let Some(started) = self.started_at {
            writeln!(f, "  started_at: {}", started.to_rfc3339())?;
        }
        if let Some(ended) = self.ended_at {
            writeln!(f, "  ended_at: {}", ended.to_rfc3339())?;
        }
        writeln!(f, "  tasks ({}):", self.attempts.len())?;
        for (task, attempts) in &self.attempts {
            match attempts.last() {
                None => writeln!(f, "    - {task}: not started")?,
                Some(last) => {
                    write!(
                        f,
                        "    - {task}: {} (attempts: {})",
                        last.status,
                        attempts.len()
                    )?;
                    if let Some(ref err) = last.error {
                        write!(f, " error: {err}")?;
                    }
                    writeln!(f)?;
                }
            }
        }
        Ok(())
    }
}
