// src/dag/task_info.rs

//! Per-run task state and the unit handed to the executor.

use std::sync::Arc;

use crate::dag::task::{RetryPolicy, Task, TaskContext, TaskRun};
use crate::engine::TaskId;
use crate::types::TriggerRule;

/// Per-run state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRunState {
    /// Some upstream member is not terminal yet.
    Waiting,
    /// An attempt exists and is queued for a free concurrency slot.
    Pending,
    /// An attempt has been dispatched to the executor.
    Running,
    /// The last attempt failed; another one is due after the retry delay.
    AwaitingRetry,
    Succeeded,
    Failed,
    Skipped,
}

impl TaskRunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

/// Static task information from the graph, plus per-run state.
#[derive(Debug, Clone)]
pub(crate) struct TaskInfo {
    pub(crate) id: TaskId,
    pub(crate) run: Arc<dyn TaskRun>,
    pub(crate) retry: RetryPolicy,
    pub(crate) trigger_rule: TriggerRule,
    /// Direct upstream members.
    pub(crate) upstream: Vec<TaskId>,

    pub(crate) run_state: TaskRunState,
    /// Number of attempts created in this run (skips included).
    pub(crate) attempts_made: u32,
}

impl TaskInfo {
    pub(crate) fn from_task(task: &Task, upstream: Vec<TaskId>) -> Self {
        Self {
            id: task.id.clone(),
            run: Arc::clone(&task.run),
            retry: task.retry,
            trigger_rule: task.trigger_rule,
            upstream,
            run_state: TaskRunState::Waiting,
            attempts_made: 0,
        }
    }
}

/// An attempt the scheduler wants the executor to run now.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub task_id: TaskId,
    pub pipeline_id: String,
    pub run_id: String,
    /// 1-based attempt number.
    pub attempt: u32,
    pub run: Arc<dyn TaskRun>,
}

impl ScheduledTask {
    pub(crate) fn from_task_info(info: &TaskInfo, pipeline_id: &str, run_id: &str) -> Self {
        Self {
            task_id: info.id.clone(),
            pipeline_id: pipeline_id.to_string(),
            run_id: run_id.to_string(),
            attempt: info.attempts_made,
            run: Arc::clone(&info.run),
        }
    }

    pub fn context(&self) -> TaskContext {
        TaskContext {
            pipeline_id: self.pipeline_id.clone(),
            run_id: self.run_id.clone(),
            task_id: self.task_id.clone(),
            attempt: self.attempt,
        }
    }
}
