// src/dag/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use std::time::Duration;

use crate::dag::task_info::ScheduledTask;
use crate::engine::TaskId;

/// A failed attempt that should be retried after `delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryRequest {
    pub task: TaskId,
    pub delay: Duration,
}

/// Structured result of a single scheduler "step".
///
/// This is useful for tests that want to manually step the DAG and make
/// assertions about what changed.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Attempts that were dispatched (marked `Running`) by this step.
    pub newly_scheduled: Vec<ScheduledTask>,
    /// Retries to arm a timer for.
    pub retries: Vec<RetryRequest>,
    /// Tasks that reached terminal `Failed` in this step.
    pub newly_failed: Vec<TaskId>,
    /// Tasks that were skipped in this step (failure propagation or
    /// cancellation).
    pub newly_skipped: Vec<TaskId>,
    /// Whether this step finished the run.
    pub run_just_finished: bool,
}

impl SchedulerStep {
    pub(crate) fn merge(&mut self, other: SchedulerStep) {
        self.newly_scheduled.extend(other.newly_scheduled);
        self.retries.extend(other.retries);
        self.newly_failed.extend(other.newly_failed);
        self.newly_skipped.extend(other.newly_skipped);
        self.run_just_finished |= other.run_just_finished;
    }
}
