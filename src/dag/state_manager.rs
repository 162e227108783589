// src/dag/state_manager.rs

//! Per-run state management for tasks in the scheduler.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::dag::Graph;
use crate::dag::task_info::{ScheduledTask, TaskInfo, TaskRunState};
use crate::engine::TaskId;
use crate::record::{AttemptStatus, RunRecord, TaskAttempt};
use crate::types::{SkipPolicy, TriggerRule};

/// Error message recorded on attempts skipped by a cancellation.
pub const CANCELLED: &str = "cancelled";

/// Whether a waiting task may get an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Some upstream member is still in flight.
    Blocked,
    /// The join condition holds.
    Ready,
    /// The join condition can never hold; the payload says why.
    Skip(String),
}

/// Manages per-run state transitions for tasks.
///
/// Every transition is mirrored into the [`RunRecord`] so that the record is
/// always a faithful view of the run.
pub struct StateManager<'a> {
    graph: &'a Graph,
    tasks: &'a mut HashMap<TaskId, TaskInfo>,
    record: &'a mut RunRecord,
    now: DateTime<Utc>,
}

impl<'a> StateManager<'a> {
    pub(crate) fn new(
        graph: &'a Graph,
        tasks: &'a mut HashMap<TaskId, TaskInfo>,
        record: &'a mut RunRecord,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            graph,
            tasks,
            record,
            now,
        }
    }

    /// Re-evaluate every `Waiting` task, in topological order.
    ///
    /// Ready tasks get a fresh `Pending` attempt; tasks whose join condition
    /// can no longer hold are skipped. Walking in topological order means a
    /// skip cascades to its whole downstream cone in a single pass.
    ///
    /// Returns the ids of newly skipped tasks.
    pub fn settle_waiting(&mut self) -> Vec<TaskId> {
        let graph = self.graph;
        let mut skipped = Vec::new();

        for id in graph.topological_order() {
            let readiness = match self.tasks.get(id) {
                Some(info) if info.run_state == TaskRunState::Waiting => {
                    ReadOnlyStateManager::new(graph, &*self.tasks).readiness(info)
                }
                _ => continue,
            };

            match readiness {
                Readiness::Blocked => {}
                Readiness::Ready => self.enqueue_attempt(id),
                Readiness::Skip(reason) => {
                    self.skip_task(id, reason);
                    skipped.push(id.clone());
                }
            }
        }

        skipped
    }

    /// Create a new `Pending` attempt for a task.
    pub fn enqueue_attempt(&mut self, id: &str) {
        let Some(info) = self.tasks.get_mut(id) else {
            warn!(task = %id, "enqueue for unknown task; ignoring");
            return;
        };

        info.attempts_made += 1;
        info.run_state = TaskRunState::Pending;
        debug!(task = %id, attempt = info.attempts_made, "attempt created; marking Pending");

        self.record
            .push_attempt(TaskAttempt::new(id.to_string(), info.attempts_made, self.now));
    }

    /// Skip a `Waiting` or `Pending` task.
    ///
    /// A waiting task gets an attempt created directly in `Skipped`; a
    /// pending one has its queued attempt closed as `Skipped`.
    pub fn skip_task(&mut self, id: &str, reason: String) {
        let Some(info) = self.tasks.get_mut(id) else {
            return;
        };

        match info.run_state {
            TaskRunState::Waiting => {
                info.attempts_made += 1;
                self.record
                    .push_attempt(TaskAttempt::new(id.to_string(), info.attempts_made, self.now));
            }
            TaskRunState::Pending => {}
            other => {
                warn!(task = %id, state = ?other, "refusing to skip task that is not waiting or pending");
                return;
            }
        }

        info.run_state = TaskRunState::Skipped;
        info!(task = %id, reason = %reason, "task skipped");

        if let Some(attempt) = self.record.latest_attempt_mut(id) {
            attempt.finish(AttemptStatus::Skipped, Some(reason), None, self.now);
        }
    }

    /// Dispatch `Pending` tasks while concurrency slots are free.
    ///
    /// Candidates are taken in topological order, marked `Running` and
    /// returned as [`ScheduledTask`]s.
    pub fn collect_dispatchable(&mut self, limit: usize) -> Vec<ScheduledTask> {
        let free = limit.saturating_sub(self.running_count());
        if free == 0 {
            return Vec::new();
        }

        let graph = self.graph;
        let candidates: Vec<&TaskId> = graph
            .topological_order()
            .iter()
            .filter(|id| {
                self.tasks
                    .get(id.as_str())
                    .is_some_and(|info| info.run_state == TaskRunState::Pending)
            })
            .take(free)
            .collect();

        let mut ready = Vec::with_capacity(candidates.len());
        for id in candidates {
            let Some(info) = self.tasks.get_mut(id.as_str()) else {
                continue;
            };

            if info.attempts_made > 1 {
                info!(
                    task = %id,
                    run_id = %self.record.run_id,
                    attempt = info.attempts_made,
                    "dispatching retry attempt"
                );
            } else {
                info!(task = %id, run_id = %self.record.run_id, "dispatching task");
            }

            info.run_state = TaskRunState::Running;
            if let Some(attempt) = self.record.latest_attempt_mut(id) {
                attempt.start(self.now);
            }
            ready.push(ScheduledTask::from_task_info(
                info,
                &self.record.pipeline_id,
                &self.record.run_id,
            ));
        }

        ready
    }

    /// Close every non-terminal, non-running task after a cancellation.
    ///
    /// Waiting and pending tasks are skipped; tasks waiting for a retry keep
    /// their failed attempt and become `Failed`. Running attempts are left to
    /// finish. Returns `(skipped, failed)`.
    pub fn cancel_outstanding(&mut self) -> (Vec<TaskId>, Vec<TaskId>) {
        let graph = self.graph;
        let mut skipped = Vec::new();
        let mut failed = Vec::new();

        for id in graph.topological_order() {
            let state = match self.tasks.get(id) {
                Some(info) => info.run_state,
                None => continue,
            };
            match state {
                TaskRunState::Waiting | TaskRunState::Pending => {
                    self.skip_task(id, CANCELLED.to_string());
                    skipped.push(id.clone());
                }
                TaskRunState::AwaitingRetry => {
                    if let Some(info) = self.tasks.get_mut(id) {
                        info.run_state = TaskRunState::Failed;
                    }
                    debug!(task = %id, "retry abandoned due to cancellation");
                    failed.push(id.clone());
                }
                _ => {}
            }
        }

        (skipped, failed)
    }

    pub fn running_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|info| info.run_state == TaskRunState::Running)
            .count()
    }

    /// Check if all tasks are in a terminal state.
    pub fn all_tasks_terminal(&self) -> bool {
        self.tasks.values().all(|info| info.run_state.is_terminal())
    }
}

/// A read-only view of the per-run state for checking join conditions.
///
/// This is used when we only have shared access to the tasks map (e.g. in
/// `Scheduler::upstream_terminal`).
pub struct ReadOnlyStateManager<'a> {
    graph: &'a Graph,
    tasks: &'a HashMap<TaskId, TaskInfo>,
}

impl<'a> ReadOnlyStateManager<'a> {
    pub(crate) fn new(graph: &'a Graph, tasks: &'a HashMap<TaskId, TaskInfo>) -> Self {
        Self { graph, tasks }
    }

    /// Evaluate the join condition of a task against its upstream members.
    ///
    /// Under [`TriggerRule::AllSuccess`] a failed member, or a skipped member
    /// behind a [`SkipPolicy::Propagate`] edge, makes the task unrunnable as
    /// soon as it is observed. Under [`TriggerRule::AllDone`] only
    /// terminality matters.
    pub(crate) fn readiness(&self, info: &TaskInfo) -> Readiness {
        let mut blocked = false;

        for up in &info.upstream {
            let Some(dep) = self.tasks.get(up) else {
                warn!(task = %info.id, dep = %up, "upstream task missing from tasks map");
                return Readiness::Blocked;
            };

            match (dep.run_state, info.trigger_rule) {
                (TaskRunState::Succeeded, _) => {}
                (TaskRunState::Failed | TaskRunState::Skipped, TriggerRule::AllDone) => {}
                (TaskRunState::Failed, TriggerRule::AllSuccess) => {
                    return Readiness::Skip(format!("upstream task '{up}' failed"));
                }
                (TaskRunState::Skipped, TriggerRule::AllSuccess) => {
                    if self.graph.skip_policy(up, &info.id) == SkipPolicy::Propagate {
                        return Readiness::Skip(format!("upstream task '{up}' was skipped"));
                    }
                }
                _ => blocked = true,
            }
        }

        if blocked {
            Readiness::Blocked
        } else {
            Readiness::Ready
        }
    }

    /// Whether every upstream member of `info` is terminal.
    pub(crate) fn upstream_terminal(&self, info: &TaskInfo) -> bool {
        info.upstream.iter().all(|up| {
            self.tasks
                .get(up)
                .is_some_and(|dep| dep.run_state.is_terminal())
        })
    }
}
