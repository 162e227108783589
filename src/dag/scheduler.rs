// src/dag/scheduler.rs

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::dag::graph::Graph;
use crate::dag::scheduler_step::{RetryRequest, SchedulerStep};
use crate::dag::state_manager::{ReadOnlyStateManager, StateManager};
use crate::dag::task_info::{TaskInfo, TaskRunState};
use crate::engine::{AttemptOutcome, TaskId};
use crate::record::{AttemptStatus, RunRecord, RunStatus};

/// Scheduler holds the immutable graph plus the mutable state of one run.
///
/// It is responsible for:
/// - deciding when a waiting task is ready (join condition satisfied)
/// - skipping tasks whose join condition can no longer hold
/// - recording attempt outcomes and deciding on retries
/// - keeping the number of running attempts under the concurrency ceiling
/// - deciding when the run is over and with which status
///
/// It performs no I/O and never waits; the engine feeds it events and acts on
/// the [`SchedulerStep`] it returns.
#[derive(Debug)]
pub struct Scheduler {
    graph: Arc<Graph>,
    tasks: HashMap<TaskId, TaskInfo>,
    record: RunRecord,
    concurrency_limit: usize,
    cancelled: bool,
    finished: bool,
}

impl Scheduler {
    /// Create the state for a new run. A `concurrency_limit` of zero is
    /// treated as one.
    pub fn new(
        graph: Arc<Graph>,
        pipeline_id: impl Into<String>,
        run_id: impl Into<String>,
        concurrency_limit: usize,
    ) -> Self {
        let mut tasks = HashMap::with_capacity(graph.len());
        for id in graph.tasks() {
            if let Some(task) = graph.task(id) {
                let upstream = graph.upstream_of(id).iter().cloned().collect();
                tasks.insert(id.to_string(), TaskInfo::from_task(task, upstream));
            }
        }

        let record = RunRecord::new(run_id, pipeline_id, graph.tasks());

        Self {
            graph,
            tasks,
            record,
            concurrency_limit: concurrency_limit.max(1),
            cancelled: false,
            finished: false,
        }
    }

    /// Move the run to `Running` and dispatch the roots.
    pub fn start(&mut self) -> SchedulerStep {
        if self.record.status != RunStatus::Pending {
            warn!(run_id = %self.record.run_id, "start called twice; ignoring");
            return SchedulerStep::default();
        }

        let now = Utc::now();
        self.record.status = RunStatus::Running;
        self.record.started_at = Some(now);
        info!(
            run_id = %self.record.run_id,
            pipeline = %self.record.pipeline_id,
            tasks = self.graph.len(),
            "starting run"
        );

        self.settle_and_dispatch()
    }

    /// Record the outcome of a dispatched attempt.
    ///
    /// Outcomes for attempts that are not the task's current running attempt
    /// are ignored.
    pub fn step_completion(
        &mut self,
        task: &str,
        attempt: u32,
        outcome: AttemptOutcome,
    ) -> SchedulerStep {
        let now = Utc::now();
        let mut step = SchedulerStep::default();

        let Some(info) = self.tasks.get_mut(task) else {
            warn!(task = %task, "completion for unknown task; ignoring");
            return step;
        };
        if info.run_state != TaskRunState::Running || info.attempts_made != attempt {
            warn!(
                task = %task,
                attempt,
                current = info.attempts_made,
                state = ?info.run_state,
                "stale completion; ignoring"
            );
            return step;
        }

        match outcome {
            AttemptOutcome::Success(output) => {
                if let Some(current) = self.record.latest_attempt_mut(task) {
                    current.finish(AttemptStatus::Succeeded, None, output, now);
                }
                info.run_state = TaskRunState::Succeeded;
                info!(task = %task, attempt, "task succeeded");
            }
            AttemptOutcome::Failed(error) => {
                if let Some(current) = self.record.latest_attempt_mut(task) {
                    current.finish(AttemptStatus::Failed, Some(error.clone()), None, now);
                }

                if !self.cancelled && info.retry.allows_retry(info.attempts_made) {
                    let delay = info.retry.retry_delay;
                    warn!(
                        task = %task,
                        attempt,
                        max_attempts = info.retry.max_attempts(),
                        ?delay,
                        error = %error,
                        "attempt failed; will retry"
                    );
                    if delay.is_zero() {
                        let mut manager =
                            StateManager::new(&self.graph, &mut self.tasks, &mut self.record, now);
                        manager.enqueue_attempt(task);
                    } else {
                        info.run_state = TaskRunState::AwaitingRetry;
                        step.retries.push(RetryRequest {
                            task: task.to_string(),
                            delay,
                        });
                    }
                } else {
                    info.run_state = TaskRunState::Failed;
                    warn!(task = %task, attempt, error = %error, "task failed");
                    step.newly_failed.push(task.to_string());
                }
            }
        }

        step.merge(self.settle_and_dispatch());
        step
    }

    /// A retry delay elapsed: queue the next attempt.
    pub fn step_retry_due(&mut self, task: &str) -> SchedulerStep {
        if self.cancelled {
            debug!(task = %task, "retry due after cancellation; ignoring");
            return SchedulerStep::default();
        }

        match self.tasks.get(task).map(|info| info.run_state) {
            Some(TaskRunState::AwaitingRetry) => {}
            Some(state) => {
                warn!(task = %task, ?state, "retry due for task not awaiting one; ignoring");
                return SchedulerStep::default();
            }
            None => {
                warn!(task = %task, "retry due for unknown task; ignoring");
                return SchedulerStep::default();
            }
        }

        let mut manager =
            StateManager::new(&self.graph, &mut self.tasks, &mut self.record, Utc::now());
        manager.enqueue_attempt(task);

        self.settle_and_dispatch()
    }

    /// Stop creating attempts. Outstanding tasks are closed right away;
    /// running attempts are left to report their outcome.
    pub fn step_cancel(&mut self) -> SchedulerStep {
        if self.finished || self.cancelled {
            return SchedulerStep::default();
        }

        info!(run_id = %self.record.run_id, "cancelling run");
        self.cancelled = true;
        self.record.cancelled = true;

        let mut manager =
            StateManager::new(&self.graph, &mut self.tasks, &mut self.record, Utc::now());
        let (newly_skipped, newly_failed) = manager.cancel_outstanding();

        SchedulerStep {
            newly_skipped,
            newly_failed,
            run_just_finished: self.maybe_finish(),
            ..SchedulerStep::default()
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Read-only view of the given task's run state.
    pub fn run_state_of(&self, task: &str) -> Option<TaskRunState> {
        self.tasks.get(task).map(|info| info.run_state)
    }

    /// Whether every upstream member of `task` is terminal.
    ///
    /// Returns `None` if the task is unknown.
    pub fn upstream_terminal(&self, task: &str) -> Option<bool> {
        let info = self.tasks.get(task)?;
        let mgr = ReadOnlyStateManager::new(&self.graph, &self.tasks);
        Some(mgr.upstream_terminal(info))
    }

    pub fn running_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|info| info.run_state == TaskRunState::Running)
            .count()
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    pub fn record(&self) -> &RunRecord {
        &self.record
    }

    pub fn into_record(self) -> RunRecord {
        self.record
    }

    /// Queue what became ready, skip what became impossible, dispatch what
    /// fits under the ceiling and check for the end of the run.
    fn settle_and_dispatch(&mut self) -> SchedulerStep {
        if self.finished {
            return SchedulerStep::default();
        }

        let mut step = SchedulerStep::default();
        if !self.cancelled {
            let mut manager =
                StateManager::new(&self.graph, &mut self.tasks, &mut self.record, Utc::now());
            step.newly_skipped = manager.settle_waiting();
            step.newly_scheduled = manager.collect_dispatchable(self.concurrency_limit);
        }
        step.run_just_finished = self.maybe_finish();
        step
    }

    /// Close the run once every task is terminal.
    ///
    /// Returns `true` if this call finished the run.
    fn maybe_finish(&mut self) -> bool {
        if self.finished {
            return false;
        }

        let manager =
            StateManager::new(&self.graph, &mut self.tasks, &mut self.record, Utc::now());
        if !manager.all_tasks_terminal() {
            return false;
        }

        let all_ok = self.tasks.values().all(|info| {
            matches!(
                info.run_state,
                TaskRunState::Succeeded | TaskRunState::Skipped
            )
        });
        let status = if all_ok && !self.cancelled {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };

        self.finished = true;
        self.record.status = status;
        self.record.ended_at = Some(Utc::now());
        info!(
            run_id = %self.record.run_id,
            status = ?status,
            cancelled = self.cancelled,
            "run finished"
        );
        true
    }
}
