// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use std::time::Duration;

use tracing::debug;

use crate::dag::{ScheduledTask, Scheduler, SchedulerStep};
use crate::engine::{AttemptOutcome, TaskId};

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Send these attempts to the executor.
    DispatchTasks(Vec<ScheduledTask>),
    /// Deliver a `RetryDue` event for `task` after `delay`.
    ScheduleRetry { task: TaskId, delay: Duration },
    /// Every task is terminal; the record is final.
    Finish,
}

/// Decision returned by the core after handling a single `RuntimeEvent`.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

pub fn handle_start(scheduler: &mut Scheduler) -> CoreStep {
    let step = scheduler.start();
    into_core_step(step)
}

pub fn handle_attempt_finished(
    scheduler: &mut Scheduler,
    task: &str,
    attempt: u32,
    outcome: AttemptOutcome,
) -> CoreStep {
    let step = scheduler.step_completion(task, attempt, outcome);
    into_core_step(step)
}

pub fn handle_retry_due(scheduler: &mut Scheduler, task: &str) -> CoreStep {
    let step = scheduler.step_retry_due(task);
    into_core_step(step)
}

/// Cancellation closes outstanding tasks; the loop keeps running until the
/// attempts already in flight report back.
pub fn handle_cancel(scheduler: &mut Scheduler) -> CoreStep {
    let step = scheduler.step_cancel();
    if !step.run_just_finished {
        debug!(
            running = scheduler.running_count(),
            "cancel requested; waiting for in-flight attempts"
        );
    }
    into_core_step(step)
}

/// Translate a scheduler step into shell commands.
///
/// Dispatches come first, then retry timers, then `Finish`.
pub fn into_core_step(step: SchedulerStep) -> CoreStep {
    let mut commands = Vec::new();

    if !step.newly_scheduled.is_empty() {
        commands.push(CoreCommand::DispatchTasks(step.newly_scheduled));
    }
    for retry in step.retries {
        commands.push(CoreCommand::ScheduleRetry {
            task: retry.task,
            delay: retry.delay,
        });
    }

    let keep_running = !step.run_just_finished;
    if step.run_just_finished {
        commands.push(CoreCommand::Finish);
    }

    CoreStep {
        commands,
        keep_running,
    }
}
