// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated core state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels
//! - sending `ScheduledTask`s to the executor
//! - arming retry timers
//!
//! The core can be tested without any Tokio, channels, filesystem or
//! processes.

use crate::dag::Scheduler;
use crate::engine::RuntimeEvent;
use crate::engine::event_handlers::{
    CoreStep, handle_attempt_finished, handle_cancel, handle_retry_due, handle_start,
};
use crate::record::RunRecord;

/// Pure core runtime state: one run's scheduler.
///
/// It has **no** channels, no Tokio types, and does not perform any IO.
#[derive(Debug)]
pub struct CoreRuntime {
    scheduler: Scheduler,
}

impl CoreRuntime {
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }

    /// Begin the run: returns the dispatches for the root tasks.
    pub fn start(&mut self) -> CoreStep {
        handle_start(&mut self.scheduler)
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::AttemptFinished {
                task,
                attempt,
                outcome,
            } => handle_attempt_finished(&mut self.scheduler, &task, attempt, outcome),
            RuntimeEvent::RetryDue { task } => handle_retry_due(&mut self.scheduler, &task),
            RuntimeEvent::CancelRequested => handle_cancel(&mut self.scheduler),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.scheduler.is_finished()
    }

    /// Expose the scheduler (for tests and status snapshots).
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn record(&self) -> &RunRecord {
        self.scheduler.record()
    }

    pub fn into_record(self) -> RunRecord {
        self.scheduler.into_record()
    }
}
