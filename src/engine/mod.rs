// src/engine/mod.rs

//! Orchestration engine for pipedag.
//!
//! This module ties together:
//! - the per-run scheduler
//! - the run event loop that reacts to attempt completions, elapsed retry
//!   delays and cancellation requests
//! - the run controller that owns pipelines and admits at most one active
//!   run per pipeline
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use serde_json::Value;

/// Canonical task id type used throughout the engine.
pub type TaskId = String;

/// Outcome of a single attempt, as reported by the executor.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// The run function returned normally, with an optional output value.
    Success(Option<Value>),
    /// The run function returned an error or panicked.
    Failed(String),
}

/// Events flowing into the runtime from the executor, timers and operators.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// An attempt reached a terminal outcome.
    AttemptFinished {
        task: TaskId,
        attempt: u32,
        outcome: AttemptOutcome,
    },
    /// The retry delay of a failed task elapsed.
    RetryDue { task: TaskId },
    /// An operator asked for the run to stop (e.g. Ctrl-C).
    CancelRequested,
}

pub mod controller;
pub mod core;
pub mod event_handlers;
pub mod runtime;

pub use controller::{RunController, RunHandle};
pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use runtime::{Runtime, run_graph};
