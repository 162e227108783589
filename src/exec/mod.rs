// src/exec/mod.rs

//! Attempt execution layer.
//!
//! This module runs the attempts the scheduler dispatches, each on its own
//! Tokio task, and reports every outcome back to the run's event loop as a
//! `RuntimeEvent::AttemptFinished`.
//!
//! - [`task_runner`] runs a single attempt and turns errors and panics into
//!   a failed outcome.
//! - [`backend`] provides the `ExecutorBackend` trait and a concrete
//!   `RealExecutorBackend` that the runtime uses in production, and which
//!   tests can replace with a fake implementation.

pub mod backend;
pub mod task_runner;

pub use backend::{ExecutorBackend, RealExecutorBackend};
pub use task_runner::run_task;
