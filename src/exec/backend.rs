// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of spawning attempts
//! itself. This makes it easy to swap in a fake executor in tests.
//!
//! - `RealExecutorBackend` is the default implementation. It spawns one
//!   Tokio task per attempt via [`run_task`].
//! - Tests can provide their own `ExecutorBackend` that, for example, records
//!   which attempts were dispatched and directly emits `AttemptFinished`
//!   events.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::dag::ScheduledTask;
use crate::engine::RuntimeEvent;
use crate::errors::Result;

use super::task_runner::run_task;

/// Trait abstracting how scheduled attempts are executed.
///
/// Production code uses [`RealExecutorBackend`]; tests can provide their own
/// implementation.
pub trait ExecutorBackend: Send {
    /// Dispatch the given attempts for execution.
    ///
    /// Implementations must not wait for the attempts to finish: every
    /// outcome is reported later through the runtime's event channel.
    fn spawn_ready_tasks(
        &mut self,
        tasks: Vec<ScheduledTask>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Real executor backend used in production.
pub struct RealExecutorBackend {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
}

impl RealExecutorBackend {
    /// Create a new real executor backend, wiring it to the given runtime
    /// event sender.
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self { runtime_tx }
    }
}

impl ExecutorBackend for RealExecutorBackend {
    fn spawn_ready_tasks(
        &mut self,
        tasks: Vec<ScheduledTask>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.runtime_tx.clone();

        Box::pin(async move {
            for task in tasks {
                tokio::spawn(run_task(task, tx.clone()));
            }
            Ok(())
        })
    }
}
