// src/engine/runtime.rs

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::dag::{Graph, ScheduledTask, Scheduler};
use crate::errors::Result;
use crate::exec::{ExecutorBackend, RealExecutorBackend};
use crate::record::RunRecord;

use super::core::CoreRuntime;
use super::{CoreCommand, RuntimeEvent, TaskId};

/// Shared, read-mostly view of a run in progress.
pub type RecordSnapshot = Arc<RwLock<RunRecord>>;

const ADHOC_CHANNEL_CAPACITY: usize = 256;

/// Run a graph outside any controller: no admission, no persistence.
///
/// Task failures are reported in the returned record, never as an error.
pub async fn run_graph(graph: Arc<Graph>, concurrency_limit: usize) -> Result<RunRecord> {
    let run_id = Uuid::new_v4().to_string();
    let scheduler = Scheduler::new(graph, "adhoc", run_id, concurrency_limit);
    let (tx, rx) = mpsc::channel::<RuntimeEvent>(ADHOC_CHANNEL_CAPACITY);
    let executor = RealExecutorBackend::new(tx.clone());
    Runtime::new(CoreRuntime::new(scheduler), rx, tx, executor)
        .run()
        .await
}

/// Drives one run's scheduler in response to `RuntimeEvent`s, and delegates
/// attempt execution to an `ExecutorBackend`.
///
/// This is a pure IO shell around `CoreRuntime`, which contains all the
/// scheduling semantics. This struct handles async IO: reading events from
/// the channel, dispatching attempts to the executor, arming retry timers
/// and publishing record snapshots for observers.
pub struct Runtime<E: ExecutorBackend> {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    /// Kept so retry timers can post `RetryDue` back into the loop.
    event_tx: mpsc::Sender<RuntimeEvent>,
    executor: E,
    snapshot: Option<RecordSnapshot>,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Runtime<E> {
    pub fn new(
        core: CoreRuntime,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        event_tx: mpsc::Sender<RuntimeEvent>,
        executor: E,
    ) -> Self {
        Self {
            core,
            event_rx,
            event_tx,
            executor,
            snapshot: None,
        }
    }

    /// Publish a copy of the record into `snapshot` after every step.
    pub fn with_snapshot(mut self, snapshot: RecordSnapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// Main event loop.
    ///
    /// - Starts the run and dispatches the roots.
    /// - Consumes `RuntimeEvent`s from `event_rx` and feeds them into the
    ///   core runtime.
    /// - Executes commands returned by the core (dispatch, retry timers).
    ///
    /// Returns the final record once every task is terminal.
    pub async fn run(mut self) -> Result<RunRecord> {
        info!(run_id = %self.core.record().run_id, "runtime started");

        let step = self.core.start();
        self.publish();
        let mut keep_running = step.keep_running;
        for command in step.commands {
            self.execute_command(command).await?;
        }

        while keep_running && !self.core.is_finished() {
            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    info!("runtime event channel closed; exiting");
                    break;
                }
            };

            debug!(?event, "runtime received event");

            // Feed the event into the pure core and get commands back.
            let step = self.core.step(event);
            self.publish();

            for command in step.commands {
                self.execute_command(command).await?;
            }

            keep_running = step.keep_running;
        }

        let record = self.core.into_record();
        info!(run_id = %record.run_id, status = ?record.status, "runtime exiting");
        Ok(record)
    }

    /// Execute a single command from the core.
    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::DispatchTasks(tasks) => {
                self.spawn_ready(tasks).await?;
            }
            CoreCommand::ScheduleRetry { task, delay } => {
                self.arm_retry(task, delay);
            }
            CoreCommand::Finish => {
                debug!("core issued Finish command");
            }
        }
        Ok(())
    }

    async fn spawn_ready(&mut self, tasks: Vec<ScheduledTask>) -> Result<()> {
        if tasks.is_empty() {
            return Ok(());
        }

        let ids: Vec<_> = tasks
            .iter()
            .map(|t| format!("{}#{}", t.task_id, t.attempt))
            .collect();
        debug!(?ids, "dispatching attempts");

        self.executor.spawn_ready_tasks(tasks).await
    }

    /// The concurrency slot is not held while the timer runs.
    fn arm_retry(&self, task: TaskId, delay: Duration) {
        let tx = self.event_tx.clone();
        debug!(task = %task, ?delay, "arming retry timer");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(RuntimeEvent::RetryDue { task }).await;
        });
    }

    fn publish(&self) {
        if let Some(snapshot) = &self.snapshot {
            let mut guard = snapshot.write().unwrap_or_else(PoisonError::into_inner);
            *guard = self.core.record().clone();
        }
    }
}
