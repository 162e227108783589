// src/engine/controller.rs

//! Run lifecycle: admission, cancellation and observation.
//!
//! The controller owns the registered pipelines and admits at most one
//! active run per pipeline id. Each admitted run gets its own scheduler,
//! event channel and executor, driven by a [`Runtime`] on a Tokio task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::dag::Scheduler;
use crate::engine::runtime::RecordSnapshot;
use crate::engine::{CoreRuntime, Runtime, RuntimeEvent};
use crate::errors::{PipedagError, Result};
use crate::exec::RealExecutorBackend;
use crate::pipeline::Pipeline;
use crate::record::RunRecord;
use crate::store::{RunLock, RunStore};

/// Capacity of each run's event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

struct ActiveRun {
    run_id: String,
    events: mpsc::Sender<RuntimeEvent>,
    snapshot: RecordSnapshot,
    /// Held for the lifetime of the run; dropping it removes the lock file.
    _lock: Option<RunLock>,
}

type ActiveMap = Arc<Mutex<HashMap<String, ActiveRun>>>;
type FinishedMap = Arc<Mutex<HashMap<String, RunRecord>>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes the pipeline's active entry when the run task ends, however it
/// ends.
struct ActiveGuard {
    active: ActiveMap,
    pipeline_id: String,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.pipeline_id);
        debug!(pipeline = %self.pipeline_id, "active run released");
    }
}

/// Handle to a run started with [`RunController::spawn`].
#[derive(Debug)]
pub struct RunHandle {
    pub pipeline_id: String,
    pub run_id: String,
    join: JoinHandle<Result<RunRecord>>,
}

impl RunHandle {
    /// Wait for the run to finish and return its final record.
    pub async fn wait(self) -> Result<RunRecord> {
        match self.join.await {
            Ok(result) => result,
            Err(e) => Err(PipedagError::Other(anyhow::anyhow!(
                "run task of '{}' ended abnormally: {e}",
                self.run_id
            ))),
        }
    }
}

/// Owns pipelines and their runs.
///
/// Share it behind an `Arc`; every method takes `&self`.
#[derive(Default)]
pub struct RunController {
    pipelines: HashMap<String, Arc<Pipeline>>,
    active: ActiveMap,
    finished: FinishedMap,
    store: Option<RunStore>,
}

impl std::fmt::Debug for RunController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunController")
            .field("pipelines", &self.pipelines.keys().collect::<Vec<_>>())
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl RunController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist records and take cross-process run locks through `store`.
    pub fn with_store(mut self, store: RunStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Register (or replace) a pipeline under its id.
    pub fn register(&mut self, pipeline: Pipeline) {
        info!(pipeline = %pipeline.id, tasks = pipeline.graph.len(), "pipeline registered");
        self.pipelines
            .insert(pipeline.id.clone(), Arc::new(pipeline));
    }

    pub fn pipeline(&self, pipeline_id: &str) -> Option<&Pipeline> {
        self.pipelines.get(pipeline_id).map(Arc::as_ref)
    }

    /// Run a pipeline to completion and return its final record.
    ///
    /// Fails fast with `AlreadyRunning` if a run of the same pipeline is
    /// active, and with `PipelineNotFound` for an unknown id. Task failures
    /// do not make this fail: they are in the returned record.
    pub async fn start(&self, pipeline_id: &str) -> Result<RunRecord> {
        self.spawn(pipeline_id)?.wait().await
    }

    /// Admit a run and start it in the background.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(&self, pipeline_id: &str) -> Result<RunHandle> {
        let pipeline = self
            .pipelines
            .get(pipeline_id)
            .cloned()
            .ok_or_else(|| PipedagError::PipelineNotFound(pipeline_id.to_string()))?;

        let run_id = Uuid::new_v4().to_string();
        let scheduler = Scheduler::new(
            Arc::clone(&pipeline.graph),
            pipeline.id.clone(),
            run_id.clone(),
            pipeline.concurrency,
        );
        let snapshot: RecordSnapshot = Arc::new(RwLock::new(scheduler.record().clone()));
        let (tx, rx) = mpsc::channel::<RuntimeEvent>(EVENT_CHANNEL_CAPACITY);

        // Check and insert under one lock so that concurrent callers cannot
        // both be admitted.
        {
            let mut active = lock(&self.active);
            if active.contains_key(pipeline_id) {
                warn!(pipeline = %pipeline_id, "start rejected: run already active");
                return Err(PipedagError::AlreadyRunning(pipeline_id.to_string()));
            }
            let run_lock = match &self.store {
                Some(store) => Some(store.acquire_lock(pipeline_id, &run_id)?),
                None => None,
            };
            active.insert(
                pipeline_id.to_string(),
                ActiveRun {
                    run_id: run_id.clone(),
                    events: tx.clone(),
                    snapshot: Arc::clone(&snapshot),
                    _lock: run_lock,
                },
            );
        }

        let guard = ActiveGuard {
            active: Arc::clone(&self.active),
            pipeline_id: pipeline_id.to_string(),
        };
        let finished = Arc::clone(&self.finished);
        let store = self.store.clone();

        if let Some(store) = &store {
            if let Err(e) = store.save(scheduler.record()) {
                warn!(run_id = %run_id, error = %e, "failed to persist initial run record");
            }
        }

        let executor = RealExecutorBackend::new(tx.clone());
        let runtime = Runtime::new(CoreRuntime::new(scheduler), rx, tx, executor)
            .with_snapshot(snapshot);

        info!(pipeline = %pipeline_id, run_id = %run_id, "run admitted");

        let join = tokio::spawn(async move {
            let _guard = guard;
            let result = runtime.run().await;
            match &result {
                Ok(record) => {
                    if let Some(store) = &store {
                        if let Err(e) = store.save(record) {
                            warn!(run_id = %record.run_id, error = %e, "failed to persist run record");
                        }
                    }
                    lock(&finished).insert(record.run_id.clone(), record.clone());
                }
                Err(e) => error!(error = %e, "run aborted"),
            }
            result
        });

        Ok(RunHandle {
            pipeline_id: pipeline_id.to_string(),
            run_id,
            join,
        })
    }

    /// Ask the active run of a pipeline to stop.
    ///
    /// Returns `false` if the pipeline has no active run.
    pub async fn cancel(&self, pipeline_id: &str) -> bool {
        let events = {
            let active = lock(&self.active);
            match active.get(pipeline_id) {
                Some(run) => run.events.clone(),
                None => return false,
            }
        };
        info!(pipeline = %pipeline_id, "cancel requested");
        events.send(RuntimeEvent::CancelRequested).await.is_ok()
    }

    pub fn is_running(&self, pipeline_id: &str) -> bool {
        lock(&self.active).contains_key(pipeline_id)
    }

    /// Snapshot of the active run of a pipeline, if any.
    pub fn current(&self, pipeline_id: &str) -> Option<RunRecord> {
        let active = lock(&self.active);
        let run = active.get(pipeline_id)?;
        let record = run
            .snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Some(record)
    }

    /// Snapshot of a run by id: live, finished in this process, or
    /// persisted in the store.
    pub fn record(&self, run_id: &str) -> Result<RunRecord> {
        {
            let active = lock(&self.active);
            if let Some(run) = active.values().find(|run| run.run_id == run_id) {
                return Ok(run
                    .snapshot
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone());
            }
        }
        if let Some(record) = lock(&self.finished).get(run_id) {
            return Ok(record.clone());
        }
        match &self.store {
            Some(store) => store.load(run_id),
            None => Err(PipedagError::RunNotFound(run_id.to_string())),
        }
    }
}
