use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use pipedag::dag::ScheduledTask;
use pipedag::engine::{AttemptOutcome, RuntimeEvent};
use pipedag::exec::ExecutorBackend;
use pipedag::errors::Result;

/// A fake executor that:
/// - records which attempts were dispatched, as `(task, attempt)`
/// - never calls the run functions
/// - immediately reports the scripted outcome of each attempt (success when
///   nothing is scripted for it).
pub struct FakeExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    executed: Arc<Mutex<Vec<(String, u32)>>>,
    /// Per task, the outcomes of attempts 1, 2, ... in order.
    script: HashMap<String, Vec<AttemptOutcome>>,
}

impl FakeExecutor {
    pub fn new(
        runtime_tx: mpsc::Sender<RuntimeEvent>,
        executed: Arc<Mutex<Vec<(String, u32)>>>,
    ) -> Self {
        Self {
            runtime_tx,
            executed,
            script: HashMap::new(),
        }
    }

    /// Fail the first `n` attempts of `task`.
    pub fn failing(mut self, task: &str, n: usize) -> Self {
        let outcomes = vec![AttemptOutcome::Failed(format!("{task} scripted failure")); n];
        self.script.insert(task.to_string(), outcomes);
        self
    }

    fn outcome_for(&self, task: &str, attempt: u32) -> AttemptOutcome {
        self.script
            .get(task)
            .and_then(|outcomes| outcomes.get(attempt as usize - 1))
            .cloned()
            .unwrap_or(AttemptOutcome::Success(None))
    }
}

impl ExecutorBackend for FakeExecutor {
    fn spawn_ready_tasks(
        &mut self,
        tasks: Vec<ScheduledTask>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let executed = Arc::clone(&self.executed);
        let finished: Vec<_> = tasks
            .iter()
            .map(|t| (t.task_id.clone(), t.attempt, self.outcome_for(&t.task_id, t.attempt)))
            .collect();

        Box::pin(async move {
            for (task, attempt, outcome) in finished {
                {
                    let mut guard = executed.lock().unwrap();
                    guard.push((task.clone(), attempt));
                }

                tx.send(RuntimeEvent::AttemptFinished {
                    task,
                    attempt,
                    outcome,
                })
                .await
                .map_err(anyhow::Error::from)?;
            }
            Ok(())
        })
    }
}
