// src/exec/task_runner.rs

//! Individual attempt runner.

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::dag::ScheduledTask;
use crate::engine::{AttemptOutcome, RuntimeEvent};

/// Run a single attempt and report its outcome.
///
/// The run function executes on its own Tokio task so that a panic is
/// contained: it surfaces here as a `JoinError` and becomes a failed attempt
/// like any returned error. Exactly one `AttemptFinished` is sent per call.
pub async fn run_task(task: ScheduledTask, runtime_tx: mpsc::Sender<RuntimeEvent>) {
    let ctx = task.context();
    let run = task.run.clone();

    info!(
        task = %task.task_id,
        run_id = %task.run_id,
        attempt = task.attempt,
        "starting attempt"
    );

    let joined = tokio::spawn(async move { run.run(ctx).await }).await;

    let outcome = match joined {
        Ok(Ok(output)) => {
            info!(task = %task.task_id, attempt = task.attempt, "attempt succeeded");
            AttemptOutcome::Success(output)
        }
        Ok(Err(err)) => {
            warn!(
                task = %task.task_id,
                attempt = task.attempt,
                error = %err,
                "attempt failed"
            );
            AttemptOutcome::Failed(err.to_string())
        }
        Err(join_err) if join_err.is_panic() => {
            let message = panic_message(join_err.into_panic());
            error!(
                task = %task.task_id,
                attempt = task.attempt,
                panic = %message,
                "attempt panicked"
            );
            AttemptOutcome::Failed(format!("task panicked: {message}"))
        }
        Err(join_err) => {
            error!(task = %task.task_id, error = %join_err, "attempt aborted");
            AttemptOutcome::Failed(format!("task aborted: {join_err}"))
        }
    };

    let event = RuntimeEvent::AttemptFinished {
        task: task.task_id.clone(),
        attempt: task.attempt,
        outcome,
    };
    if runtime_tx.send(event).await.is_err() {
        debug!(
            task = %task.task_id,
            attempt = task.attempt,
            "runtime gone; dropping attempt outcome"
        );
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
