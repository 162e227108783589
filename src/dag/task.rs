// src/dag/task.rs

//! Task definitions: what a node of the graph runs and how it is retried.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::connectors::ConnectorError;
use crate::engine::TaskId;
use crate::provision::ProvisionError;
use crate::types::TriggerRule;

/// Why a single attempt of a task failed.
#[derive(Error, Debug)]
pub enum TaskFailure {
    #[error("{0}")]
    Failed(String),

    #[error("command exited with code {0}")]
    ExitCode(i32),

    #[error("check failed: {0}")]
    CheckFailed(String),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// What a successful attempt produced, if anything.
pub type TaskOutput = Option<Value>;

pub type TaskFuture = Pin<Box<dyn Future<Output = Result<TaskOutput, TaskFailure>> + Send>>;

/// Identity of the attempt handed to a run function.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub pipeline_id: String,
    pub run_id: String,
    pub task_id: TaskId,
    /// 1-based attempt number.
    pub attempt: u32,
}

/// The side-effecting operation behind a task.
///
/// Implementations must not borrow `self` in the returned future: clone what
/// is needed (usually `Arc`s to collaborators) into an `async move` block.
/// Errors *and panics* are turned into a failed attempt by the executor.
pub trait TaskRun: Send + Sync + fmt::Debug {
    fn run(&self, ctx: TaskContext) -> TaskFuture;
}

/// Adapter turning an async closure into a [`TaskRun`].
pub struct FnTask<F> {
    label: String,
    f: F,
}

impl<F> FnTask<F> {
    pub fn new(label: impl Into<String>, f: F) -> Self {
        Self {
            label: label.into(),
            f,
        }
    }
}

impl<F> fmt::Debug for FnTask<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTask").field("label", &self.label).finish()
    }
}

impl<F, Fut> TaskRun for FnTask<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TaskOutput, TaskFailure>> + Send + 'static,
{
    fn run(&self, ctx: TaskContext) -> TaskFuture {
        Box::pin((self.f)(ctx))
    }
}

/// Fixed-delay retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub retries: u32,
    /// Delay between a failed attempt and the next one.
    pub retry_delay: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, retry_delay: Duration) -> Self {
        Self {
            retries,
            retry_delay,
        }
    }

    /// Whether a task that has made `attempts_made` attempts may try again.
    pub fn allows_retry(&self, attempts_made: u32) -> bool {
        attempts_made <= self.retries
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

/// A named unit of work. Graph edges live in [`Graph`](super::Graph), not here.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub run: Arc<dyn TaskRun>,
    pub retry: RetryPolicy,
    pub trigger_rule: TriggerRule,
}

impl Task {
    pub fn new(id: impl Into<TaskId>, run: impl TaskRun + 'static) -> Self {
        Self::from_arc(id, Arc::new(run))
    }

    pub fn from_arc(id: impl Into<TaskId>, run: Arc<dyn TaskRun>) -> Self {
        Self {
            id: id.into(),
            run,
            retry: RetryPolicy::default(),
            trigger_rule: TriggerRule::default(),
        }
    }

    /// Convenience for tests and ad-hoc pipelines.
    pub fn from_fn<F, Fut>(id: impl Into<TaskId>, f: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TaskOutput, TaskFailure>> + Send + 'static,
    {
        let id = id.into();
        let run = FnTask::new(id.clone(), f);
        Self::new(id, run)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_retries(self, retries: u32, retry_delay: Duration) -> Self {
        self.with_retry(RetryPolicy::new(retries, retry_delay))
    }

    pub fn with_trigger_rule(mut self, rule: TriggerRule) -> Self {
        self.trigger_rule = rule;
        self
    }
}
