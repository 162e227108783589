//! Scripted run functions for engine tests.
//!
//! Every fake task reports to a shared [`Probe`], which records the order in
//! which attempts started and the highest number of attempts that were
//! running at the same time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pipedag::dag::{Task, TaskContext, TaskFailure, TaskFuture, TaskRun};
use serde_json::json;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct ProbeState {
    started: Vec<(String, u32)>,
    finished: Vec<String>,
    running: usize,
    max_running: usize,
}

/// Shared observation point for fake tasks.
#[derive(Debug, Clone, Default)]
pub struct Probe {
    state: Arc<Mutex<ProbeState>>,
}

impl Probe {
    pub fn new() -> Self {
        Self::default()
    }

    fn enter(&self, ctx: &TaskContext) {
        let mut s = self.state.lock().unwrap();
        s.started.push((ctx.task_id.clone(), ctx.attempt));
        s.running += 1;
        s.max_running = s.max_running.max(s.running);
    }

    fn leave(&self, ctx: &TaskContext) {
        let mut s = self.state.lock().unwrap();
        s.running -= 1;
        s.finished.push(ctx.task_id.clone());
    }

    /// `(task, attempt)` in start order.
    pub fn started(&self) -> Vec<(String, u32)> {
        self.state.lock().unwrap().started.clone()
    }

    /// Task ids in start order, one entry per attempt.
    pub fn started_tasks(&self) -> Vec<String> {
        self.started().into_iter().map(|(t, _)| t).collect()
    }

    /// Task ids in completion order, one entry per attempt.
    pub fn finished(&self) -> Vec<String> {
        self.state.lock().unwrap().finished.clone()
    }

    pub fn attempts_of(&self, task: &str) -> usize {
        self.started().iter().filter(|(t, _)| t == task).count()
    }

    pub fn max_running(&self) -> usize {
        self.state.lock().unwrap().max_running
    }

    /// Position of `task`'s first start, if it ever started.
    pub fn start_index(&self, task: &str) -> Option<usize> {
        self.started().iter().position(|(t, _)| t == task)
    }

    /// Position of `task`'s first completion, if it ever completed.
    pub fn finish_index(&self, task: &str) -> Option<usize> {
        self.finished().iter().position(|t| t == task)
    }
}

/// What a [`FakeTask`] does on each attempt.
#[derive(Debug, Clone)]
pub enum Behaviour {
    /// Succeed after an optional delay.
    Succeed(Duration),
    /// Fail every attempt.
    Fail,
    /// Fail the first `n` attempts, then succeed.
    FailTimes(u32),
    /// Panic inside the run function.
    Panic,
    /// Wait until the gate is opened, then succeed.
    Gated(Arc<Notify>),
}

#[derive(Debug, Clone)]
pub struct FakeTask {
    probe: Probe,
    behaviour: Behaviour,
}

impl FakeTask {
    pub fn new(probe: &Probe, behaviour: Behaviour) -> Self {
        Self {
            probe: probe.clone(),
            behaviour,
        }
    }
}

impl TaskRun for FakeTask {
    fn run(&self, ctx: TaskContext) -> TaskFuture {
        let this = self.clone();
        Box::pin(async move {
            this.probe.enter(&ctx);
            let result = match &this.behaviour {
                Behaviour::Succeed(delay) => {
                    if !delay.is_zero() {
                        tokio::time::sleep(*delay).await;
                    }
                    Ok(Some(json!({ "task": ctx.task_id, "attempt": ctx.attempt })))
                }
                Behaviour::Fail => Err(TaskFailure::Failed(format!("{} failed", ctx.task_id))),
                Behaviour::FailTimes(n) if ctx.attempt <= *n => Err(TaskFailure::Failed(format!(
                    "{} failed on attempt {}",
                    ctx.task_id, ctx.attempt
                ))),
                Behaviour::FailTimes(_) => Ok(None),
                Behaviour::Panic => {
                    this.probe.leave(&ctx);
                    panic!("{} exploded", ctx.task_id);
                }
                Behaviour::Gated(gate) => {
                    gate.notified().await;
                    Ok(None)
                }
            };
            this.probe.leave(&ctx);
            result
        })
    }
}

/// Shorthands for building graph tasks around one probe.
pub fn ok(probe: &Probe, id: &str) -> Task {
    Task::new(id, FakeTask::new(probe, Behaviour::Succeed(Duration::ZERO)))
}

pub fn slow(probe: &Probe, id: &str, delay: Duration) -> Task {
    Task::new(id, FakeTask::new(probe, Behaviour::Succeed(delay)))
}

pub fn fail(probe: &Probe, id: &str) -> Task {
    Task::new(id, FakeTask::new(probe, Behaviour::Fail))
}

pub fn flaky(probe: &Probe, id: &str, failures: u32) -> Task {
    Task::new(id, FakeTask::new(probe, Behaviour::FailTimes(failures)))
}

pub fn panicking(probe: &Probe, id: &str) -> Task {
    Task::new(id, FakeTask::new(probe, Behaviour::Panic))
}

pub fn gated(probe: &Probe, id: &str, gate: &Arc<Notify>) -> Task {
    Task::new(id, FakeTask::new(probe, Behaviour::Gated(Arc::clone(gate))))
}

/// Counts calls per task id without touching a probe; handy when a test
/// only cares how often something ran.
#[derive(Debug, Clone, Default)]
pub struct CallCounter {
    counts: Arc<Mutex<HashMap<String, usize>>>,
    total: Arc<AtomicUsize>,
}

impl CallCounter {
    pub fn task(&self, id: &str) -> Task {
        let counter = self.clone();
        Task::from_fn(id, move |ctx: TaskContext| {
            let counter = counter.clone();
            async move {
                *counter.counts.lock().unwrap().entry(ctx.task_id).or_default() += 1;
                counter.total.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }
        })
    }

    pub fn count(&self, id: &str) -> usize {
        self.counts.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}
