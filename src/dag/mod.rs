// src/dag/mod.rs

//! Task graph representation and scheduling.
//!
//! - [`task`] defines what a node runs and how it is retried.
//! - [`builder`] validates a declarative edge list into a [`Graph`].
//! - [`graph`] holds the immutable, acyclic task graph.
//! - [`scheduler`] contains the per-run state machine that decides which
//!   tasks are ready, which are skipped and when the run is over.
//! - [`task_info`] provides per-run task state and the scheduled unit.
//! - [`scheduler_step`] defines the result type for scheduler steps.
//! - [`state_manager`] manages per-run state transitions.

pub mod builder;
pub mod graph;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;
pub mod task;
pub mod task_info;

pub use builder::{Edge, EdgeGroup, GraphBuilder, build, chain_edges};
pub use graph::Graph;
pub use scheduler::Scheduler;
pub use scheduler_step::{RetryRequest, SchedulerStep};
pub use task::{FnTask, RetryPolicy, Task, TaskContext, TaskFailure, TaskFuture, TaskOutput, TaskRun};
pub use task_info::{ScheduledTask, TaskRunState};
