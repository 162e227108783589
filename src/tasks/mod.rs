// src/tasks/mod.rs

//! Built-in task kinds.
//!
//! Each kind implements [`TaskRun`](crate::dag::TaskRun) by cloning what it
//! needs (ids, SQL, `Arc`s to collaborators) into a `'static` future.

use chrono::Utc;
use serde_json::Value;

use crate::dag::{TaskContext, TaskFuture, TaskRun};

pub mod command;
pub mod warehouse;

pub use command::CommandTask;
pub use warehouse::{ArchiveTask, CheckTask, LoadTask, QueryTask};

/// Succeeds without doing anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTask;

impl TaskRun for NoopTask {
    fn run(&self, _ctx: TaskContext) -> TaskFuture {
        Box::pin(async { Ok(None) })
    }
}

/// Whether a check scalar passes: present, and not zero, `false` or empty.
pub fn check_passes(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => {
            let s = s.trim();
            !(s.is_empty() || s == "0" || s.eq_ignore_ascii_case("false"))
        }
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
    }
}

/// Substitute `{date}`, `{run_id}`, `{pipeline_id}` and `{task_id}` in object
/// names, command lines and SQL.
pub fn render_template(template: &str, ctx: &TaskContext) -> String {
    template
        .replace("{date}", &Utc::now().format("%Y-%m-%d").to_string())
        .replace("{run_id}", &ctx.run_id)
        .replace("{pipeline_id}", &ctx.pipeline_id)
        .replace("{task_id}", &ctx.task_id)
}
