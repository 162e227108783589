// src/tasks/command.rs

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::Context;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::dag::{TaskContext, TaskFailure, TaskFuture, TaskRun};
use super::render_template;

/// Runs a shell command; a non-zero exit code fails the attempt.
///
/// The last non-empty stdout line becomes the attempt's output. The command
/// sees `PIPEDAG_PIPELINE_ID`, `PIPEDAG_RUN_ID`, `PIPEDAG_TASK_ID` and
/// `PIPEDAG_ATTEMPT` in its environment. Placeholders in the command line
/// are expanded with [`render_template`] first.
#[derive(Debug, Clone)]
pub struct CommandTask {
    cmd: String,
    working_dir: Option<PathBuf>,
}

impl CommandTask {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

impl TaskRun for CommandTask {
    fn run(&self, ctx: TaskContext) -> TaskFuture {
        let this = self.clone();
        Box::pin(async move { this.execute(ctx).await })
    }
}

impl CommandTask {
    async fn execute(self, ctx: TaskContext) -> Result<Option<Value>, TaskFailure> {
        let command_line = render_template(&self.cmd, &ctx);
        info!(
            task = %ctx.task_id,
            run_id = %ctx.run_id,
            cmd = %command_line,
            "starting task process"
        );

        // Build a shell command appropriate for the platform.
        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&command_line);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&command_line);
            c
        };

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.env("PIPEDAG_PIPELINE_ID", &ctx.pipeline_id)
            .env("PIPEDAG_RUN_ID", &ctx.run_id)
            .env("PIPEDAG_TASK_ID", &ctx.task_id)
            .env("PIPEDAG_ATTEMPT", ctx.attempt.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning process for task '{}'", ctx.task_id))?;

        // Always consume stderr so buffers don't fill; log at debug.
        if let Some(stderr) = child.stderr.take() {
            let task_id = ctx.task_id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(task = %task_id, "stderr: {}", line);
                }
            });
        }

        let mut last_line = None;
        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines
                .next_line()
                .await
                .with_context(|| format!("reading stdout of task '{}'", ctx.task_id))?
            {
                info!(task = %ctx.task_id, "stdout: {}", line);
                if !line.trim().is_empty() {
                    last_line = Some(line);
                }
            }
        }

        let status = child
            .wait()
            .await
            .with_context(|| format!("waiting for process of task '{}'", ctx.task_id))?;

        let code = status.code().unwrap_or(-1);
        info!(
            task = %ctx.task_id,
            run_id = %ctx.run_id,
            exit_code = code,
            success = status.success(),
            "task process exited"
        );

        if status.success() {
            Ok(last_line.map(Value::String))
        } else {
            Err(TaskFailure::ExitCode(code))
        }
    }
}
