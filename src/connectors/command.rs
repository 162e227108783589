// src/connectors/command.rs

//! Query runner that delegates SQL to an external command.
//!
//! The configured command line runs through the platform shell with the SQL
//! on stdin. The destination table and write mode are passed as
//! `PIPEDAG_DESTINATION` and `PIPEDAG_WRITE_MODE`. For a query, a leading
//! integer on stdout is taken as the number of rows written; for a check,
//! the first stdout token is the scalar (parsed as JSON when it is valid
//! JSON, kept as a string otherwise, `None` when stdout is empty).

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::Context;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use super::{ConnectorError, ConnectorFuture, ConnectorResult, QueryRunner, TableRef};
use crate::types::WriteMode;

#[derive(Debug, Clone, Default)]
pub struct CommandQueryRunner {
    command: Option<String>,
    working_dir: Option<PathBuf>,
}

impl CommandQueryRunner {
    pub fn new(command: Option<String>) -> Self {
        Self {
            command,
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    async fn execute(&self, sql: &str, env: &[(&str, String)]) -> ConnectorResult<String> {
        let Some(command) = self.command.as_deref() else {
            return Err(ConnectorError::Failed(
                "no query_command configured for the local backend".to_string(),
            ));
        };

        // Build a shell command appropriate for the platform.
        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(command);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(command);
            c
        };
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning query command '{command}'"))?;

        // Stdin must be fed while stdout/stderr are drained: a command that
        // echoes its input would otherwise block on a full pipe.
        let writer = child.stdin.take().map(|mut stdin| {
            let sql = sql.to_string();
            tokio::spawn(async move {
                let written = stdin.write_all(sql.as_bytes()).await;
                drop(stdin);
                written
            })
        });

        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("waiting for query command '{command}'"))?;

        if let Some(writer) = writer {
            match writer.await.context("joining SQL writer")? {
                Ok(()) => {}
                // The command exited without reading all of its input.
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                    debug!("query command closed stdin early");
                }
                Err(e) => {
                    return Err(anyhow::Error::new(e)
                        .context("writing SQL to query command")
                        .into());
                }
            }
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stderr.lines() {
            debug!("query stderr: {}", line);
        }

        if !output.status.success() {
            return Err(ConnectorError::Failed(format!(
                "query command exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Interpret the first stdout token of a check.
pub fn parse_scalar(stdout: &str) -> Option<Value> {
    let token = stdout.split_whitespace().next()?;
    Some(serde_json::from_str(token).unwrap_or_else(|_| Value::String(token.to_string())))
}

impl QueryRunner for CommandQueryRunner {
    fn run_query<'a>(
        &'a self,
        sql: &'a str,
        destination: &'a TableRef,
        write_mode: WriteMode,
    ) -> ConnectorFuture<'a, u64> {
        Box::pin(async move {
            let env = [
                ("PIPEDAG_DESTINATION", destination.to_string()),
                ("PIPEDAG_WRITE_MODE", write_mode.to_string()),
            ];
            let stdout = self.execute(sql, &env).await?;
            let rows = stdout
                .split_whitespace()
                .next()
                .and_then(|t| t.parse::<u64>().ok())
                .unwrap_or(0);
            info!(destination = %destination, rows, "query finished");
            Ok(rows)
        })
    }

    fn run_check<'a>(&'a self, sql: &'a str) -> ConnectorFuture<'a, Option<Value>> {
        Box::pin(async move {
            let stdout = self.execute(sql, &[]).await?;
            Ok(parse_scalar(&stdout))
        })
    }
}
