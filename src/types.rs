// src/types.rs

//! Small configuration enums shared by the config layer and the engine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// When a task with several upstream members may run.
///
/// - `AllSuccess`: every upstream member must have succeeded (or been skipped
///   over an edge whose skip policy is [`SkipPolicy::Satisfied`]). A failed
///   upstream member skips this task ("fail closed"). This is the default.
/// - `AllDone`: the task runs once every upstream member is terminal,
///   whatever the outcome ("fail open"); useful for cleanup/notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerRule {
    AllSuccess,
    AllDone,
}

impl Default for TriggerRule {
    fn default() -> Self {
        TriggerRule::AllSuccess
    }
}

impl fmt::Display for TriggerRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerRule::AllSuccess => f.write_str("all_success"),
            TriggerRule::AllDone => f.write_str("all_done"),
        }
    }
}

impl FromStr for TriggerRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all_success" => Ok(TriggerRule::AllSuccess),
            "all_done" => Ok(TriggerRule::AllDone),
            other => Err(format!(
                "invalid trigger_rule: {other} (expected \"all_success\" or \"all_done\")"
            )),
        }
    }
}

/// How a `Skipped` upstream member is treated by one downstream edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipPolicy {
    /// A skipped upstream member skips the downstream task too (default).
    Propagate,
    /// A skipped upstream member counts as satisfied.
    Satisfied,
}

impl Default for SkipPolicy {
    fn default() -> Self {
        SkipPolicy::Propagate
    }
}

/// Write disposition for loads and query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Append rows to the destination table.
    Append,
    /// Replace the table contents.
    Overwrite,
}

impl Default for WriteMode {
    fn default() -> Self {
        WriteMode::Append
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteMode::Append => f.write_str("append"),
            WriteMode::Overwrite => f.write_str("overwrite"),
        }
    }
}

/// Format of the files handed to a bulk load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Csv,
    /// Newline-delimited JSON objects.
    Json,
}

impl Default for SourceFormat {
    fn default() -> Self {
        SourceFormat::Csv
    }
}

/// Which collaborator implementations the CLI wires up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Directory-backed object store and warehouse.
    Local,
    /// In-memory warehouse (lost when the process exits).
    Memory,
}

impl Default for BackendKind {
    fn default() -> Self {
        BackendKind::Local
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Local => f.write_str("local"),
            BackendKind::Memory => f.write_str("memory"),
        }
    }
}

/// What a configured task does when it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Run `cmd` through the platform shell.
    Command,
    /// Do nothing and succeed.
    Noop,
    /// Ensure `table` exists, then bulk load `source` into it.
    Load,
    /// Run `sql`; fail unless it yields a truthy scalar.
    Check,
    /// Move `source` objects to `destination`.
    Archive,
    /// Run `sql` and write the result into `table`.
    Query,
}

impl Default for TaskKind {
    fn default() -> Self {
        TaskKind::Command
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskKind::Command => "command",
            TaskKind::Noop => "noop",
            TaskKind::Load => "load",
            TaskKind::Check => "check",
            TaskKind::Archive => "archive",
            TaskKind::Query => "query",
        };
        f.write_str(s)
    }
}
