// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::types::{BackendKind, SourceFormat, TaskKind, TriggerRule, WriteMode};

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [pipeline]
/// id = "wines-review-dag"
/// concurrency = 5
/// flow = ["start", "load", ["check", "example"], "archive"]
///
/// [default]
/// retries = 1
/// retry_delay = "5m"
///
/// [connectors]
/// backend = "local"
///
/// [task.load]
/// kind = "load"
/// source = "ingress/reviews_*.csv"
/// table = "Wines_Demo.1_WINE_REVIEWS_RAW"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    pub pipeline: PipelineSection,

    /// Retry defaults from `[default]`.
    #[serde(default)]
    pub default: DefaultSection,

    /// Collaborator wiring from `[connectors]`.
    #[serde(default)]
    pub connectors: ConnectorsSection,

    /// All tasks from `[task.<id>]`, keyed by task id.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// A validated configuration. Only obtainable through
/// `ConfigFile::try_from(RawConfigFile)` (or `new_unchecked` in tests).
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pipeline: PipelineSection,
    default: DefaultSection,
    connectors: ConnectorsSection,
    task: BTreeMap<String, TaskConfig>,
}

impl ConfigFile {
    pub fn new_unchecked(
        pipeline: PipelineSection,
        default: DefaultSection,
        connectors: ConnectorsSection,
        task: BTreeMap<String, TaskConfig>,
    ) -> Self {
        Self {
            pipeline,
            default,
            connectors,
            task,
        }
    }

    pub fn pipeline(&self) -> &PipelineSection {
        &self.pipeline
    }

    pub fn defaults(&self) -> &DefaultSection {
        &self.default
    }

    pub fn connectors(&self) -> &ConnectorsSection {
        &self.connectors
    }

    pub fn tasks(&self) -> &BTreeMap<String, TaskConfig> {
        &self.task
    }
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    pub id: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Maximum number of attempts running at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Where run records and lock files live, relative to the config file.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Stage chain: every task of a stage runs after every task of the
    /// previous stage. Combined with the per-task `after` lists.
    #[serde(default)]
    pub flow: Vec<FlowStage>,
}

fn default_concurrency() -> usize {
    5
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".pipedag")
}

/// One stage of `flow`: a single task id or a parallel group.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum FlowStage {
    One(String),
    Many(Vec<String>),
}

impl FlowStage {
    pub fn members(&self) -> Vec<String> {
        match self {
            FlowStage::One(id) => vec![id.clone()],
            FlowStage::Many(ids) => ids.clone(),
        }
    }
}

/// `[default]` section: retry policy applied to tasks that do not override
/// it.
#[derive(Debug, Clone, Deserialize)]
pub struct DefaultSection {
    #[serde(default)]
    pub retries: u32,

    /// Duration string such as `"30s"` or `"5m"`.
    #[serde(default = "default_retry_delay")]
    pub retry_delay: String,
}

fn default_retry_delay() -> String {
    "0s".to_string()
}

impl Default for DefaultSection {
    fn default() -> Self {
        Self {
            retries: 0,
            retry_delay: default_retry_delay(),
        }
    }
}

/// `[connectors]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectorsSection {
    #[serde(default)]
    pub backend: BackendKind,

    /// Object store directory for the local backend.
    #[serde(default = "default_object_root")]
    pub object_root: PathBuf,

    /// Warehouse directory for the local backend.
    #[serde(default = "default_warehouse_root")]
    pub warehouse_root: PathBuf,

    /// Shell command receiving query and check SQL on stdin (local backend).
    #[serde(default)]
    pub query_command: Option<String>,
}

fn default_object_root() -> PathBuf {
    PathBuf::from("objects")
}

fn default_warehouse_root() -> PathBuf {
    PathBuf::from("warehouse")
}

impl Default for ConnectorsSection {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            object_root: default_object_root(),
            warehouse_root: default_warehouse_root(),
            query_command: None,
        }
    }
}

/// `[task.<id>]` section.
///
/// Which fields are required depends on `kind`:
///
/// | kind      | required                         |
/// |-----------|----------------------------------|
/// | `command` | `cmd`                            |
/// | `noop`    | none                             |
/// | `load`    | `source`, `table`, `schema`      |
/// | `check`   | `sql`                            |
/// | `archive` | `source`, `destination`          |
/// | `query`   | `sql`, `table`                   |
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskConfig {
    #[serde(default)]
    pub kind: TaskKind,

    /// Upstream task ids: this task waits for all of them.
    #[serde(default)]
    pub after: Vec<String>,

    /// Overrides `default.retries`.
    #[serde(default)]
    pub retries: Option<u32>,

    /// Overrides `default.retry_delay`.
    #[serde(default)]
    pub retry_delay: Option<String>,

    #[serde(default)]
    pub trigger_rule: TriggerRule,

    /// Upstream ids whose `Skipped` state counts as satisfied for this task.
    #[serde(default)]
    pub skip_satisfied: Vec<String>,

    /// Shell command (`command`).
    #[serde(default)]
    pub cmd: Option<String>,

    /// Object name or wildcard pattern (`load`, `archive`). May contain
    /// `{date}`, `{run_id}`, `{pipeline_id}` and `{task_id}` placeholders.
    #[serde(default)]
    pub source: Option<String>,

    /// Destination object name or prefix (`archive`). Same placeholders as
    /// `source`.
    #[serde(default)]
    pub destination: Option<String>,

    /// `dataset.table` loaded into (`load`) or written by (`query`).
    #[serde(default)]
    pub table: Option<String>,

    /// JSON column list used to create the table (`load`).
    #[serde(default)]
    pub schema: Option<String>,

    #[serde(default)]
    pub format: SourceFormat,

    /// Single character; defaults to `,`.
    #[serde(default)]
    pub field_delimiter: Option<String>,

    #[serde(default)]
    pub skip_leading_rows: usize,

    #[serde(default)]
    pub max_bad_records: usize,

    #[serde(default)]
    pub ignore_unknown_values: bool,

    #[serde(default)]
    pub write_mode: WriteMode,

    /// SQL text (`check`, `query`). Opaque to pipedag.
    #[serde(default)]
    pub sql: Option<String>,
}

impl TaskConfig {
    /// Effective retry count given the `[default]` section.
    pub fn effective_retries(&self, defaults: &DefaultSection) -> u32 {
        self.retries.unwrap_or(defaults.retries)
    }

    /// Effective retry delay given the `[default]` section.
    pub fn effective_retry_delay(&self, defaults: &DefaultSection) -> Result<Duration, String> {
        parse_duration(self.retry_delay.as_deref().unwrap_or(&defaults.retry_delay))
    }

    /// The field delimiter as a single character.
    pub fn delimiter(&self) -> Result<char, String> {
        match self.field_delimiter.as_deref() {
            None => Ok(','),
            Some(s) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(c),
                    _ => Err(format!(
                        "field_delimiter must be a single character (got {s:?})"
                    )),
                }
            }
        }
    }
}

/// Parse a duration string with a `ms`, `s`, `m` or `h` suffix.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the boundary between digits and suffix.
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}
