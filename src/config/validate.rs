// src/config/validate.rs

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;

use crate::config::model::{ConfigFile, FlowStage, RawConfigFile, TaskConfig, parse_duration};
use crate::connectors::{TableRef, parse_schema};
use crate::dag::Edge;
use crate::dag::builder::topological_order;
use crate::errors::{PipedagError, Result};
use crate::types::{BackendKind, SkipPolicy, TaskKind};

const ID_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9_.-]*$";

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = PipedagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(
            raw.pipeline,
            raw.default,
            raw.connectors,
            raw.task,
        ))
    }
}

fn config_error(msg: impl Into<String>) -> PipedagError {
    PipedagError::ConfigError(msg.into())
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_pipeline_section(cfg)?;
    validate_ids(cfg)?;
    validate_task_dependencies(cfg)?;
    validate_defaults(cfg)?;
    for (id, task) in cfg.task.iter() {
        validate_task_fields(cfg, id, task)?;
    }
    validate_dag(cfg)?;
    Ok(())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(config_error(
            "config must contain at least one [task.<id>] section",
        ));
    }
    Ok(())
}

fn validate_pipeline_section(cfg: &RawConfigFile) -> Result<()> {
    if cfg.pipeline.concurrency == 0 {
        return Err(config_error(
            "[pipeline].concurrency must be >= 1 (got 0)",
        ));
    }
    Ok(())
}

fn validate_ids(cfg: &RawConfigFile) -> Result<()> {
    let re = Regex::new(ID_PATTERN).map_err(|e| config_error(e.to_string()))?;

    if !re.is_match(&cfg.pipeline.id) {
        return Err(config_error(format!(
            "invalid pipeline id '{}': expected letters, digits, '_', '-' or '.'",
            cfg.pipeline.id
        )));
    }
    for id in cfg.task.keys() {
        if !re.is_match(id) {
            return Err(config_error(format!(
                "invalid task id '{id}': expected letters, digits, '_', '-' or '.'"
            )));
        }
    }
    Ok(())
}

fn validate_task_dependencies(cfg: &RawConfigFile) -> Result<()> {
    for (id, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            if !cfg.task.contains_key(dep) {
                return Err(config_error(format!(
                    "task '{id}' has unknown dependency '{dep}' in `after`"
                )));
            }
            if dep == id {
                return Err(config_error(format!(
                    "task '{id}' cannot depend on itself in `after`"
                )));
            }
        }
    }

    for stage in cfg.pipeline.flow.iter() {
        let members = stage.members();
        if members.is_empty() {
            return Err(config_error("[pipeline].flow contains an empty stage"));
        }
        for member in members {
            if !cfg.task.contains_key(&member) {
                return Err(config_error(format!(
                    "[pipeline].flow references unknown task '{member}'"
                )));
            }
        }
    }

    let edges = task_edges(&cfg.pipeline.flow, &cfg.task);
    for (id, task) in cfg.task.iter() {
        let upstream: BTreeSet<&str> = edges
            .iter()
            .filter(|e| &e.to == id)
            .map(|e| e.from.as_str())
            .collect();
        for dep in task.skip_satisfied.iter() {
            if !upstream.contains(dep.as_str()) {
                return Err(config_error(format!(
                    "task '{id}' lists '{dep}' in `skip_satisfied` but does not depend on it"
                )));
            }
        }
    }
    Ok(())
}

fn validate_defaults(cfg: &RawConfigFile) -> Result<()> {
    parse_duration(&cfg.default.retry_delay)
        .map_err(|e| config_error(format!("[default].retry_delay: {e}")))?;
    Ok(())
}

fn require<'a>(id: &str, kind: TaskKind, name: &str, value: &'a Option<String>) -> Result<&'a str> {
    match value.as_deref() {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(config_error(format!(
            "task '{id}' of kind '{kind}' requires `{name}`"
        ))),
    }
}

fn validate_table(id: &str, value: &str) -> Result<()> {
    value
        .parse::<TableRef>()
        .map(|_| ())
        .map_err(|e| config_error(format!("task '{id}': {e}")))
}

fn validate_task_fields(cfg: &RawConfigFile, id: &str, task: &TaskConfig) -> Result<()> {
    task.effective_retry_delay(&cfg.default)
        .map_err(|e| config_error(format!("task '{id}': retry_delay: {e}")))?;
    task.delimiter()
        .map_err(|e| config_error(format!("task '{id}': {e}")))?;

    match task.kind {
        TaskKind::Command => {
            require(id, task.kind, "cmd", &task.cmd)?;
        }
        TaskKind::Noop => {}
        TaskKind::Load => {
            require(id, task.kind, "source", &task.source)?;
            validate_table(id, require(id, task.kind, "table", &task.table)?)?;
            let schema = require(id, task.kind, "schema", &task.schema)?;
            parse_schema(schema).map_err(|e| config_error(format!("task '{id}': {e}")))?;
        }
        TaskKind::Check => {
            require(id, task.kind, "sql", &task.sql)?;
        }
        TaskKind::Archive => {
            require(id, task.kind, "source", &task.source)?;
            require(id, task.kind, "destination", &task.destination)?;
        }
        TaskKind::Query => {
            require(id, task.kind, "sql", &task.sql)?;
            validate_table(id, require(id, task.kind, "table", &task.table)?)?;
        }
    }

    let needs_queries = matches!(task.kind, TaskKind::Check | TaskKind::Query);
    if needs_queries
        && cfg.connectors.backend == BackendKind::Local
        && cfg.connectors.query_command.is_none()
    {
        return Err(config_error(format!(
            "task '{id}' runs SQL but [connectors].query_command is not set for the local backend"
        )));
    }

    Ok(())
}

fn validate_dag(cfg: &RawConfigFile) -> Result<()> {
    let declared: Vec<String> = cfg.task.keys().cloned().collect();
    let edges = task_edges(&cfg.pipeline.flow, &cfg.task);
    topological_order(&declared, &edges)?;
    Ok(())
}

/// All edges declared by a config: `after` lists plus the `flow` chain,
/// with `skip_satisfied` applied.
///
/// Edge direction: upstream -> downstream. For
///
/// ```toml
/// [task.B]
/// after = ["A"]
/// ```
///
/// we add edge A -> B.
pub(crate) fn task_edges(
    flow: &[FlowStage],
    tasks: &BTreeMap<String, TaskConfig>,
) -> Vec<Edge> {
    let stages: Vec<Vec<String>> = flow.iter().map(FlowStage::members).collect();

    let mut edges: Vec<Edge> = tasks
        .iter()
        .flat_map(|(id, task)| task.after.iter().map(move |dep| Edge::new(dep.clone(), id.clone())))
        .collect();
    edges.extend(crate::dag::chain_edges(&stages));

    for edge in edges.iter_mut() {
        let satisfied = tasks
            .get(&edge.to)
            .is_some_and(|t| t.skip_satisfied.contains(&edge.from));
        if satisfied {
            edge.on_skip = SkipPolicy::Satisfied;
        }
    }
    edges
}
