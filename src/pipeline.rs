// src/pipeline.rs

//! A named, validated task graph plus its run settings.
//!
//! [`Pipeline::from_config`] turns every `[task.<id>]` section into a
//! [`Task`] of the matching kind, wired to the given [`Connectors`].

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::config::{ConfigFile, TaskConfig};
use crate::config::validate::task_edges;
use crate::connectors::{Connectors, LoadOptions, TableRef};
use crate::dag::{Graph, GraphBuilder, Task};
use crate::errors::{PipedagError, Result};
use crate::provision::IdempotentProvisioner;
use crate::tasks::{ArchiveTask, CheckTask, CommandTask, LoadTask, NoopTask, QueryTask};
use crate::types::TaskKind;

pub const DEFAULT_CONCURRENCY: usize = 5;

#[derive(Debug, Clone)]
pub struct Pipeline {
    pub id: String,
    pub description: Option<String>,
    pub graph: Arc<Graph>,
    /// Maximum number of attempts running at once.
    pub concurrency: usize,
}

impl Pipeline {
    pub fn new(id: impl Into<String>, graph: Graph) -> Self {
        Self {
            id: id.into(),
            description: None,
            graph: Arc::new(graph),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Build the pipeline described by a validated config.
    ///
    /// `base_dir` is the working directory of `command` tasks.
    pub fn from_config(cfg: &ConfigFile, connectors: &Connectors, base_dir: &Path) -> Result<Self> {
        let section = cfg.pipeline();
        let defaults = cfg.defaults();

        let mut builder = GraphBuilder::new();
        for (id, task_cfg) in cfg.tasks() {
            let delay = task_cfg
                .effective_retry_delay(defaults)
                .map_err(|e| config_error(id, e))?;
            let task = build_task(id, task_cfg, connectors, base_dir)?
                .with_retries(task_cfg.effective_retries(defaults), delay)
                .with_trigger_rule(task_cfg.trigger_rule);
            debug!(task = %id, kind = %task_cfg.kind, "task configured");
            builder = builder.task(task);
        }
        for edge in task_edges(&section.flow, cfg.tasks()) {
            builder = builder.edge_with(edge);
        }

        let mut pipeline = Pipeline::new(section.id.clone(), builder.build()?)
            .with_concurrency(section.concurrency);
        if let Some(description) = &section.description {
            pipeline = pipeline.with_description(description.clone());
        }
        Ok(pipeline)
    }
}

fn config_error(id: &str, msg: impl std::fmt::Display) -> PipedagError {
    PipedagError::ConfigError(format!("task '{id}': {msg}"))
}

fn required<'a>(id: &str, name: &str, value: &'a Option<String>) -> Result<&'a str> {
    value
        .as_deref()
        .ok_or_else(|| config_error(id, format!("missing `{name}`")))
}

fn table(id: &str, value: &Option<String>) -> Result<TableRef> {
    required(id, "table", value)?
        .parse()
        .map_err(|e| config_error(id, e))
}

fn build_task(
    id: &str,
    cfg: &TaskConfig,
    connectors: &Connectors,
    base_dir: &Path,
) -> Result<Task> {
    let task = match cfg.kind {
        TaskKind::Command => Task::new(
            id,
            CommandTask::new(required(id, "cmd", &cfg.cmd)?).with_working_dir(base_dir),
        ),
        TaskKind::Noop => Task::new(id, NoopTask),
        TaskKind::Load => {
            let options = LoadOptions {
                format: cfg.format,
                field_delimiter: cfg.delimiter().map_err(|e| config_error(id, e))?,
                skip_leading_rows: cfg.skip_leading_rows,
                max_bad_records: cfg.max_bad_records,
                ignore_unknown_values: cfg.ignore_unknown_values,
                write_mode: cfg.write_mode,
            };
            Task::new(
                id,
                LoadTask::new(
                    required(id, "source", &cfg.source)?,
                    table(id, &cfg.table)?,
                    required(id, "schema", &cfg.schema)?,
                    options,
                    IdempotentProvisioner::new(Arc::clone(&connectors.catalog)),
                    Arc::clone(&connectors.loader),
                ),
            )
        }
        TaskKind::Check => Task::new(
            id,
            CheckTask::new(required(id, "sql", &cfg.sql)?, Arc::clone(&connectors.queries)),
        ),
        TaskKind::Archive => Task::new(
            id,
            ArchiveTask::new(
                required(id, "source", &cfg.source)?,
                required(id, "destination", &cfg.destination)?,
                Arc::clone(&connectors.mover),
            ),
        ),
        TaskKind::Query => Task::new(
            id,
            QueryTask::new(
                required(id, "sql", &cfg.sql)?,
                table(id, &cfg.table)?,
                cfg.write_mode,
                Arc::clone(&connectors.queries),
            ),
        ),
    };
    Ok(task)
}
