#![allow(dead_code)]

use std::collections::BTreeMap;

use pipedag::config::{
    ConfigFile, ConnectorsSection, DefaultSection, FlowStage, PipelineSection, RawConfigFile,
    TaskConfig,
};
use pipedag::types::{BackendKind, TaskKind, TriggerRule, WriteMode};

/// Builder for `ConfigFile` to simplify test setup.
///
/// Starts from an in-memory backend so configs never touch the disk.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new(pipeline_id: &str) -> Self {
        Self {
            config: RawConfigFile {
                pipeline: PipelineSection {
                    id: pipeline_id.to_string(),
                    description: None,
                    concurrency: 5,
                    state_dir: ".pipedag".into(),
                    flow: Vec::new(),
                },
                default: DefaultSection::default(),
                connectors: ConnectorsSection {
                    backend: BackendKind::Memory,
                    ..ConnectorsSection::default()
                },
                task: BTreeMap::new(),
            },
        }
    }

    pub fn with_task(mut self, name: &str, task: TaskConfig) -> Self {
        self.config.task.insert(name.to_string(), task);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.pipeline.concurrency = n;
        self
    }

    /// Append a stage to `flow`; one member becomes `One`, more become `Many`.
    pub fn stage(mut self, members: &[&str]) -> Self {
        let stage = match members {
            [one] => FlowStage::One(one.to_string()),
            many => FlowStage::Many(many.iter().map(|m| m.to_string()).collect()),
        };
        self.config.pipeline.flow.push(stage);
        self
    }

    pub fn default_retries(mut self, retries: u32, delay: &str) -> Self {
        self.config.default.retries = retries;
        self.config.default.retry_delay = delay.to_string();
        self
    }

    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.config.connectors.backend = backend;
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    fn of_kind(kind: TaskKind) -> Self {
        Self {
            task: TaskConfig {
                kind,
                ..TaskConfig::default()
            },
        }
    }

    pub fn command(cmd: &str) -> Self {
        let mut b = Self::of_kind(TaskKind::Command);
        b.task.cmd = Some(cmd.to_string());
        b
    }

    pub fn noop() -> Self {
        Self::of_kind(TaskKind::Noop)
    }

    pub fn load(source: &str, table: &str, schema: &str) -> Self {
        let mut b = Self::of_kind(TaskKind::Load);
        b.task.source = Some(source.to_string());
        b.task.table = Some(table.to_string());
        b.task.schema = Some(schema.to_string());
        b
    }

    pub fn check(sql: &str) -> Self {
        let mut b = Self::of_kind(TaskKind::Check);
        b.task.sql = Some(sql.to_string());
        b
    }

    pub fn archive(source: &str, destination: &str) -> Self {
        let mut b = Self::of_kind(TaskKind::Archive);
        b.task.source = Some(source.to_string());
        b.task.destination = Some(destination.to_string());
        b
    }

    pub fn query(sql: &str, table: &str) -> Self {
        let mut b = Self::of_kind(TaskKind::Query);
        b.task.sql = Some(sql.to_string());
        b.task.table = Some(table.to_string());
        b
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.after.push(dep.to_string());
        self
    }

    pub fn retries(mut self, retries: u32, delay: &str) -> Self {
        self.task.retries = Some(retries);
        self.task.retry_delay = Some(delay.to_string());
        self
    }

    pub fn trigger_rule(mut self, rule: TriggerRule) -> Self {
        self.task.trigger_rule = rule;
        self
    }

    pub fn skip_satisfied(mut self, dep: &str) -> Self {
        self.task.skip_satisfied.push(dep.to_string());
        self
    }

    pub fn skip_leading_rows(mut self, n: usize) -> Self {
        self.task.skip_leading_rows = n;
        self
    }

    pub fn max_bad_records(mut self, n: usize) -> Self {
        self.task.max_bad_records = n;
        self
    }

    pub fn write_mode(mut self, mode: WriteMode) -> Self {
        self.task.write_mode = mode;
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}
