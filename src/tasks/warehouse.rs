// src/tasks/warehouse.rs

//! Tasks that talk to the object store and the warehouse.

use std::sync::Arc;

use serde_json::json;
use tracing::info;

use super::{check_passes, render_template};
use crate::connectors::{BulkLoader, LoadOptions, ObjectMover, QueryRunner, TableRef};
use crate::dag::{TaskContext, TaskFailure, TaskFuture, TaskRun};
use crate::provision::{IdempotentProvisioner, ProvisionOutcome};
use crate::types::WriteMode;

/// Ensures the destination table exists, then bulk loads the source objects
/// into it.
///
/// Output: `{"table", "provisioned", "rows_loaded"}`.
#[derive(Debug, Clone)]
pub struct LoadTask {
    pub source: String,
    pub table: TableRef,
    pub schema: String,
    pub options: LoadOptions,
    provisioner: IdempotentProvisioner,
    loader: Arc<dyn BulkLoader>,
}

impl LoadTask {
    pub fn new(
        source: impl Into<String>,
        table: TableRef,
        schema: impl Into<String>,
        options: LoadOptions,
        provisioner: IdempotentProvisioner,
        loader: Arc<dyn BulkLoader>,
    ) -> Self {
        Self {
            source: source.into(),
            table,
            schema: schema.into(),
            options,
            provisioner,
            loader,
        }
    }
}

impl TaskRun for LoadTask {
    fn run(&self, ctx: TaskContext) -> TaskFuture {
        let this = self.clone();
        Box::pin(async move {
            let outcome = this
                .provisioner
                .ensure_exists(&this.table, &this.schema)
                .await?;
            let source = render_template(&this.source, &ctx);
            let rows = this.loader.load(&source, &this.table, &this.options).await?;
            info!(task = %ctx.task_id, table = %this.table, rows, ?outcome, "load finished");
            Ok(Some(json!({
                "table": this.table.to_string(),
                "provisioned": outcome == ProvisionOutcome::Created,
                "rows_loaded": rows,
            })))
        })
    }
}

/// Runs a scalar query and fails unless the result is truthy.
#[derive(Debug, Clone)]
pub struct CheckTask {
    pub sql: String,
    queries: Arc<dyn QueryRunner>,
}

impl CheckTask {
    pub fn new(sql: impl Into<String>, queries: Arc<dyn QueryRunner>) -> Self {
        Self {
            sql: sql.into(),
            queries,
        }
    }
}

impl TaskRun for CheckTask {
    fn run(&self, ctx: TaskContext) -> TaskFuture {
        let this = self.clone();
        Box::pin(async move {
            let sql = render_template(&this.sql, &ctx);
            let value = this.queries.run_check(&sql).await?;
            if !check_passes(value.as_ref()) {
                let shown = value.map_or_else(|| "no rows".to_string(), |v| v.to_string());
                return Err(TaskFailure::CheckFailed(format!(
                    "'{}' returned {shown}",
                    sql.trim()
                )));
            }
            info!(task = %ctx.task_id, ?value, "check passed");
            Ok(value)
        })
    }
}

/// Moves source objects to their archive location.
///
/// Output: `{"moved": n}`.
#[derive(Debug, Clone)]
pub struct ArchiveTask {
    pub source: String,
    pub destination: String,
    mover: Arc<dyn ObjectMover>,
}

impl ArchiveTask {
    pub fn new(
        source: impl Into<String>,
        destination: impl Into<String>,
        mover: Arc<dyn ObjectMover>,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            mover,
        }
    }
}

impl TaskRun for ArchiveTask {
    fn run(&self, ctx: TaskContext) -> TaskFuture {
        let this = self.clone();
        Box::pin(async move {
            let source = render_template(&this.source, &ctx);
            let destination = render_template(&this.destination, &ctx);
            let moved = this.mover.move_object(&source, &destination).await?;
            info!(task = %ctx.task_id, %source, %destination, moved, "objects archived");
            Ok(Some(json!({ "moved": moved })))
        })
    }
}

/// Runs a transformation query into a destination table.
///
/// Output: `{"table", "rows"}`.
#[derive(Debug, Clone)]
pub struct QueryTask {
    pub sql: String,
    pub destination: TableRef,
    pub write_mode: WriteMode,
    queries: Arc<dyn QueryRunner>,
}

impl QueryTask {
    pub fn new(
        sql: impl Into<String>,
        destination: TableRef,
        write_mode: WriteMode,
        queries: Arc<dyn QueryRunner>,
    ) -> Self {
        Self {
            sql: sql.into(),
            destination,
            write_mode,
            queries,
        }
    }
}

impl TaskRun for QueryTask {
    fn run(&self, ctx: TaskContext) -> TaskFuture {
        let this = self.clone();
        Box::pin(async move {
            let sql = render_template(&this.sql, &ctx);
            let rows = this
                .queries
                .run_query(&sql, &this.destination, this.write_mode)
                .await?;
            info!(task = %ctx.task_id, table = %this.destination, rows, "query finished");
            Ok(Some(json!({
                "table": this.destination.to_string(),
                "rows": rows,
            })))
        })
    }
}
