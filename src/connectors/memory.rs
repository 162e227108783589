// src/connectors/memory.rs

//! In-memory object store and warehouse.
//!
//! Implements all four collaborator traits over one shared state, counts
//! every call and can be told to fail the next calls of an operation. Query
//! and check SQL is not interpreted: a query copies the rows of the first
//! known table its text mentions, and a check returns that table's row count
//! unless a result was scripted with [`MemoryWarehouse::set_check_result`].

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{
    BulkLoader, Catalog, ConnectorError, ConnectorFuture, ConnectorResult, LoadOptions,
    ObjectMover, QueryRunner, TableRef, check_bad_records, is_wildcard, object_matcher,
    parse_rows, parse_schema, wildcard_destination,
};
use crate::types::WriteMode;

/// Operations of the collaborator traits, for counting and failure
/// injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    MoveObject,
    Load,
    RunQuery,
    RunCheck,
    TableExists,
    CreateTable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryTable {
    pub schema: String,
    pub rows: Vec<Vec<String>>,
}

/// A query the warehouse was asked to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryLogEntry {
    pub sql: String,
    pub destination: TableRef,
    pub write_mode: WriteMode,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, String>,
    tables: BTreeMap<TableRef, MemoryTable>,
    queries: Vec<QueryLogEntry>,
    check_results: Vec<(String, Option<Value>)>,
    calls: HashMap<Op, usize>,
    failures: HashMap<Op, usize>,
    stale_exists: usize,
}

#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    state: Mutex<State>,
    latency: Option<Duration>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suspend every call for `latency` before touching the state.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn put_object(&self, name: impl Into<String>, contents: impl Into<String>) {
        self.lock().objects.insert(name.into(), contents.into());
    }

    pub fn object(&self, name: &str) -> Option<String> {
        self.lock().objects.get(name).cloned()
    }

    pub fn object_names(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    pub fn add_table(&self, table: TableRef, schema: impl Into<String>, rows: Vec<Vec<String>>) {
        self.lock().tables.insert(
            table,
            MemoryTable {
                schema: schema.into(),
                rows,
            },
        );
    }

    pub fn has_table(&self, table: &TableRef) -> bool {
        self.lock().tables.contains_key(table)
    }

    pub fn table(&self, table: &TableRef) -> Option<MemoryTable> {
        self.lock().tables.get(table).cloned()
    }

    pub fn row_count(&self, table: &TableRef) -> Option<usize> {
        self.lock().tables.get(table).map(|t| t.rows.len())
    }

    /// Make `run_check` return `result` for any SQL containing `sql_fragment`.
    pub fn set_check_result(&self, sql_fragment: impl Into<String>, result: Option<Value>) {
        self.lock()
            .check_results
            .push((sql_fragment.into(), result));
    }

    pub fn queries(&self) -> Vec<QueryLogEntry> {
        self.lock().queries.clone()
    }

    /// Number of calls made to `op` so far, failed ones included.
    pub fn calls(&self, op: Op) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Fail the next `times` calls of `op`.
    pub fn fail_next(&self, op: Op, times: usize) {
        *self.lock().failures.entry(op).or_default() += times;
    }

    /// Make the next `times` existence checks answer `false` regardless of
    /// the catalog, as a caller that lost a race would observe.
    pub fn report_missing_tables(&self, times: usize) {
        self.lock().stale_exists += times;
    }

    async fn enter(&self, op: Op) -> ConnectorResult<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.lock();
        *state.calls.entry(op).or_default() += 1;
        if let Some(remaining) = state.failures.get_mut(&op) {
            if *remaining > 0 {
                *remaining -= 1;
                debug!(?op, "injected failure");
                return Err(ConnectorError::Failed(format!("injected failure in {op:?}")));
            }
        }
        Ok(())
    }

    fn matching_objects(state: &State, pattern: &str) -> ConnectorResult<Vec<String>> {
        if !is_wildcard(pattern) {
            return Ok(state
                .objects
                .contains_key(pattern)
                .then(|| pattern.to_string())
                .into_iter()
                .collect());
        }
        let matcher = object_matcher(pattern)?;
        Ok(state
            .objects
            .keys()
            .filter(|name| matcher.is_match(name.as_str()))
            .cloned()
            .collect())
    }

    /// The first table other than `exclude` whose name appears in `sql`.
    fn referenced_table(state: &State, sql: &str, exclude: Option<&TableRef>) -> Option<TableRef> {
        state
            .tables
            .keys()
            .filter(|t| Some(*t) != exclude)
            .filter(|t| sql.contains(&t.table))
            .max_by_key(|t| t.table.len())
            .cloned()
    }

    fn write_rows(state: &mut State, table: &TableRef, rows: Vec<Vec<String>>, mode: WriteMode) {
        let target = state.tables.entry(table.clone()).or_insert_with(|| MemoryTable {
            schema: "[]".to_string(),
            rows: Vec::new(),
        });
        match mode {
            WriteMode::Append => target.rows.extend(rows),
            WriteMode::Overwrite => target.rows = rows,
        }
    }
}

impl ObjectMover for MemoryWarehouse {
    fn move_object<'a>(
        &'a self,
        source: &'a str,
        destination: &'a str,
    ) -> ConnectorFuture<'a, u64> {
        Box::pin(async move {
            self.enter(Op::MoveObject).await?;
            let mut state = self.lock();
            let names = Self::matching_objects(&state, source)?;
            if names.is_empty() {
                if is_wildcard(source) {
                    warn!(source = %source, "no objects match; nothing to move");
                    return Ok(0);
                }
                return Err(ConnectorError::NotFound(source.to_string()));
            }
            for name in &names {
                if let Some(contents) = state.objects.remove(name) {
                    let target = wildcard_destination(source, name, destination);
                    debug!(from = %name, to = %target, "object moved");
                    state.objects.insert(target, contents);
                }
            }
            Ok(names.len() as u64)
        })
    }
}

impl BulkLoader for MemoryWarehouse {
    fn load<'a>(
        &'a self,
        source: &'a str,
        table: &'a TableRef,
        options: &'a LoadOptions,
    ) -> ConnectorFuture<'a, u64> {
        Box::pin(async move {
            self.enter(Op::Load).await?;
            let mut state = self.lock();
            let schema = match state.tables.get(table) {
                Some(t) => t.schema.clone(),
                None => return Err(ConnectorError::NotFound(table.to_string())),
            };
            let columns = parse_schema(&schema)?;

            let names = Self::matching_objects(&state, source)?;
            if names.is_empty() {
                return Err(ConnectorError::NotFound(source.to_string()));
            }

            let mut rows = Vec::new();
            let mut rejected = 0;
            for name in &names {
                let contents = state.objects.get(name).map(String::as_str).unwrap_or("");
                let parsed = parse_rows(contents, &columns, options);
                rows.extend(parsed.rows);
                rejected += parsed.rejected;
            }
            check_bad_records(source, rejected, options)?;

            let loaded = rows.len() as u64;
            Self::write_rows(&mut state, table, rows, options.write_mode);
            debug!(table = %table, loaded, rejected, "load finished");
            Ok(loaded)
        })
    }
}

impl QueryRunner for MemoryWarehouse {
    fn run_query<'a>(
        &'a self,
        sql: &'a str,
        destination: &'a TableRef,
        write_mode: WriteMode,
    ) -> ConnectorFuture<'a, u64> {
        Box::pin(async move {
            self.enter(Op::RunQuery).await?;
            let mut state = self.lock();
            state.queries.push(QueryLogEntry {
                sql: sql.to_string(),
                destination: destination.clone(),
                write_mode,
            });
            let rows = Self::referenced_table(&state, sql, Some(destination))
                .and_then(|source| state.tables.get(&source))
                .map(|t| t.rows.clone())
                .unwrap_or_default();
            let written = rows.len() as u64;
            Self::write_rows(&mut state, destination, rows, write_mode);
            Ok(written)
        })
    }

    fn run_check<'a>(&'a self, sql: &'a str) -> ConnectorFuture<'a, Option<Value>> {
        Box::pin(async move {
            self.enter(Op::RunCheck).await?;
            let state = self.lock();
            if let Some((_, result)) = state
                .check_results
                .iter()
                .rev()
                .find(|(fragment, _)| sql.contains(fragment.as_str()))
            {
                return Ok(result.clone());
            }
            Ok(Self::referenced_table(&state, sql, None)
                .and_then(|t| state.tables.get(&t))
                .map(|t| json!(t.rows.len())))
        })
    }
}

impl Catalog for MemoryWarehouse {
    fn table_exists<'a>(&'a self, table: &'a TableRef) -> ConnectorFuture<'a, bool> {
        Box::pin(async move {
            self.enter(Op::TableExists).await?;
            let mut state = self.lock();
            if state.stale_exists > 0 {
                state.stale_exists -= 1;
                return Ok(false);
            }
            Ok(state.tables.contains_key(table))
        })
    }

    fn create_table<'a>(
        &'a self,
        table: &'a TableRef,
        schema: &'a str,
    ) -> ConnectorFuture<'a, ()> {
        Box::pin(async move {
            self.enter(Op::CreateTable).await?;
            parse_schema(schema)?;
            let mut state = self.lock();
            if state.tables.contains_key(table) {
                return Err(ConnectorError::AlreadyExists(table.to_string()));
            }
            state.tables.insert(
                table.clone(),
                MemoryTable {
                    schema: schema.to_string(),
                    rows: Vec::new(),
                },
            );
            debug!(table = %table, "table created");
            Ok(())
        })
    }
}
