// src/connectors/mod.rs

//! Narrow interfaces to the object store and the warehouse.
//!
//! Tasks never talk to storage directly: they go through the four
//! collaborator traits below. Each trait is object-safe and returns a pinned
//! boxed future, the same shape as [`ExecutorBackend`](crate::exec::ExecutorBackend).
//!
//! - [`memory`] keeps everything in memory; used by tests and `backend = "memory"`.
//! - [`local`] maps objects and tables onto a directory tree.
//! - [`command`] hands SQL to an external shell command.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use globset::{GlobBuilder, GlobMatcher};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::model::ConfigFile;
use crate::errors::Result;
use crate::fs::FileSystem;
use crate::types::{BackendKind, SourceFormat, WriteMode};

pub mod command;
pub mod local;
pub mod memory;

pub use command::CommandQueryRunner;
pub use local::{LocalObjectStore, LocalWarehouse};
pub use memory::MemoryWarehouse;

#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("{0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type ConnectorResult<T> = std::result::Result<T, ConnectorError>;

pub type ConnectorFuture<'a, T> = Pin<Box<dyn Future<Output = ConnectorResult<T>> + Send + 'a>>;

/// Moves objects between locations of the object store.
pub trait ObjectMover: Send + Sync + fmt::Debug {
    /// Move `source` to `destination`.
    ///
    /// A `*` in `source` moves every matching object; `destination` then
    /// replaces the literal prefix before the first wildcard. Returns the
    /// number of objects moved.
    fn move_object<'a>(&'a self, source: &'a str, destination: &'a str)
    -> ConnectorFuture<'a, u64>;
}

/// Loads objects into a warehouse table.
pub trait BulkLoader: Send + Sync + fmt::Debug {
    /// Load every object matching `source` into `table`; returns the number
    /// of rows loaded.
    fn load<'a>(
        &'a self,
        source: &'a str,
        table: &'a TableRef,
        options: &'a LoadOptions,
    ) -> ConnectorFuture<'a, u64>;
}

/// Runs SQL. The text is opaque to pipedag.
pub trait QueryRunner: Send + Sync + fmt::Debug {
    /// Run a transformation writing into `destination`; returns the number of
    /// rows written when the runner knows it.
    fn run_query<'a>(
        &'a self,
        sql: &'a str,
        destination: &'a TableRef,
        write_mode: WriteMode,
    ) -> ConnectorFuture<'a, u64>;

    /// Run a query yielding a single scalar, `None` if it produced no row.
    fn run_check<'a>(&'a self, sql: &'a str) -> ConnectorFuture<'a, Option<Value>>;
}

/// Table metadata operations.
pub trait Catalog: Send + Sync + fmt::Debug {
    fn table_exists<'a>(&'a self, table: &'a TableRef) -> ConnectorFuture<'a, bool>;

    /// Create an empty table. Fails with [`ConnectorError::AlreadyExists`] if
    /// it is already there.
    fn create_table<'a>(&'a self, table: &'a TableRef, schema: &'a str)
    -> ConnectorFuture<'a, ()>;
}

/// `dataset.table`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(dataset: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

impl FromStr for TableRef {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let valid = |part: &str| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        };
        match s.split_once('.') {
            Some((dataset, table)) if valid(dataset) && valid(table) => {
                Ok(TableRef::new(dataset, table))
            }
            _ => Err(format!(
                "invalid table reference '{s}': expected 'dataset.table'"
            )),
        }
    }
}

/// How a bulk load reads its source objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    pub format: SourceFormat,
    pub field_delimiter: char,
    /// Header rows to skip at the top of every object.
    pub skip_leading_rows: usize,
    /// The load fails once more rows than this are rejected.
    pub max_bad_records: usize,
    /// Accept rows with more fields than the schema, dropping the extra ones.
    pub ignore_unknown_values: bool,
    pub write_mode: WriteMode,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            format: SourceFormat::Csv,
            field_delimiter: ',',
            skip_leading_rows: 0,
            max_bad_records: 0,
            ignore_unknown_values: false,
            write_mode: WriteMode::Append,
        }
    }
}

/// One column of a table schema, in the usual JSON layout
/// `[{"name": "country", "type": "STRING", "mode": "NULLABLE"}, ...]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type", default = "default_column_type")]
    pub data_type: String,
    #[serde(default = "default_column_mode")]
    pub mode: String,
}

fn default_column_type() -> String {
    "STRING".to_string()
}

fn default_column_mode() -> String {
    "NULLABLE".to_string()
}

impl Column {
    pub fn is_required(&self) -> bool {
        self.mode.eq_ignore_ascii_case("REQUIRED")
    }
}

/// Parse a JSON schema definition.
pub fn parse_schema(schema: &str) -> ConnectorResult<Vec<Column>> {
    serde_json::from_str(schema)
        .map_err(|e| ConnectorError::Failed(format!("invalid table schema: {e}")))
}

/// Compile an object-name pattern. `*` does not cross `/`.
pub fn object_matcher(pattern: &str) -> ConnectorResult<GlobMatcher> {
    let glob = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|e| ConnectorError::Failed(format!("invalid object pattern '{pattern}': {e}")))?;
    Ok(glob.compile_matcher())
}

pub fn is_wildcard(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

/// Destination name of `object` when moving `pattern` to `destination`.
pub fn wildcard_destination(pattern: &str, object: &str, destination: &str) -> String {
    match pattern.find(['*', '?', '[']) {
        Some(idx) => {
            let prefix = &pattern[..idx];
            let rest = object.strip_prefix(prefix).unwrap_or(object);
            format!("{destination}{rest}")
        }
        None => destination.to_string(),
    }
}

/// Split one delimited record, honouring double quotes (`""` escapes a
/// quote inside a quoted field).
pub fn split_record(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            c if c == delimiter && !in_quotes => fields.push(std::mem::take(&mut field)),
            c => field.push(c),
        }
    }
    fields.push(field);
    fields
}

/// Format one record, quoting fields that need it.
pub fn join_record(fields: &[String], delimiter: char) -> String {
    fields
        .iter()
        .map(|field| {
            if field.contains(delimiter) || field.contains('"') || field.contains('\n') {
                format!("\"{}\"", field.replace('"', "\"\""))
            } else {
                field.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(&delimiter.to_string())
}

/// Rows accepted and rejected by [`parse_rows`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedRows {
    pub rows: Vec<Vec<String>>,
    pub rejected: usize,
}

/// Parse object contents into rows that fit `columns`.
///
/// A row is rejected when it has fewer fields than there are columns, when
/// a required column is empty, or when it has more fields and
/// `ignore_unknown_values` is off. With an empty `columns` list every row
/// is accepted as is.
pub fn parse_rows(contents: &str, columns: &[Column], options: &LoadOptions) -> ParsedRows {
    let mut parsed = ParsedRows::default();

    let lines = contents
        .lines()
        .skip(options.skip_leading_rows)
        .filter(|line| !line.trim().is_empty());

    for line in lines {
        let fields = match options.format {
            SourceFormat::Csv => split_record(line, options.field_delimiter),
            SourceFormat::Json => match json_fields(line, columns) {
                Some(fields) => fields,
                None => {
                    parsed.rejected += 1;
                    continue;
                }
            },
        };

        match fit_to_columns(fields, columns, options.ignore_unknown_values) {
            Some(row) => parsed.rows.push(row),
            None => parsed.rejected += 1,
        }
    }

    parsed
}

fn json_fields(line: &str, columns: &[Column]) -> Option<Vec<String>> {
    let Value::Object(map) = serde_json::from_str::<Value>(line).ok()? else {
        return None;
    };
    if columns.is_empty() {
        return Some(map.values().map(scalar_to_string).collect());
    }
    let mut fields: Vec<String> = columns
        .iter()
        .map(|c| map.get(&c.name).map(scalar_to_string).unwrap_or_default())
        .collect();
    let unknown = map
        .keys()
        .filter(|k| !columns.iter().any(|c| &c.name == *k))
        .count();
    // Surface unknown keys as extra fields so the caller's policy applies.
    fields.extend(std::iter::repeat_n(String::new(), unknown));
    Some(fields)
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn fit_to_columns(
    mut fields: Vec<String>,
    columns: &[Column],
    ignore_unknown_values: bool,
) -> Option<Vec<String>> {
    if columns.is_empty() {
        return Some(fields);
    }
    if fields.len() < columns.len() {
        return None;
    }
    if fields.len() > columns.len() {
        if !ignore_unknown_values {
            return None;
        }
        fields.truncate(columns.len());
    }
    let missing_required = columns
        .iter()
        .zip(&fields)
        .any(|(column, value)| column.is_required() && value.is_empty());
    if missing_required { None } else { Some(fields) }
}

/// Fail a load that rejected more rows than allowed.
pub fn check_bad_records(
    source: &str,
    rejected: usize,
    options: &LoadOptions,
) -> ConnectorResult<()> {
    if rejected > options.max_bad_records {
        return Err(ConnectorError::Failed(format!(
            "load of '{source}' rejected {rejected} rows (max_bad_records = {})",
            options.max_bad_records
        )));
    }
    Ok(())
}

/// The collaborators a pipeline's tasks are wired to.
#[derive(Debug, Clone)]
pub struct Connectors {
    pub mover: Arc<dyn ObjectMover>,
    pub loader: Arc<dyn BulkLoader>,
    pub queries: Arc<dyn QueryRunner>,
    pub catalog: Arc<dyn Catalog>,
}

impl Connectors {
    /// Wire every collaborator to the same in-memory warehouse.
    pub fn memory(warehouse: Arc<MemoryWarehouse>) -> Self {
        Self {
            mover: warehouse.clone(),
            loader: warehouse.clone(),
            queries: warehouse.clone(),
            catalog: warehouse,
        }
    }

    /// Build the collaborators selected by `[connectors]`.
    ///
    /// Relative roots are resolved against `base_dir` (the directory of the
    /// config file).
    pub fn from_config(
        cfg: &ConfigFile,
        fs: Arc<dyn FileSystem>,
        base_dir: &std::path::Path,
    ) -> Result<Self> {
        let section = cfg.connectors();
        match section.backend {
            BackendKind::Memory => Ok(Self::memory(Arc::new(MemoryWarehouse::new()))),
            BackendKind::Local => {
                let object_root = base_dir.join(&section.object_root);
                let warehouse_root = base_dir.join(&section.warehouse_root);
                let objects = Arc::new(LocalObjectStore::new(Arc::clone(&fs), object_root));
                let warehouse = Arc::new(LocalWarehouse::new(
                    fs,
                    warehouse_root,
                    Arc::clone(&objects),
                ));
                let queries = CommandQueryRunner::new(section.query_command.clone())
                    .with_working_dir(base_dir);
                Ok(Self {
                    mover: objects,
                    loader: warehouse.clone(),
                    queries: Arc::new(queries),
                    catalog: warehouse,
                })
            }
        }
    }
}
