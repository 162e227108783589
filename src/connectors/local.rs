// src/connectors/local.rs

//! Directory-backed object store and warehouse.
//!
//! Objects are files under the object root, named by their `/`-separated
//! path relative to it. A table `dataset.table` is the directory
//! `<warehouse_root>/<dataset>/<table>/` holding `schema.json` and
//! `data.csv` (no header row).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use super::{
    BulkLoader, Catalog, ConnectorError, ConnectorFuture, ConnectorResult, LoadOptions,
    ObjectMover, TableRef, check_bad_records, is_wildcard, join_record, object_matcher,
    parse_rows, parse_schema, split_record, wildcard_destination,
};
use crate::fs::FileSystem;
use crate::types::WriteMode;

const SCHEMA_FILE: &str = "schema.json";
const DATA_FILE: &str = "data.csv";

#[derive(Debug)]
pub struct LocalObjectStore {
    fs: Arc<dyn FileSystem>,
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(fs: Arc<dyn FileSystem>, root: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, name: &str) -> PathBuf {
        name.split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |path, part| path.join(part))
    }

    /// Every object name under the root, sorted.
    pub fn list(&self) -> ConnectorResult<Vec<String>> {
        let mut names = Vec::new();
        if self.fs.is_dir(&self.root) {
            self.walk(&self.root, &mut names)?;
        }
        names.sort();
        Ok(names)
    }

    fn walk(&self, dir: &Path, names: &mut Vec<String>) -> ConnectorResult<()> {
        for entry in self.fs.read_dir(dir)? {
            if self.fs.is_dir(&entry) {
                self.walk(&entry, names)?;
            } else if let Ok(rel) = entry.strip_prefix(&self.root) {
                let name: Vec<String> = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                names.push(name.join("/"));
            }
        }
        Ok(())
    }

    /// Names of the objects matching `pattern`.
    ///
    /// A pattern without wildcards matches the single object of that name,
    /// if it exists.
    pub fn matching(&self, pattern: &str) -> ConnectorResult<Vec<String>> {
        if !is_wildcard(pattern) {
            let found = self.fs.is_file(&self.object_path(pattern));
            return Ok(found.then(|| pattern.to_string()).into_iter().collect());
        }
        let matcher = object_matcher(pattern)?;
        Ok(self
            .list()?
            .into_iter()
            .filter(|name| matcher.is_match(name.as_str()))
            .collect())
    }

    pub fn read(&self, name: &str) -> ConnectorResult<String> {
        Ok(self.fs.read_to_string(&self.object_path(name))?)
    }
}

impl ObjectMover for LocalObjectStore {
    fn move_object<'a>(
        &'a self,
        source: &'a str,
        destination: &'a str,
    ) -> ConnectorFuture<'a, u64> {
        Box::pin(async move {
            let names = self.matching(source)?;
            if names.is_empty() {
                if is_wildcard(source) {
                    warn!(source = %source, "no objects match; nothing to move");
                    return Ok(0);
                }
                return Err(ConnectorError::NotFound(source.to_string()));
            }
            for name in &names {
                let target = wildcard_destination(source, name, destination);
                self.fs
                    .rename(&self.object_path(name), &self.object_path(&target))?;
                debug!(from = %name, to = %target, "object moved");
            }
            Ok(names.len() as u64)
        })
    }
}

#[derive(Debug)]
pub struct LocalWarehouse {
    fs: Arc<dyn FileSystem>,
    root: PathBuf,
    objects: Arc<LocalObjectStore>,
}

impl LocalWarehouse {
    pub fn new(fs: Arc<dyn FileSystem>, root: impl Into<PathBuf>, objects: Arc<LocalObjectStore>) -> Self {
        Self {
            fs,
            root: root.into(),
            objects,
        }
    }

    fn table_dir(&self, table: &TableRef) -> PathBuf {
        self.root.join(&table.dataset).join(&table.table)
    }

    /// Rows currently stored in `table`.
    pub fn rows(&self, table: &TableRef) -> ConnectorResult<Vec<Vec<String>>> {
        let path = self.table_dir(table).join(DATA_FILE);
        if !self.fs.is_file(&path) {
            return Ok(Vec::new());
        }
        let text = self.fs.read_to_string(&path)?;
        Ok(text
            .lines()
            .filter(|line| !line.is_empty())
            .map(|line| split_record(line, ','))
            .collect())
    }

    fn write_rows(&self, table: &TableRef, rows: &[Vec<String>]) -> ConnectorResult<()> {
        let mut text = String::new();
        for row in rows {
            text.push_str(&join_record(row, ','));
            text.push('\n');
        }
        self.fs
            .write(&self.table_dir(table).join(DATA_FILE), text.as_bytes())?;
        Ok(())
    }
}

impl BulkLoader for LocalWarehouse {
    fn load<'a>(
        &'a self,
        source: &'a str,
        table: &'a TableRef,
        options: &'a LoadOptions,
    ) -> ConnectorFuture<'a, u64> {
        Box::pin(async move {
            let schema_path = self.table_dir(table).join(SCHEMA_FILE);
            if !self.fs.is_file(&schema_path) {
                return Err(ConnectorError::NotFound(table.to_string()));
            }
            let columns = parse_schema(&self.fs.read_to_string(&schema_path)?)?;

            let names = self.objects.matching(source)?;
            if names.is_empty() {
                return Err(ConnectorError::NotFound(source.to_string()));
            }

            let mut loaded = Vec::new();
            let mut rejected = 0;
            for name in &names {
                let parsed = parse_rows(&self.objects.read(name)?, &columns, options);
                loaded.extend(parsed.rows);
                rejected += parsed.rejected;
            }
            check_bad_records(source, rejected, options)?;

            let count = loaded.len() as u64;
            let rows = match options.write_mode {
                WriteMode::Append => {
                    let mut rows = self.rows(table)?;
                    rows.extend(loaded);
                    rows
                }
                WriteMode::Overwrite => loaded,
            };
            self.write_rows(table, &rows)?;
            debug!(table = %table, loaded = count, rejected, "load finished");
            Ok(count)
        })
    }
}

impl Catalog for LocalWarehouse {
    fn table_exists<'a>(&'a self, table: &'a TableRef) -> ConnectorFuture<'a, bool> {
        Box::pin(async move { Ok(self.fs.is_file(&self.table_dir(table).join(SCHEMA_FILE))) })
    }

    fn create_table<'a>(
        &'a self,
        table: &'a TableRef,
        schema: &'a str,
    ) -> ConnectorFuture<'a, ()> {
        Box::pin(async move {
            parse_schema(schema)?;
            let dir = self.table_dir(table);
            if !self.fs.create_new(&dir.join(SCHEMA_FILE), schema.as_bytes())? {
                return Err(ConnectorError::AlreadyExists(table.to_string()));
            }
            self.fs.write(&dir.join(DATA_FILE), b"")?;
            debug!(table = %table, dir = ?dir, "table created");
            Ok(())
        })
    }
}
