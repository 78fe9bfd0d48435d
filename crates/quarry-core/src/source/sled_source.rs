//! Persistent data source on sled.
//!
//! Each table is a sled tree named `table:<name>`; rows are stored as rkyv
//! records under monotonically increasing keys, so scans return rows in
//! insertion order.

use std::path::PathBuf;

use quarry_proto::{Row, Value};
use rkyv::{Archive, Deserialize, Serialize};
use tracing::{debug, trace};

use crate::catalog::{Catalog, TableDef};
use crate::error::{BoxError, Error};
use crate::query::QueryPlan;

use super::scan::{self, TableScan};
use super::DataSource;

const TABLE_PREFIX: &str = "table:";

/// Configuration for the sled-backed source.
#[derive(Debug, Clone)]
pub struct SledConfig {
    /// Path to the database directory.
    pub path: PathBuf,

    /// Page cache capacity in bytes.
    pub cache_capacity: u64,

    /// Flush interval in milliseconds. None means flush on every write.
    pub flush_every_ms: Option<u64>,

    /// Enable zstd compression.
    pub compression: bool,

    /// Temporary database (deleted on drop).
    pub temporary: bool,
}

impl Default for SledConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./quarry_data"),
            cache_capacity: 256 * 1024 * 1024, // 256MB
            flush_every_ms: Some(1000),
            compression: true,
            temporary: false,
        }
    }
}

impl SledConfig {
    /// Create a new configuration with the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Create a temporary configuration for testing.
    pub fn temporary() -> Self {
        Self {
            path: PathBuf::from(""),
            temporary: true,
            ..Default::default()
        }
    }

    /// Set the page cache capacity.
    pub fn with_cache_capacity(mut self, bytes: u64) -> Self {
        self.cache_capacity = bytes;
        self
    }

    /// Set the flush interval.
    pub fn with_flush_every_ms(mut self, ms: Option<u64>) -> Self {
        self.flush_every_ms = ms;
        self
    }

    /// Enable or disable compression.
    pub fn with_compression(mut self, compression: bool) -> Self {
        self.compression = compression;
        self
    }

    /// Convert to sled configuration.
    pub(crate) fn to_sled_config(&self) -> sled::Config {
        let mut config = sled::Config::new()
            .cache_capacity(self.cache_capacity)
            .use_compression(self.compression);

        if self.temporary {
            config = config.temporary(true);
        } else {
            config = config.path(&self.path);
        }

        if let Some(ms) = self.flush_every_ms {
            config = config.flush_every_ms(Some(ms));
        }

        config
    }
}

/// A stored row: column names and values in parallel.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
struct StoredRow {
    names: Vec<String>,
    values: Vec<Value>,
}

impl StoredRow {
    fn from_row(row: Row) -> Self {
        let (names, values) = row.into_columns().into_iter().unzip();
        Self { names, values }
    }

    fn into_row(self) -> Row {
        self.names
            .into_iter()
            .zip(self.values)
            .collect::<Vec<_>>()
            .into()
    }

    fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}

/// Tables persisted in sled, evaluated in-process.
pub struct SledSource {
    db: sled::Db,
}

impl SledSource {
    /// Open or create a database.
    pub fn open(config: SledConfig) -> Result<Self, Error> {
        let db = config.to_sled_config().open()?;
        debug!(path = %config.path.display(), temporary = config.temporary, "opened sled source");
        Ok(Self { db })
    }

    fn tree_name(table: &str) -> String {
        format!("{}{}", TABLE_PREFIX, table)
    }

    fn tree(&self, table: &str) -> Result<sled::Tree, Error> {
        Ok(self.db.open_tree(Self::tree_name(table))?)
    }

    /// Create an empty table, keeping an existing one.
    pub fn create_table(&self, table: &str) -> Result<(), Error> {
        self.tree(table).map(|_| ())
    }

    /// Check if a table exists.
    pub fn has_table(&self, table: &str) -> bool {
        let name = Self::tree_name(table);
        self.db
            .tree_names()
            .iter()
            .any(|tree| tree.as_ref() == name.as_bytes())
    }

    /// Append a row, creating the table when missing.
    pub fn insert(&self, table: &str, row: Row) -> Result<(), Error> {
        let tree = self.tree(table)?;
        let key = self.db.generate_id()?;
        tree.insert(key.to_be_bytes(), StoredRow::from_row(row).to_bytes()?)?;
        Ok(())
    }

    /// Append several rows, creating the table when missing.
    pub fn insert_many(&self, table: &str, rows: impl IntoIterator<Item = Row>) -> Result<usize, Error> {
        let tree = self.tree(table)?;
        let mut batch = sled::Batch::default();
        let mut count = 0;
        for row in rows {
            let key = self.db.generate_id()?;
            batch.insert(key.to_be_bytes().to_vec(), StoredRow::from_row(row).to_bytes()?);
            count += 1;
        }
        tree.apply_batch(batch)?;
        trace!(table, rows = count, "inserted rows");
        Ok(count)
    }

    /// Number of rows in a table.
    pub fn table_len(&self, table: &str) -> Result<usize, Error> {
        if !self.has_table(table) {
            return Ok(0);
        }
        Ok(self.tree(table)?.len())
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.db.flush()?;
        Ok(())
    }

    fn read_table(&self, table: &str) -> Result<Vec<Row>, Error> {
        let tree = self.tree(table)?;
        let mut rows = Vec::with_capacity(tree.len());
        for entry in tree.iter() {
            let (_, bytes) = entry?;
            rows.push(StoredRow::from_bytes(&bytes)?.into_row());
        }
        trace!(table, rows = rows.len(), "scanned sled table");
        Ok(rows)
    }
}

impl TableScan for SledSource {
    fn scan_table(&self, table: &str) -> Result<Vec<Row>, BoxError> {
        if !self.has_table(table) {
            return Err(format!("no such table: {}", table).into());
        }
        Ok(self.read_table(table)?)
    }
}

impl DataSource for SledSource {
    fn name(&self) -> &str {
        "sled"
    }

    fn run_query(&self, plan: &QueryPlan) -> Result<Vec<Row>, BoxError> {
        scan::run_query(self, plan)
    }

    fn run_count(&self, plan: &QueryPlan) -> Result<u64, BoxError> {
        scan::run_count(self, plan)
    }

    /// Tables without rows are left out: their columns are unknown.
    fn catalog(&self) -> Result<Option<Catalog>, BoxError> {
        let mut catalog = Catalog::new();
        for tree in self.db.tree_names() {
            let Some(table) = std::str::from_utf8(&tree)
                .ok()
                .and_then(|name| name.strip_prefix(TABLE_PREFIX))
            else {
                continue;
            };
            let rows = self.read_table(table)?;
            if !rows.is_empty() {
                catalog.register(TableDef::from_rows(table, &rows));
            }
        }
        Ok(Some(catalog))
    }
}
