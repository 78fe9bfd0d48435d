//! In-memory data source.

use std::collections::HashMap;

use parking_lot::RwLock;
use quarry_proto::Row;
use tracing::trace;

use crate::catalog::{Catalog, TableDef};
use crate::error::BoxError;
use crate::query::QueryPlan;

use super::scan::{self, TableScan};
use super::DataSource;

/// Tables held in memory, evaluated in-process.
///
/// This is the reference back end: other sources are checked against it.
#[derive(Debug, Default)]
pub struct MemorySource {
    tables: RwLock<HashMap<String, Vec<Row>>>,
}

impl MemorySource {
    /// Create a source with no tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style table registration.
    pub fn with_table(self, table: impl Into<String>, rows: Vec<Row>) -> Self {
        self.tables.write().insert(table.into(), rows);
        self
    }

    /// Create an empty table, keeping an existing one.
    pub fn create_table(&self, table: impl Into<String>) {
        self.tables.write().entry(table.into()).or_default();
    }

    /// Append a row, creating the table when missing.
    pub fn insert(&self, table: &str, row: Row) {
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .push(row);
    }

    /// Append several rows, creating the table when missing.
    pub fn insert_many(&self, table: &str, rows: impl IntoIterator<Item = Row>) {
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    /// Remove every row of a table.
    pub fn truncate(&self, table: &str) {
        if let Some(rows) = self.tables.write().get_mut(table) {
            rows.clear();
        }
    }

    /// Number of rows in a table.
    pub fn table_len(&self, table: &str) -> usize {
        self.tables.read().get(table).map(Vec::len).unwrap_or(0)
    }
}

impl TableScan for MemorySource {
    fn scan_table(&self, table: &str) -> Result<Vec<Row>, BoxError> {
        let tables = self.tables.read();
        let rows = tables
            .get(table)
            .ok_or_else(|| format!("no such table: {}", table))?;
        trace!(table, rows = rows.len(), "scanned memory table");
        Ok(rows.clone())
    }
}

impl DataSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
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
        for (name, rows) in self.tables.read().iter().filter(|(_, rows)| !rows.is_empty()) {
            catalog.register(TableDef::from_rows(name.clone(), rows));
        }
        Ok(Some(catalog))
    }
}
