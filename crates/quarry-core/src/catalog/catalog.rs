//! In-memory table registry.

use std::collections::HashMap;

use tracing::debug;

use super::table::TableDef;

/// Registry of table definitions, keyed by table name.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tables: HashMap<String, TableDef>,
}

impl Catalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration.
    pub fn with_table(mut self, table: TableDef) -> Self {
        self.register(table);
        self
    }

    /// Register a table, replacing any previous definition.
    pub fn register(&mut self, table: TableDef) {
        debug!(table = %table.name, columns = table.columns.len(), "registered table");
        self.tables.insert(table.name.clone(), table);
    }

    /// Get a table definition.
    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.get(name)
    }

    /// Check if a table is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Identity column of a registered table.
    pub fn identity_of(&self, table: &str) -> Option<&str> {
        self.tables.get(table)?.identity.as_deref()
    }

    /// Registered table names, sorted.
    pub fn table_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Check if no table is registered.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
