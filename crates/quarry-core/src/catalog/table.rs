//! Table definitions.

use serde::Serialize;

use quarry_proto::Row;

use super::column::ColumnDef;

/// A table known to the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableDef {
    /// Table name.
    pub name: String,
    /// Identity column, when the table has a single-column key.
    pub identity: Option<String>,
    /// Columns in declaration order.
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    /// Create a table definition with no columns.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identity: None,
            columns: Vec::new(),
        }
    }

    /// Describe a table by the columns its rows carry, in first-seen order.
    ///
    /// A column is nullable when some row holds NULL in it or lacks it.
    pub fn from_rows(name: impl Into<String>, rows: &[Row]) -> Self {
        let mut table = Self::new(name);
        for (index, row) in rows.iter().enumerate() {
            for (column, value) in row.iter() {
                if !table.has_column(column) {
                    // Rows scanned before this one lack the column.
                    table.columns.push(ColumnDef {
                        name: column.to_string(),
                        nullable: index > 0,
                    });
                }
                if value.is_null() {
                    table.mark_nullable(column);
                }
            }
            for column in table.columns.iter_mut() {
                if row.get(&column.name).is_none() {
                    column.nullable = true;
                }
            }
        }
        table
    }

    fn mark_nullable(&mut self, name: &str) {
        if let Some(column) = self.columns.iter_mut().find(|c| c.name == name) {
            column.nullable = true;
        }
    }

    /// Add a non-nullable column.
    pub fn with_column(mut self, name: impl Into<String>) -> Self {
        self.add_column(ColumnDef::new(name));
        self
    }

    /// Add a nullable column.
    pub fn with_nullable_column(mut self, name: impl Into<String>) -> Self {
        self.add_column(ColumnDef::nullable(name));
        self
    }

    /// Add several non-nullable columns.
    pub fn with_columns<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            self.add_column(ColumnDef::new(name));
        }
        self
    }

    /// Set the identity column, adding it when missing.
    pub fn with_identity(mut self, column: impl Into<String>) -> Self {
        let column = column.into();
        if !self.has_column(&column) {
            self.columns.insert(0, ColumnDef::new(column.clone()));
        }
        self.identity = Some(column);
        self
    }

    /// Add a column, replacing one with the same name.
    pub fn add_column(&mut self, column: ColumnDef) {
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(existing) => *existing = column,
            None => self.columns.push(column),
        }
    }

    /// Get a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Check if the table has a column.
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Column names in declaration order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}
