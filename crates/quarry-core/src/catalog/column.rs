//! Column definitions for tables.

use serde::Serialize;

/// A column definition within a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Whether the column may hold NULL.
    pub nullable: bool,
}

impl ColumnDef {
    /// Create a new non-nullable column.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nullable: false,
        }
    }

    /// Create a nullable column.
    pub fn nullable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nullable: true,
        }
    }
}
