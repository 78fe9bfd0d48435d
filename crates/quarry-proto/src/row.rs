//! Raw rows exchanged with data sources, and column references.

use serde::Serialize;

use crate::error::Error;
use crate::value::Value;

/// A raw row: ordered column name/value pairs.
///
/// Lookups are linear; rows are narrow and column order matters more than
/// lookup speed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    /// Create an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty row with room for `capacity` columns.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            columns: Vec::with_capacity(capacity),
        }
    }

    /// Builder-style column append.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Set a column, replacing an existing one with the same name.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.columns.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.columns.push((name, value)),
        }
    }

    /// Get a column value by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Check whether a column is present (it may still hold NULL).
    pub fn contains(&self, name: &str) -> bool {
        self.columns.iter().any(|(n, _)| n == name)
    }

    /// Iterate over columns in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Column names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Check if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Consume the row into its column pairs.
    pub fn into_columns(self) -> Vec<(String, Value)> {
        self.columns
    }
}

impl From<Vec<(String, Value)>> for Row {
    fn from(columns: Vec<(String, Value)>) -> Self {
        let mut row = Row::with_capacity(columns.len());
        for (name, value) in columns {
            row.set(name, value);
        }
        row
    }
}

impl<'a> FromIterator<(&'a str, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (&'a str, Value)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (name, value) in iter {
            row.set(name, value);
        }
        row
    }
}

impl IntoIterator for Row {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.into_iter()
    }
}

/// Split `"alias.column"` into its qualifier and column parts.
///
/// Unqualified names return `None` as the qualifier.
pub fn split_qualified(name: &str) -> (Option<&str>, &str) {
    match name.split_once('.') {
        Some((table, column)) => (Some(table), column),
        None => (None, name),
    }
}

/// A fully qualified column: table alias plus column name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ColumnRef {
    /// Table alias the column belongs to.
    pub table: String,
    /// Column name within that table.
    pub column: String,
}

impl ColumnRef {
    /// Create a column reference.
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Parse a qualified `"alias.column"` reference.
    pub fn parse(qualified: &str) -> Result<Self, Error> {
        match split_qualified(qualified) {
            (Some(table), column)
                if !table.is_empty() && !column.is_empty() && !column.contains('.') =>
            {
                Ok(Self::new(table, column))
            }
            _ => Err(Error::InvalidColumnRef(qualified.to_string())),
        }
    }

    /// The `"alias.column"` form.
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.table, self.column)
    }
}

impl std::fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}
