//! Multi-key sort specifications.

use serde::Serialize;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    /// Ascending order.
    Asc,
    /// Descending order.
    Desc,
}

impl std::fmt::Display for SortDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SortDirection::Asc => f.write_str("ASC"),
            SortDirection::Desc => f.write_str("DESC"),
        }
    }
}

/// A single sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SortKey {
    /// Field to order by.
    pub field: String,
    /// Sort direction.
    pub direction: SortDirection,
}

impl SortKey {
    /// Create an ascending key.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    /// Create a descending key.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Ordered sort keys, highest priority first. A field appears at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SortSpec {
    keys: Vec<SortKey>,
}

impl SortSpec {
    /// Create an empty sort specification.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key with the lowest priority. No-op if the field is already present.
    pub fn append(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        let field = field.into();
        if !self.contains(&field) {
            self.keys.push(SortKey { field, direction });
        }
        self
    }

    /// Add a key with the highest priority, dropping any existing key for the field.
    pub fn prepend(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        let field = field.into();
        self.keys.retain(|key| key.field != field);
        self.keys.insert(0, SortKey { field, direction });
        self
    }

    /// Update the direction of an existing key in place, or append a new one.
    pub fn replace(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        let field = field.into();
        match self.keys.iter_mut().find(|key| key.field == field) {
            Some(key) => key.direction = direction,
            None => self.keys.push(SortKey { field, direction }),
        }
        self
    }

    /// Check whether a field already has a key.
    pub fn contains(&self, field: &str) -> bool {
        self.keys.iter().any(|key| key.field == field)
    }

    /// Direction of a field's key, if present.
    pub fn direction_of(&self, field: &str) -> Option<SortDirection> {
        self.keys
            .iter()
            .find(|key| key.field == field)
            .map(|key| key.direction)
    }

    /// Keys in priority order.
    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    /// Iterate over keys in priority order.
    pub fn iter(&self) -> std::slice::Iter<'_, SortKey> {
        self.keys.iter()
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check if there are no keys.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl<'a> IntoIterator for &'a SortSpec {
    type Item = &'a SortKey;
    type IntoIter = std::slice::Iter<'a, SortKey>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.iter()
    }
}

impl FromIterator<SortKey> for SortSpec {
    fn from_iter<I: IntoIterator<Item = SortKey>>(iter: I) -> Self {
        iter.into_iter()
            .fold(SortSpec::new(), |spec, key| spec.append(key.field, key.direction))
    }
}
