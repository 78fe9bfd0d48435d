//! Immutable collection configuration, as consumed by the planner.

use serde::Serialize;

use quarry_proto::{FilterExpr, JoinSpec, SortSpec};

/// Default alias of the base table.
pub const DEFAULT_BASE_ALIAS: &str = "main_table";

/// Which base fields a collection projects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSelection {
    /// Every column of the base table.
    #[default]
    All,
    /// Only the named fields, in order. The identity is always included.
    Only(Vec<String>),
}

impl FieldSelection {
    /// Select the named fields.
    pub fn only<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldSelection::Only(fields.into_iter().map(Into::into).collect())
    }
}

/// Snapshot of everything that determines a collection's query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionQuery {
    /// Base table name.
    pub table: String,
    /// Alias of the base table.
    pub base_alias: String,
    /// Identity column of the base table.
    pub id_field: String,
    /// Accumulated filter; several filters combine with AND.
    pub filter: Option<FilterExpr>,
    /// Sort keys, highest priority first.
    pub sort: SortSpec,
    /// Joins in the order they were added.
    pub joins: Vec<JoinSpec>,
    /// Base field projection.
    pub fields: FieldSelection,
    /// Page size; `None` disables pagination.
    pub page_size: Option<u32>,
    /// 1-based page number.
    pub current_page: u32,
}

impl CollectionQuery {
    /// Create an unfiltered, unpaginated query over a table.
    pub fn new(table: impl Into<String>, id_field: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            base_alias: DEFAULT_BASE_ALIAS.to_string(),
            id_field: id_field.into(),
            filter: None,
            sort: SortSpec::new(),
            joins: Vec::new(),
            fields: FieldSelection::All,
            page_size: None,
            current_page: 1,
        }
    }

    /// Override the base alias.
    pub fn with_base_alias(mut self, alias: impl Into<String>) -> Self {
        self.base_alias = alias.into();
        self
    }

    /// Look up a join by alias.
    pub fn join(&self, alias: &str) -> Option<&JoinSpec> {
        self.joins.iter().find(|j| j.alias == alias)
    }

    /// Check whether an alias is the base alias or a join alias.
    pub fn has_alias(&self, alias: &str) -> bool {
        alias == self.base_alias || self.join(alias).is_some()
    }

    /// Zero-based row offset of the current page.
    pub fn offset(&self) -> Option<u64> {
        self.page_size
            .map(|size| u64::from(self.current_page.saturating_sub(1)) * u64::from(size))
    }
}
