//! Collection options.

use crate::query::{RowBudget, DEFAULT_BASE_ALIAS};

/// Options fixed when a collection is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionOptions {
    /// Alias of the base table.
    pub base_alias: String,

    /// Page size applied at creation. None leaves the collection unpaginated.
    pub default_page_size: Option<u32>,

    /// Cap on raw rows per materialization.
    pub budget: RowBudget,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            base_alias: DEFAULT_BASE_ALIAS.to_string(),
            default_page_size: None,
            budget: RowBudget::default(),
        }
    }
}

impl CollectionOptions {
    /// Set the base alias.
    pub fn with_base_alias(mut self, alias: impl Into<String>) -> Self {
        self.base_alias = alias.into();
        self
    }

    /// Set the default page size. Zero leaves the collection unpaginated.
    pub fn with_default_page_size(mut self, size: u32) -> Self {
        self.default_page_size = Some(size).filter(|s| *s > 0);
        self
    }

    /// Set the row budget.
    pub fn with_budget(mut self, budget: RowBudget) -> Self {
        self.budget = budget;
        self
    }
}
