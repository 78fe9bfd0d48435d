//! Quarry Core - Query planning, execution and hydration for lazy collections.
//!
//! A [`Collection`] describes a query over one base table: filters, sorts,
//! joins (including attribute joins over key/value side tables), projected
//! fields and a page window. Reading its items builds a [`QueryPlan`], runs
//! it through a [`DataSource`] and hydrates the rows into entities.

pub mod catalog;
pub mod collection;
pub mod error;
pub mod hydrate;
pub mod query;
pub mod source;

pub use catalog::{Catalog, ColumnDef, TableDef};
pub use collection::{Collection, CollectionOptions, LoadState};
pub use error::{BoxError, Error};
pub use hydrate::Hydrator;
pub use query::{
    CollectionQuery, FieldSelection, FilterEvaluator, PlanSummary, QueryPlan, QueryPlanBuilder,
    RowBudget,
};
pub use source::{CancelToken, DataSource, Executor, MemorySource, SledConfig, SledSource};

/// Re-export protocol types.
pub use quarry_proto as proto;
