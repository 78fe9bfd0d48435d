//! Quarry data model.
//!
//! This crate defines the types shared by the collection engine, its data
//! source adapters and its callers.
//!
//! # Modules
//!
//! - [`value`] - Scalar values
//! - [`row`] - Raw rows and qualified column references
//! - [`filter`] - Filter expression trees
//! - [`sort`] - Multi-key sort specifications
//! - [`join`] - Join and attribute-join specifications
//! - [`entity`] - Hydrated entities
//! - [`error`] - Construction-time errors

pub mod entity;
pub mod error;
pub mod filter;
pub mod join;
pub mod row;
pub mod sort;
pub mod value;

pub use entity::Entity;
pub use error::Error;
pub use filter::{Combinator, Condition, FilterExpr, FilterNode, FilterOp, FilterValue};
pub use join::{AttributeJoin, JoinCondition, JoinKind, JoinSpec};
pub use row::{split_qualified, ColumnRef, Row};
pub use sort::{SortDirection, SortKey, SortSpec};
pub use value::Value;
