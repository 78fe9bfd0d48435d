//! Lazily materialized collections.
//!
//! A [`Collection`] accumulates filters, sorts, joins, field selection and
//! paging, and only runs a query when its items or size are read. Results
//! are cached until the configuration changes or [`Collection::clear`] is
//! called.

mod cache;
mod collection;
mod options;

pub use cache::LoadState;
pub use collection::Collection;
pub use options::CollectionOptions;
