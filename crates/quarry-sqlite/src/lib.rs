//! Quarry SQLite - A relational data source for Quarry collections.
//!
//! Query plans are compiled to a single parameterized `SELECT` and run on a
//! shared [`rusqlite::Connection`]. Results agree with the in-process
//! sources of `quarry-core` for the same plan.

mod error;
pub mod sql;
mod source;

pub use error::Error;
pub use sql::{compile_count, compile_query, CompiledQuery};
pub use source::{SqliteConfig, SqliteSource};
