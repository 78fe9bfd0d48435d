//! Quarry Benchmark Suite
//!
//! Criterion benchmarks for the collection engine.
//!
//! # Benchmark Categories
//!
//! - **Filter**: In-process filter evaluation and LIKE matching
//! - **Collection**: Materialization over the memory, sled and SQLite
//!   sources, attribute joins and join strategy selection

pub mod fixtures;
pub mod harness;

pub use fixtures::{generate_attributes, generate_categories, generate_products, Scale};
pub use harness::TestContext;
