//! Data sources and plan execution.
//!
//! A [`DataSource`] runs a [`QueryPlan`] and returns raw rows. The
//! [`Executor`] wraps every call with cancellation checks and error context.
//! In-process sources share the join/filter/sort evaluation in [`scan`].

mod cancel;
mod executor;
mod memory;
pub mod scan;
mod sled_source;
pub mod testing;

use quarry_proto::Row;

pub use crate::error::BoxError;
use crate::catalog::Catalog;
use crate::query::QueryPlan;

pub use cancel::CancelToken;
pub use executor::Executor;
pub use memory::MemorySource;
pub use scan::{JoinStrategy, TableScan};
pub use sled_source::{SledConfig, SledSource};

/// A back end able to run query plans.
///
/// Implementations must be thread-safe; a collection may be read from
/// several threads at once. They must not retry on their own.
pub trait DataSource: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Run a plan and return its projected rows, in plan order.
    fn run_query(&self, plan: &QueryPlan) -> Result<Vec<Row>, BoxError>;

    /// Count distinct base identities matching the plan's joins and predicate.
    fn run_count(&self, plan: &QueryPlan) -> Result<u64, BoxError>;

    /// Describe the tables this source holds.
    ///
    /// Collections without a catalog of their own validate field names
    /// against this one. `None` means the source cannot describe itself.
    fn catalog(&self) -> Result<Option<Catalog>, BoxError> {
        Ok(None)
    }
}
