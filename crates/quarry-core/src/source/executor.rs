//! Plan execution against a data source.

use std::time::Instant;

use quarry_proto::Row;
use tracing::{debug, warn};

use crate::catalog::Catalog;
use crate::error::Error;
use crate::query::QueryPlan;

use super::cancel::CancelToken;
use super::DataSource;

/// Runs plans against a data source.
///
/// The executor never retries; a failed call surfaces as
/// [`Error::DataSource`] with the adapter's error as its source.
pub struct Executor<'a> {
    source: &'a dyn DataSource,
    cancel: &'a CancelToken,
}

impl<'a> Executor<'a> {
    /// Create a new executor.
    pub fn new(source: &'a dyn DataSource, cancel: &'a CancelToken) -> Self {
        Self { source, cancel }
    }

    /// Run a plan and return its raw rows.
    pub fn execute(&self, plan: &QueryPlan) -> Result<Vec<Row>, Error> {
        self.cancel.check("query")?;
        let start = Instant::now();

        let rows = self.source.run_query(plan).map_err(|source| {
            warn!(source_name = self.source.name(), error = %source, "query failed");
            Error::DataSource {
                operation: "query",
                source,
            }
        })?;

        // Results that arrive after cancellation are discarded.
        self.cancel.check("query")?;
        debug!(
            source_name = self.source.name(),
            rows = rows.len(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "executed query plan"
        );
        Ok(rows)
    }

    /// Count distinct identities matching a plan.
    pub fn execute_count(&self, plan: &QueryPlan) -> Result<u64, Error> {
        self.cancel.check("count")?;
        let start = Instant::now();

        let count_plan = plan.for_count();
        let count = self.source.run_count(&count_plan).map_err(|source| {
            warn!(source_name = self.source.name(), error = %source, "count failed");
            Error::DataSource {
                operation: "count",
                source,
            }
        })?;

        self.cancel.check("count")?;
        debug!(
            source_name = self.source.name(),
            count,
            elapsed_us = start.elapsed().as_micros() as u64,
            "executed count plan"
        );
        Ok(count)
    }

    /// Ask the source to describe its tables.
    pub fn describe(&self) -> Result<Option<Catalog>, Error> {
        self.cancel.check("catalog")?;
        let catalog = self.source.catalog().map_err(|source| {
            warn!(source_name = self.source.name(), error = %source, "catalog failed");
            Error::DataSource {
                operation: "catalog",
                source,
            }
        })?;
        debug!(
            source_name = self.source.name(),
            tables = catalog.as_ref().map_or(0, Catalog::len),
            "described data source"
        );
        Ok(catalog)
    }
}
