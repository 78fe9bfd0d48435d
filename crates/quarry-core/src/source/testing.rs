//! Data source wrappers for tests and benchmarks.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use quarry_proto::Row;

use crate::catalog::Catalog;
use crate::error::BoxError;
use crate::query::QueryPlan;

use super::DataSource;

/// Counts calls made to the wrapped source.
pub struct CountingSource {
    inner: Arc<dyn DataSource>,
    queries: AtomicUsize,
    counts: AtomicUsize,
}

impl CountingSource {
    /// Wrap a source.
    pub fn new(inner: Arc<dyn DataSource>) -> Self {
        Self {
            inner,
            queries: AtomicUsize::new(0),
            counts: AtomicUsize::new(0),
        }
    }

    /// Number of `run_query` calls so far.
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Number of `run_count` calls so far.
    pub fn counts(&self) -> usize {
        self.counts.load(Ordering::SeqCst)
    }

    /// Total calls so far.
    pub fn calls(&self) -> usize {
        self.queries() + self.counts()
    }
}

impl DataSource for CountingSource {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn run_query(&self, plan: &QueryPlan) -> Result<Vec<Row>, BoxError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.run_query(plan)
    }

    fn run_count(&self, plan: &QueryPlan) -> Result<u64, BoxError> {
        self.counts.fetch_add(1, Ordering::SeqCst);
        self.inner.run_count(plan)
    }

    /// Not counted.
    fn catalog(&self) -> Result<Option<Catalog>, BoxError> {
        self.inner.catalog()
    }
}

/// Fails every call while switched on; otherwise delegates.
pub struct FailingSource {
    inner: Arc<dyn DataSource>,
    failing: AtomicBool,
}

impl FailingSource {
    /// Wrap a source, initially failing.
    pub fn new(inner: Arc<dyn DataSource>) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(true),
        }
    }

    /// Switch failures on or off.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), BoxError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err("data source unavailable".into());
        }
        Ok(())
    }
}

impl DataSource for FailingSource {
    fn name(&self) -> &str {
        "failing"
    }

    fn run_query(&self, plan: &QueryPlan) -> Result<Vec<Row>, BoxError> {
        self.check()?;
        self.inner.run_query(plan)
    }

    fn run_count(&self, plan: &QueryPlan) -> Result<u64, BoxError> {
        self.check()?;
        self.inner.run_count(plan)
    }

    /// Always delegates; only row and count calls fail.
    fn catalog(&self) -> Result<Option<Catalog>, BoxError> {
        self.inner.catalog()
    }
}
