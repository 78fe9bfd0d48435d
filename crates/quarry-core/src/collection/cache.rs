//! Materialization cache.

use std::sync::Arc;

use quarry_proto::Entity;

use crate::query::QueryPlan;

/// Materialization state of a collection.
///
/// `Building`, `Executing` and `Hydrating` are only observed in logs while a
/// materialization is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// Nothing materialized for the current configuration.
    Unmaterialized,
    /// Building the query plan.
    Building,
    /// Waiting on the data source.
    Executing,
    /// Turning rows into entities.
    Hydrating,
    /// Items are cached.
    Materialized,
}

/// Everything derived from one configuration snapshot.
#[derive(Debug, Default)]
pub(crate) struct Materialized {
    pub(crate) plan: Option<Arc<QueryPlan>>,
    pub(crate) items: Option<Arc<[Entity]>>,
    pub(crate) size: Option<u64>,
}

impl Materialized {
    /// Drop everything; the configuration changed.
    pub(crate) fn invalidate(&mut self) {
        self.plan = None;
        self.items = None;
        self.size = None;
    }

    /// Drop results but keep the plan.
    pub(crate) fn clear_results(&mut self) {
        self.items = None;
        self.size = None;
    }

    pub(crate) fn state(&self) -> LoadState {
        if self.items.is_some() {
            LoadState::Materialized
        } else {
            LoadState::Unmaterialized
        }
    }
}
