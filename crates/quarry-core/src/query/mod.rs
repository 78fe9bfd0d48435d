//! Query planning and in-process evaluation.
//!
//! This module provides:
//! - Value comparison shared by every in-process operation
//! - Filter evaluation against raw rows
//! - The configuration snapshot consumed by the planner
//! - Query planning into back-end-neutral plans
//! - Plan summaries for inspection

pub mod compare;
mod explain;
mod filter;
mod plan;
mod planner;
mod snapshot;

pub use compare::{compare_values, sort_cmp, values_equal, ValueKey};
pub use explain::{JoinSummary, PlanSummary};
pub use filter::FilterEvaluator;
pub use plan::{
    is_hidden_output, match_marker, AttributeSlot, ColumnRole, JoinPredicate, PlannedAttribute,
    PlannedJoin, Projection, QueryPlan, RowBudget, TableRef, IDENTITY_OUTPUT, MATCH_MARKER_PREFIX,
};
pub use planner::QueryPlanBuilder;
pub use snapshot::{CollectionQuery, FieldSelection, DEFAULT_BASE_ALIAS};
