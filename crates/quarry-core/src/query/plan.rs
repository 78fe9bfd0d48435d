//! Resolved, back-end-neutral query plans.
//!
//! Every column in a plan is qualified with a table alias. Data source
//! adapters translate plans; they never see collection configuration.

use serde::Serialize;

use quarry_proto::{ColumnRef, FilterExpr, JoinKind, SortSpec, Value};

use crate::error::Error;

/// Output name under which every plan projects the base identity.
pub const IDENTITY_OUTPUT: &str = "__identity";

/// Prefix of the hidden per-join match marker outputs.
pub const MATCH_MARKER_PREFIX: &str = "__match_";

/// Output name of the match marker for a join alias.
pub fn match_marker(alias: &str) -> String {
    format!("{}{}", MATCH_MARKER_PREFIX, alias)
}

/// Check whether an output name is internal to planning and hydration.
pub fn is_hidden_output(name: &str) -> bool {
    name == IDENTITY_OUTPUT || name.starts_with(MATCH_MARKER_PREFIX)
}

/// Cap on raw rows a single materialization may receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowBudget {
    /// Maximum raw rows per query.
    pub max_rows: usize,
}

impl Default for RowBudget {
    fn default() -> Self {
        Self { max_rows: 100_000 }
    }
}

impl RowBudget {
    /// Create a budget with a custom limit.
    pub fn new(max_rows: usize) -> Self {
        Self { max_rows }
    }

    /// Create an unlimited budget (use with caution).
    pub fn unlimited() -> Self {
        Self {
            max_rows: usize::MAX,
        }
    }

    /// Fail when `rows` exceeds the budget.
    pub fn check(&self, rows: usize) -> Result<(), Error> {
        if rows > self.max_rows {
            return Err(Error::BudgetExceeded {
                rows,
                max_rows: self.max_rows,
            });
        }
        Ok(())
    }
}

/// The base table and its alias.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRef {
    /// Table name.
    pub table: String,
    /// Alias used to qualify its columns.
    pub alias: String,
}

/// One equality term of a planned join.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JoinPredicate {
    /// `left = right`, where `right` belongs to the joined alias.
    Columns { left: ColumnRef, right: ColumnRef },
    /// `column = value`, where `column` belongs to the joined alias.
    Value { column: ColumnRef, value: Value },
}

/// Attribute metadata carried by an attribute join.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedAttribute {
    /// Attribute code, also the output field name.
    pub code: String,
    /// Whether an entity without a value is an error.
    pub required: bool,
}

/// A join with all columns resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedJoin {
    /// Alias of the joined table.
    pub alias: String,
    /// Joined table name.
    pub table: String,
    /// Join kind as emitted to the back end.
    pub kind: JoinKind,
    /// ON terms, combined with AND.
    pub on: Vec<JoinPredicate>,
    /// Present for attribute joins.
    pub attribute: Option<PlannedAttribute>,
}

/// What a projected column means to hydration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ColumnRole {
    /// The base identity.
    Identity,
    /// A plain entity field.
    Field,
    /// The value of an attribute join.
    Attribute { code: String },
    /// Non-null exactly when the join matched a row.
    MatchMarker { join: String },
}

/// One item of the select list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Projection {
    /// Every column of an alias, under its own name.
    AllColumns { alias: String },
    /// A single column under an output name.
    Column {
        output: String,
        source: ColumnRef,
        role: ColumnRole,
    },
}

impl Projection {
    /// Output name of a single-column projection.
    pub fn output(&self) -> Option<&str> {
        match self {
            Projection::AllColumns { .. } => None,
            Projection::Column { output, .. } => Some(output),
        }
    }
}

/// Attribute slot as seen by hydration: where its value and marker arrive.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeSlot<'a> {
    /// Attribute code.
    pub code: &'a str,
    /// Output carrying the attribute value.
    pub value_output: &'a str,
    /// Output carrying the match marker.
    pub marker_output: &'a str,
    /// Whether a missing value is an error.
    pub required: bool,
}

/// An executable query plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryPlan {
    /// Base table.
    pub from: TableRef,
    /// Base identity column.
    pub identity: ColumnRef,
    /// Joins in declaration order.
    pub joins: Vec<PlannedJoin>,
    /// Predicate over qualified column names.
    pub predicate: Option<FilterExpr>,
    /// Sort over qualified column names. Contains the identity, followed by
    /// the join outputs so rows of one entity arrive in a fixed order.
    pub order_by: SortSpec,
    /// Maximum entities to return.
    ///
    /// The window counts distinct identities, ranked by their first row in
    /// sort order; every joined row of a windowed entity is returned.
    pub limit: Option<u64>,
    /// Entities to skip.
    pub offset: Option<u64>,
    /// Select list. Empty for count plans.
    pub projection: Vec<Projection>,
}

impl QueryPlan {
    /// Derive the plan counting distinct identities under the same joins
    /// and predicate.
    pub fn for_count(&self) -> QueryPlan {
        QueryPlan {
            from: self.from.clone(),
            identity: self.identity.clone(),
            joins: self.joins.clone(),
            predicate: self.predicate.clone(),
            order_by: SortSpec::new(),
            limit: None,
            offset: None,
            projection: Vec::new(),
        }
    }

    /// Derive the plan selecting every matching identity, unpaginated.
    pub fn for_identities(&self) -> QueryPlan {
        QueryPlan {
            from: self.from.clone(),
            identity: self.identity.clone(),
            joins: self.joins.clone(),
            predicate: self.predicate.clone(),
            order_by: self.order_by.clone(),
            limit: None,
            offset: None,
            projection: vec![Projection::Column {
                output: IDENTITY_OUTPUT.to_string(),
                source: self.identity.clone(),
                role: ColumnRole::Identity,
            }],
        }
    }

    /// Check if the plan restricts the entity window.
    pub fn is_paginated(&self) -> bool {
        self.limit.is_some() || self.offset.is_some()
    }

    /// Check if this plan only counts.
    pub fn is_count(&self) -> bool {
        self.projection.is_empty()
    }

    /// Attribute joins in declaration order, with their output names.
    pub fn attribute_slots(&self) -> Vec<AttributeSlot<'_>> {
        let mut slots = Vec::new();
        for projection in &self.projection {
            if let Projection::Column {
                output,
                role: ColumnRole::Attribute { code },
                source,
            } = projection
            {
                let marker = self.projection.iter().find_map(|p| match p {
                    Projection::Column {
                        output,
                        role: ColumnRole::MatchMarker { join },
                        ..
                    } if *join == source.table => Some(output.as_str()),
                    _ => None,
                });
                let required = self
                    .joins
                    .iter()
                    .find(|j| j.alias == source.table)
                    .and_then(|j| j.attribute.as_ref())
                    .map(|a| a.required)
                    .unwrap_or(false);
                if let Some(marker_output) = marker {
                    slots.push(AttributeSlot {
                        code,
                        value_output: output,
                        marker_output,
                        required,
                    });
                }
            }
        }
        slots
    }

    /// Explicit single-column outputs, in order.
    pub fn column_outputs(&self) -> impl Iterator<Item = &str> {
        self.projection.iter().filter_map(Projection::output)
    }
}
