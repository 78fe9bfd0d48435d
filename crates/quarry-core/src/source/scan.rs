//! In-process plan evaluation over scanned tables.
//!
//! Sources that can only scan whole tables implement [`TableScan`] and get
//! joins, filtering, ordering, pagination and projection from here. The
//! semantics match what a SQL back end does with the same plan.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use quarry_proto::{JoinKind, Row, SortDirection, SortSpec, Value};
use tracing::trace;

use crate::error::BoxError;
use crate::query::{
    sort_cmp, values_equal, FilterEvaluator, JoinPredicate, PlannedJoin, Projection, QueryPlan,
    ValueKey,
};

/// A source that can return every row of a table.
pub trait TableScan {
    /// Scan a table. Unknown tables are an error.
    fn scan_table(&self, table: &str) -> Result<Vec<Row>, BoxError>;
}

/// Join strategy selection for in-process joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStrategy {
    /// Nested loop join - O(N*M), best for small inputs.
    NestedLoop,
    /// Hash join - O(N+M), best for larger inputs.
    HashJoin,
}

impl JoinStrategy {
    /// Select a strategy from the input sizes.
    ///
    /// Uses hash join when:
    /// - More than 100 left rows, OR
    /// - More than 1000 right rows
    ///
    /// Otherwise uses nested loop for lower overhead on small sets.
    pub fn select(left_count: usize, right_count: u64) -> Self {
        if left_count > 100 || right_count > 1000 {
            JoinStrategy::HashJoin
        } else {
            JoinStrategy::NestedLoop
        }
    }
}

/// Run a plan: join, filter, order, paginate and project.
pub fn run_query<S: TableScan + ?Sized>(
    tables: &S,
    plan: &QueryPlan,
) -> Result<Vec<Row>, BoxError> {
    let mut rows = filtered_rows(tables, plan)?;
    sort_rows(&mut rows, &plan.order_by);
    if plan.is_paginated() {
        rows = entity_window(rows, plan);
    }

    Ok(rows
        .iter()
        .map(|row| project(row, &plan.projection))
        .collect())
}

/// Keep every row of the entities inside the page window.
///
/// Entities are ranked by their first row in sort order. Rows without an
/// identity never enter a window.
fn entity_window(rows: Vec<Row>, plan: &QueryPlan) -> Vec<Row> {
    let identity = plan.identity.qualified();
    let key_of = |row: &Row| {
        row.get(&identity)
            .filter(|v| !v.is_null())
            .map(ValueKey::from_value)
    };

    let offset = plan.offset.map_or(0, |o| o as usize);
    let limit = plan.limit.map_or(usize::MAX, |l| l as usize);
    let mut seen = HashSet::new();
    let page: HashSet<ValueKey> = rows
        .iter()
        .filter_map(key_of)
        .filter(|key| seen.insert(key.clone()))
        .skip(offset)
        .take(limit)
        .collect();

    rows.into_iter()
        .filter(|row| key_of(row).is_some_and(|key| page.contains(&key)))
        .collect()
}

/// Count distinct base identities among the joined, filtered rows.
pub fn run_count<S: TableScan + ?Sized>(tables: &S, plan: &QueryPlan) -> Result<u64, BoxError> {
    let rows = filtered_rows(tables, plan)?;
    let identity = plan.identity.qualified();

    let distinct: HashSet<ValueKey> = rows
        .iter()
        .filter_map(|row| row.get(&identity))
        .filter(|v| !v.is_null())
        .map(ValueKey::from_value)
        .collect();
    Ok(distinct.len() as u64)
}

/// Scan the base table, apply every join, then the predicate.
fn filtered_rows<S: TableScan + ?Sized>(tables: &S, plan: &QueryPlan) -> Result<Vec<Row>, BoxError> {
    let mut rows: Vec<Row> = tables
        .scan_table(&plan.from.table)?
        .into_iter()
        .map(|row| qualify(row, &plan.from.alias))
        .collect();

    for join in &plan.joins {
        let right = tables.scan_table(&join.table)?;
        let strategy = JoinStrategy::select(rows.len(), right.len() as u64);
        trace!(alias = %join.alias, left = rows.len(), right = right.len(), ?strategy, "joining");
        rows = match strategy {
            JoinStrategy::NestedLoop => nested_loop_join(rows, &right, join),
            JoinStrategy::HashJoin => hash_join(rows, &right, join),
        };
    }

    if let Some(predicate) = &plan.predicate {
        rows.retain(|row| FilterEvaluator::evaluate(predicate, row));
    }
    Ok(rows)
}

/// Prefix every column with its table alias.
fn qualify(row: Row, alias: &str) -> Row {
    row.into_columns()
        .into_iter()
        .map(|(name, value)| (format!("{}.{}", alias, name), value))
        .collect::<Vec<_>>()
        .into()
}

/// Check every ON term of `join` for a left row and a raw right row.
fn join_matches(left: &Row, right: &Row, join: &PlannedJoin) -> bool {
    join.on.iter().all(|predicate| match predicate {
        JoinPredicate::Columns { left: l, right: r } => {
            match (left.get(&l.qualified()), right.get(&r.column)) {
                (Some(a), Some(b)) => values_equal(a, b),
                _ => false,
            }
        }
        JoinPredicate::Value { column, value } => right
            .get(&column.column)
            .map(|v| values_equal(v, value))
            .unwrap_or(false),
    })
}

fn combine(left: &Row, right: &Row, alias: &str) -> Row {
    let mut row = Row::with_capacity(left.len() + right.len());
    for (name, value) in left.iter() {
        row.set(name, value.clone());
    }
    for (name, value) in right.iter() {
        row.set(format!("{}.{}", alias, name), value.clone());
    }
    row
}

/// Nested loop join. Right rows keep their scan order per left row.
fn nested_loop_join(rows: Vec<Row>, right: &[Row], join: &PlannedJoin) -> Vec<Row> {
    let mut out = Vec::with_capacity(rows.len());
    for left in rows {
        let mut matched = false;
        for candidate in right {
            if join_matches(&left, candidate, join) {
                out.push(combine(&left, candidate, &join.alias));
                matched = true;
            }
        }
        if !matched && join.kind == JoinKind::Left {
            out.push(left);
        }
    }
    out
}

/// Hash join keyed on the first column equality; remaining terms are
/// checked per candidate. Output order matches [`nested_loop_join`].
fn hash_join(rows: Vec<Row>, right: &[Row], join: &PlannedJoin) -> Vec<Row> {
    let key = join.on.iter().find_map(|predicate| match predicate {
        JoinPredicate::Columns { left, right } => Some((left.qualified(), right.column.as_str())),
        JoinPredicate::Value { .. } => None,
    });
    let Some((left_column, right_column)) = key else {
        return nested_loop_join(rows, right, join);
    };

    // Build phase
    let mut buckets: HashMap<ValueKey, Vec<usize>> = HashMap::new();
    for (index, candidate) in right.iter().enumerate() {
        if let Some(value) = candidate.get(right_column).filter(|v| !v.is_null()) {
            buckets.entry(ValueKey::from_value(value)).or_default().push(index);
        }
    }

    // Probe phase
    let mut out = Vec::with_capacity(rows.len());
    for left in rows {
        let mut matched = false;
        let probe = left
            .get(&left_column)
            .filter(|v| !v.is_null())
            .map(ValueKey::from_value);
        if let Some(indices) = probe.as_ref().and_then(|key| buckets.get(key)) {
            for &index in indices {
                let candidate = &right[index];
                if join_matches(&left, candidate, join) {
                    out.push(combine(&left, candidate, &join.alias));
                    matched = true;
                }
            }
        }
        if !matched && join.kind == JoinKind::Left {
            out.push(left);
        }
    }
    out
}

/// Stable multi-key sort; NULLs first ascending, last descending.
fn sort_rows(rows: &mut [Row], order_by: &SortSpec) {
    if order_by.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for key in order_by {
            let ordering = sort_cmp(a.get(&key.field), b.get(&key.field));
            let ordering = match key.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

/// Build the output row for a projection list.
fn project(row: &Row, projection: &[Projection]) -> Row {
    let mut out = Row::with_capacity(row.len());
    for item in projection {
        match item {
            Projection::AllColumns { alias } => {
                let prefix = format!("{}.", alias);
                for (name, value) in row.iter() {
                    if let Some(column) = name.strip_prefix(&prefix) {
                        out.set(column, value.clone());
                    }
                }
            }
            Projection::Column { output, source, .. } => {
                let value = row.get(&source.qualified()).cloned().unwrap_or(Value::Null);
                out.set(output.clone(), value);
            }
        }
    }
    out
}
