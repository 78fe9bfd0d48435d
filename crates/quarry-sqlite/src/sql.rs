//! Plan to SQL compilation.
//!
//! Every identifier is double-quoted and every value is bound as a `?`
//! parameter, so table data never reaches the SQL text.
//!
//! Filter operators map onto SQLite as follows:
//! - `like` / `notlike` use `GLOB` on text values, which is case-sensitive
//!   like the in-process evaluator; non-text values never match
//! - `between` is inclusive on both ends
//! - `neq` and `notin` follow SQL NULL semantics: a NULL column never matches

use std::fmt::Write as _;

use quarry_core::query::{JoinPredicate, Projection, QueryPlan, IDENTITY_OUTPUT};
use quarry_proto::{
    split_qualified, Combinator, Condition, FilterExpr, FilterNode, FilterOp, FilterValue,
    JoinKind, SortDirection, Value,
};
use rusqlite::types::{Value as SqlValue, ValueRef};

use crate::error::Error;

/// A compiled statement and its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    /// SQL text with `?` placeholders.
    pub sql: String,
    /// Parameters in placeholder order.
    pub params: Vec<SqlValue>,
}

/// Name of the CTE holding the identities of a paged plan.
const PAGE_CTE: &str = "__page";

/// Rank column inside the page CTE.
const RANK_COLUMN: &str = "__rank";

/// Compile a row-returning plan.
///
/// A paged plan first selects the window of distinct identities, ranked by
/// their first row in sort order, then returns every joined row of those
/// identities.
pub fn compile_query(plan: &QueryPlan) -> Result<CompiledQuery, Error> {
    if plan.projection.is_empty() {
        return Err(Error::InvalidPlan("empty select list".to_string()));
    }

    let mut writer = SqlWriter::default();
    if plan.is_paginated() {
        writer.page_cte(plan)?;
    }

    writer.push("SELECT ");
    for (i, item) in plan.projection.iter().enumerate() {
        if i > 0 {
            writer.push(", ");
        }
        match item {
            Projection::AllColumns { alias } => {
                writer.ident(alias);
                writer.push(".*");
            }
            Projection::Column { output, source, .. } => {
                writer.column(&source.table, &source.column);
                writer.push(" AS ");
                writer.ident(output);
            }
        }
    }

    writer.from_clause(plan)?;
    if plan.is_paginated() {
        writer.push(if plan.predicate.is_some() { " AND " } else { " WHERE " });
        writer.column(&plan.identity.table, &plan.identity.column);
        writer.push(" IN (SELECT ");
        writer.ident(IDENTITY_OUTPUT);
        writer.push(" FROM ");
        writer.ident(PAGE_CTE);
        writer.push(")");
    }

    if !plan.order_by.is_empty() {
        writer.push(" ");
        writer.order_by(plan);
    }
    Ok(writer.finish())
}

/// Compile the count of distinct base identities under a plan's joins and
/// predicate. Ordering, pagination and projection are ignored.
pub fn compile_count(plan: &QueryPlan) -> Result<CompiledQuery, Error> {
    let mut writer = SqlWriter::default();
    writer.push("SELECT COUNT(DISTINCT ");
    writer.column(&plan.identity.table, &plan.identity.column);
    writer.push(")");
    writer.from_clause(plan)?;
    Ok(writer.finish())
}

/// Quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Translate a LIKE pattern (`%`, `_`, `\` escape) into a GLOB pattern.
///
/// Returns `None` for a pattern ending in a lone `\`, which matches nothing.
pub fn like_to_glob(pattern: &str) -> Option<String> {
    let mut glob = String::with_capacity(pattern.len() + 4);
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => glob.push('*'),
            '_' => glob.push('?'),
            '\\' => push_glob_literal(&mut glob, chars.next()?),
            other => push_glob_literal(&mut glob, other),
        }
    }
    Some(glob)
}

fn push_glob_literal(glob: &mut String, c: char) {
    match c {
        '*' => glob.push_str("[*]"),
        '?' => glob.push_str("[?]"),
        '[' => glob.push_str("[[]"),
        other => glob.push(other),
    }
}

/// Convert a value for binding. Booleans are stored as 0/1.
pub fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int32(i) => SqlValue::Integer(i64::from(*i)),
        Value::Int64(i) => SqlValue::Integer(*i),
        Value::Float32(f) => SqlValue::Real(f64::from(*f)),
        Value::Float64(f) => SqlValue::Real(*f),
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Bytes(b) => SqlValue::Blob(b.clone()),
    }
}

/// Convert a result cell by its storage class.
pub fn from_sql_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int64(i),
        ValueRef::Real(f) => Value::Float64(f),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Bytes(bytes.to_vec()),
    }
}

#[derive(Default)]
struct SqlWriter {
    sql: String,
    params: Vec<SqlValue>,
}

impl SqlWriter {
    fn finish(self) -> CompiledQuery {
        CompiledQuery {
            sql: self.sql,
            params: self.params,
        }
    }

    fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    fn ident(&mut self, name: &str) {
        self.sql.push_str(&quote_ident(name));
    }

    fn column(&mut self, alias: &str, column: &str) {
        self.ident(alias);
        self.sql.push('.');
        self.ident(column);
    }

    /// A plan field name, `alias.column` or bare.
    fn field(&mut self, name: &str) {
        match split_qualified(name) {
            (Some(alias), column) => self.column(alias, column),
            (None, column) => self.ident(column),
        }
    }

    /// `ORDER BY` terms of a plan.
    fn order_by(&mut self, plan: &QueryPlan) {
        self.push("ORDER BY ");
        for (i, key) in plan.order_by.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.field(&key.field);
            self.push(match key.direction {
                SortDirection::Asc => " ASC",
                SortDirection::Desc => " DESC",
            });
        }
    }

    /// `WITH "__page" AS (...) ` selecting the identity window.
    fn page_cte(&mut self, plan: &QueryPlan) -> Result<(), Error> {
        self.push("WITH ");
        self.ident(PAGE_CTE);
        self.push(" AS (SELECT ");
        self.ident(IDENTITY_OUTPUT);
        self.push(" FROM (SELECT ");
        self.column(&plan.identity.table, &plan.identity.column);
        self.push(" AS ");
        self.ident(IDENTITY_OUTPUT);
        self.push(", ROW_NUMBER() OVER (");
        if !plan.order_by.is_empty() {
            self.order_by(plan);
        }
        self.push(") AS ");
        self.ident(RANK_COLUMN);
        self.from_clause(plan)?;
        self.push(") WHERE ");
        self.ident(IDENTITY_OUTPUT);
        self.push(" IS NOT NULL GROUP BY ");
        self.ident(IDENTITY_OUTPUT);
        self.push(" ORDER BY MIN(");
        self.ident(RANK_COLUMN);
        self.push(")");
        match (plan.limit, plan.offset) {
            (Some(limit), Some(offset)) => {
                let _ = write!(self.sql, " LIMIT {} OFFSET {}", limit, offset);
            }
            (Some(limit), None) => {
                let _ = write!(self.sql, " LIMIT {}", limit);
            }
            (None, Some(offset)) => {
                let _ = write!(self.sql, " LIMIT -1 OFFSET {}", offset);
            }
            (None, None) => {}
        }
        self.push(") ");
        Ok(())
    }

    fn bind(&mut self, value: &Value) {
        self.sql.push('?');
        self.params.push(to_sql_value(value));
    }

    /// FROM, joins and WHERE.
    fn from_clause(&mut self, plan: &QueryPlan) -> Result<(), Error> {
        self.push(" FROM ");
        self.ident(&plan.from.table);
        self.push(" AS ");
        self.ident(&plan.from.alias);

        for join in &plan.joins {
            if join.on.is_empty() {
                return Err(Error::InvalidPlan(format!(
                    "join '{}' has no ON terms",
                    join.alias
                )));
            }
            self.push(match join.kind {
                JoinKind::Inner => " INNER JOIN ",
                JoinKind::Left => " LEFT JOIN ",
            });
            self.ident(&join.table);
            self.push(" AS ");
            self.ident(&join.alias);
            self.push(" ON ");
            for (i, predicate) in join.on.iter().enumerate() {
                if i > 0 {
                    self.push(" AND ");
                }
                match predicate {
                    JoinPredicate::Columns { left, right } => {
                        self.column(&left.table, &left.column);
                        self.push(" = ");
                        self.column(&right.table, &right.column);
                    }
                    JoinPredicate::Value { column, value } => {
                        self.column(&column.table, &column.column);
                        self.push(" = ");
                        self.bind(value);
                    }
                }
            }
        }

        if let Some(predicate) = &plan.predicate {
            self.push(" WHERE ");
            self.filter(predicate)?;
        }
        Ok(())
    }

    fn filter(&mut self, expr: &FilterExpr) -> Result<(), Error> {
        match expr.node() {
            FilterNode::Leaf(condition) => self.condition(condition),
            FilterNode::Composite(combinator, children) => {
                let joiner = match combinator {
                    Combinator::And => " AND ",
                    Combinator::Or => " OR ",
                };
                self.push("(");
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        self.push(joiner);
                    }
                    self.filter(child)?;
                }
                self.push(")");
                Ok(())
            }
        }
    }

    fn condition(&mut self, condition: &Condition) -> Result<(), Error> {
        let field = condition.field();
        match (condition.operator(), condition.value()) {
            (FilterOp::IsNull, _) => {
                self.field(field);
                self.push(" IS NULL");
            }
            (FilterOp::NotNull, _) => {
                self.field(field);
                self.push(" IS NOT NULL");
            }
            (
                op @ (FilterOp::Eq
                | FilterOp::Neq
                | FilterOp::Gt
                | FilterOp::Gte
                | FilterOp::Lt
                | FilterOp::Lte),
                FilterValue::Scalar(value),
            ) => {
                self.field(field);
                self.push(" ");
                self.push(op.symbol());
                self.push(" ");
                self.bind(value);
            }
            (FilterOp::Like, FilterValue::Scalar(Value::String(pattern))) => {
                match like_to_glob(pattern) {
                    Some(glob) => {
                        self.text_guard(field);
                        self.push(" AND ");
                        self.field(field);
                        self.push(" GLOB ");
                        self.bind(&Value::String(glob));
                        self.push(")");
                    }
                    None => self.push("0"),
                }
            }
            (FilterOp::NotLike, FilterValue::Scalar(Value::String(pattern))) => {
                self.text_guard(field);
                if let Some(glob) = like_to_glob(pattern) {
                    self.push(" AND NOT (");
                    self.field(field);
                    self.push(" GLOB ");
                    self.bind(&Value::String(glob));
                    self.push(")");
                }
                self.push(")");
            }
            (op @ (FilterOp::In | FilterOp::NotIn), FilterValue::List(values)) => {
                self.field(field);
                self.push(" ");
                self.push(op.symbol());
                self.push(" (");
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.bind(value);
                }
                self.push(")");
            }
            (FilterOp::Between, FilterValue::Range(low, high)) => {
                self.push("(");
                self.field(field);
                self.push(" >= ");
                self.bind(low);
                self.push(" AND ");
                self.field(field);
                self.push(" <= ");
                self.bind(high);
                self.push(")");
            }
            (op, _) => {
                return Err(Error::InvalidPlan(format!(
                    "operand does not fit operator '{}' on '{}'",
                    op, field
                )))
            }
        }
        Ok(())
    }

    /// Opens `(typeof(field) = 'text'`; the caller closes the parenthesis.
    fn text_guard(&mut self, field: &str) {
        self.push("(typeof(");
        self.field(field);
        self.push(") = 'text'");
    }
}
