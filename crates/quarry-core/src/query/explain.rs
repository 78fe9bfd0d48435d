//! Human- and machine-readable plan summaries.

use serde::Serialize;

use crate::error::Error;

use super::plan::{is_hidden_output, JoinPredicate, Projection, QueryPlan};

/// Summary of one planned join.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinSummary {
    /// Join alias.
    pub alias: String,
    /// Joined table.
    pub table: String,
    /// Emitted join kind.
    pub kind: String,
    /// ON terms, rendered.
    pub on: Vec<String>,
    /// Attribute code for attribute joins.
    pub attribute: Option<String>,
    /// Whether a missing attribute fails hydration.
    pub required: bool,
}

/// Summary of a query plan, without executing it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanSummary {
    /// Base table.
    pub table: String,
    /// Base alias.
    pub alias: String,
    /// Qualified identity column.
    pub identity: String,
    /// Visible output columns (`*` for every base column).
    pub fields: Vec<String>,
    /// Joins in order.
    pub joins: Vec<JoinSummary>,
    /// Rendered predicate.
    pub filter: Option<String>,
    /// Rendered sort keys.
    pub order_by: Vec<String>,
    /// Page size.
    pub limit: Option<u64>,
    /// Row offset.
    pub offset: Option<u64>,
    /// Multi-line explanation.
    pub explanation: String,
}

impl PlanSummary {
    /// Summarize a plan.
    pub fn from_plan(plan: &QueryPlan) -> Self {
        let fields = plan
            .projection
            .iter()
            .filter_map(|p| match p {
                Projection::AllColumns { alias } => Some(format!("{}.*", alias)),
                Projection::Column { output, .. } if is_hidden_output(output) => None,
                Projection::Column { output, source, .. } => {
                    Some(format!("{} AS {}", source, output))
                }
            })
            .collect();

        let joins = plan
            .joins
            .iter()
            .map(|join| JoinSummary {
                alias: join.alias.clone(),
                table: join.table.clone(),
                kind: join.kind.to_string(),
                on: join
                    .on
                    .iter()
                    .map(|predicate| match predicate {
                        JoinPredicate::Columns { left, right } => format!("{} = {}", right, left),
                        JoinPredicate::Value { column, value } => format!("{} = {}", column, value),
                    })
                    .collect(),
                attribute: join.attribute.as_ref().map(|a| a.code.clone()),
                required: join.attribute.as_ref().map(|a| a.required).unwrap_or(false),
            })
            .collect();

        let mut summary = Self {
            table: plan.from.table.clone(),
            alias: plan.from.alias.clone(),
            identity: plan.identity.qualified(),
            fields,
            joins,
            filter: plan.predicate.as_ref().map(ToString::to_string),
            order_by: plan
                .order_by
                .iter()
                .map(|k| format!("{} {}", k.field, k.direction))
                .collect(),
            limit: plan.limit,
            offset: plan.offset,
            explanation: String::new(),
        };
        summary.explanation = summary.generate_explanation();
        summary
    }

    /// Render the summary as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    fn generate_explanation(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Query Plan for {} AS {}", self.table, self.alias));
        lines.push("=".repeat(40));
        lines.push(format!("Identity: {}", self.identity));
        lines.push(format!("Fields: {}", self.fields.join(", ")));

        for join in &self.joins {
            let mut line = format!(
                "{} JOIN {} AS {} ON {}",
                join.kind,
                join.table,
                join.alias,
                join.on.join(" AND ")
            );
            if let Some(code) = &join.attribute {
                let mode = if join.required { "required" } else { "optional" };
                line.push_str(&format!(" [attribute {}, {}]", code, mode));
            }
            lines.push(line);
        }

        if let Some(filter) = &self.filter {
            lines.push(format!("Filter: {}", filter));
        }

        lines.push(format!("Order By: {}", self.order_by.join(", ")));

        let mut window = Vec::new();
        if let Some(limit) = self.limit {
            window.push(format!("LIMIT {}", limit));
        }
        if let Some(offset) = self.offset.filter(|o| *o > 0) {
            window.push(format!("OFFSET {}", offset));
        }
        if !window.is_empty() {
            lines.push(format!("Pagination: {}", window.join(" ")));
        }

        lines.join("\n")
    }
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.explanation)
    }
}
