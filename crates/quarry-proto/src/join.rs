//! Join specifications, including attribute (EAV) joins.

use serde::Serialize;

use crate::error::Error;
use crate::row::split_qualified;
use crate::value::Value;

/// Join kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JoinKind {
    /// Rows without a match are dropped (for attribute joins: the attribute is required).
    Inner,
    /// Rows without a match are kept with NULL join columns.
    Left,
}

impl std::fmt::Display for JoinKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JoinKind::Inner => f.write_str("INNER"),
            JoinKind::Left => f.write_str("LEFT"),
        }
    }
}

/// One equality term of a join's ON clause.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JoinCondition {
    /// `left` equals the joined table's `right` column.
    ///
    /// `left` may be qualified with the base alias or an earlier join alias;
    /// an unqualified name refers to the base table.
    Columns { left: String, right: String },
    /// The joined table's `column` equals a fixed value.
    Value { column: String, value: Value },
}

/// The side-table layout of an attribute join.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeJoin {
    /// Semantic attribute name; also the output field name.
    pub code: String,
    /// Attribute identifier stored in `attribute_column`.
    pub attribute_id: Value,
    /// Side-table column holding the owning entity's identity.
    pub entity_column: String,
    /// Side-table column holding the attribute identifier.
    pub attribute_column: String,
    /// Side-table column holding the attribute value.
    pub value_column: String,
}

/// Declarative description of a secondary table join.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinSpec {
    /// Alias of the joined table, unique within a collection.
    pub alias: String,
    /// Joined table name.
    pub table: String,
    /// Join kind.
    pub kind: JoinKind,
    /// ON clause terms, combined with AND.
    pub conditions: Vec<JoinCondition>,
    /// Projected columns: output name to joined-table column.
    pub columns: Vec<(String, String)>,
    /// Present for attribute joins.
    pub attribute: Option<AttributeJoin>,
}

impl JoinSpec {
    /// Create an inner join.
    pub fn inner(alias: impl Into<String>, table: impl Into<String>) -> Self {
        Self::new(alias, table, JoinKind::Inner)
    }

    /// Create a left join.
    pub fn left(alias: impl Into<String>, table: impl Into<String>) -> Self {
        Self::new(alias, table, JoinKind::Left)
    }

    /// Create a join of the given kind.
    pub fn new(alias: impl Into<String>, table: impl Into<String>, kind: JoinKind) -> Self {
        Self {
            alias: alias.into(),
            table: table.into(),
            kind,
            conditions: Vec::new(),
            columns: Vec::new(),
            attribute: None,
        }
    }

    /// Create an attribute join reading `code` from a key/value side table.
    ///
    /// Defaults to the `entity_id` / `attribute_id` / `value` layout, the
    /// alias `at_<code>` and LEFT kind (attribute optional).
    pub fn attribute(
        code: impl Into<String>,
        table: impl Into<String>,
        attribute_id: impl Into<Value>,
    ) -> Self {
        let code = code.into();
        Self {
            alias: format!("at_{}", code),
            table: table.into(),
            kind: JoinKind::Left,
            conditions: Vec::new(),
            columns: vec![(code.clone(), "value".to_string())],
            attribute: Some(AttributeJoin {
                code,
                attribute_id: attribute_id.into(),
                entity_column: "entity_id".to_string(),
                attribute_column: "attribute_id".to_string(),
                value_column: "value".to_string(),
            }),
        }
    }

    /// Add an ON term `left = <alias>.right`.
    pub fn on(mut self, left: impl Into<String>, right: impl Into<String>) -> Self {
        self.conditions.push(JoinCondition::Columns {
            left: left.into(),
            right: right.into(),
        });
        self
    }

    /// Add an ON term `<alias>.column = value`.
    pub fn on_value(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(JoinCondition::Value {
            column: column.into(),
            value: value.into(),
        });
        self
    }

    /// Project a joined column under an output name.
    pub fn select(mut self, output: impl Into<String>, column: impl Into<String>) -> Self {
        self.columns.push((output.into(), column.into()));
        self
    }

    /// Override the alias.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    /// Mark the join as required (INNER kind).
    pub fn required(mut self) -> Self {
        self.kind = JoinKind::Inner;
        self
    }

    /// Override the side-table column layout of an attribute join.
    ///
    /// Has no effect on plain joins.
    pub fn with_attribute_columns(
        mut self,
        entity_column: impl Into<String>,
        attribute_column: impl Into<String>,
        value_column: impl Into<String>,
    ) -> Self {
        if let Some(attribute) = self.attribute.as_mut() {
            attribute.entity_column = entity_column.into();
            attribute.attribute_column = attribute_column.into();
            attribute.value_column = value_column.into();
            self.columns = vec![(attribute.code.clone(), attribute.value_column.clone())];
        }
        self
    }

    /// Check if this is an attribute join.
    pub fn is_attribute(&self) -> bool {
        self.attribute.is_some()
    }

    /// Output names this join adds to the projection.
    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(output, _)| output.as_str())
    }

    /// Validate the shape of the join on its own.
    ///
    /// Alias uniqueness depends on the owning collection and is checked there.
    pub fn validate(&self) -> Result<(), Error> {
        let fail = |reason: &str| {
            Err(Error::InvalidJoin {
                alias: self.alias.clone(),
                reason: reason.to_string(),
            })
        };

        if self.alias.is_empty() || self.alias.contains('.') {
            return fail("alias must be a non-empty name without '.'");
        }
        if self.table.is_empty() {
            return fail("table name is empty");
        }

        for condition in &self.conditions {
            match condition {
                JoinCondition::Columns { left, right } => {
                    if left.is_empty() || right.is_empty() {
                        return fail("join column is empty");
                    }
                    if let (Some(qualifier), _) = split_qualified(right) {
                        if qualifier != self.alias {
                            return fail("right side must be a column of the joined table");
                        }
                    }
                }
                JoinCondition::Value { column, value } => {
                    if column.is_empty() {
                        return fail("join column is empty");
                    }
                    if value.is_null() {
                        return fail("join constant must not be null");
                    }
                }
            }
        }

        let mut seen: Vec<&str> = Vec::with_capacity(self.columns.len());
        for (output, column) in &self.columns {
            if output.is_empty() || column.is_empty() {
                return fail("projected column is empty");
            }
            if seen.contains(&output.as_str()) {
                return fail("duplicate output column");
            }
            seen.push(output);
        }

        match &self.attribute {
            Some(attribute) => {
                if attribute.attribute_id.is_null() {
                    return fail("attribute identifier must not be null");
                }
                if self.columns.len() != 1 || self.columns[0].0 != attribute.code {
                    return fail("attribute join projects exactly its attribute code");
                }
            }
            None => {
                let has_link = self
                    .conditions
                    .iter()
                    .any(|c| matches!(c, JoinCondition::Columns { .. }));
                if !has_link {
                    return fail("join needs at least one column equality");
                }
            }
        }

        Ok(())
    }
}
