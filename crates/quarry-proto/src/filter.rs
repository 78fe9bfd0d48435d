//! Filter expressions for collections.
//!
//! A `FilterExpr` is either a leaf condition (field, operator, value) or a
//! composite of child expressions joined by AND/OR. Both shapes are only
//! reachable through validating constructors, so a node can never carry a
//! half-leaf, half-composite state.

use serde::Serialize;

use crate::error::Error;
use crate::value::Value;

/// Comparison operator of a leaf condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    /// Field equals value.
    Eq,
    /// Field not equals value.
    Neq,
    /// Field greater than value.
    Gt,
    /// Field greater than or equal to value.
    Gte,
    /// Field less than value.
    Lt,
    /// Field less than or equal to value.
    Lte,
    /// Field matches a LIKE pattern.
    Like,
    /// Field does not match a LIKE pattern.
    NotLike,
    /// Field is in a set of values.
    In,
    /// Field is not in a set of values.
    NotIn,
    /// Field is null.
    IsNull,
    /// Field is not null.
    NotNull,
    /// Field lies within an inclusive range.
    Between,
}

impl FilterOp {
    /// All operators, in declaration order.
    pub const ALL: [FilterOp; 13] = [
        FilterOp::Eq,
        FilterOp::Neq,
        FilterOp::Gt,
        FilterOp::Gte,
        FilterOp::Lt,
        FilterOp::Lte,
        FilterOp::Like,
        FilterOp::NotLike,
        FilterOp::In,
        FilterOp::NotIn,
        FilterOp::IsNull,
        FilterOp::NotNull,
        FilterOp::Between,
    ];

    /// The operator code (`"eq"`, `"notlike"`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Neq => "neq",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::Like => "like",
            FilterOp::NotLike => "notlike",
            FilterOp::In => "in",
            FilterOp::NotIn => "notin",
            FilterOp::IsNull => "isnull",
            FilterOp::NotNull => "notnull",
            FilterOp::Between => "between",
        }
    }

    /// SQL-style symbol used when rendering expressions.
    pub fn symbol(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Neq => "<>",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
            FilterOp::Like => "LIKE",
            FilterOp::NotLike => "NOT LIKE",
            FilterOp::In => "IN",
            FilterOp::NotIn => "NOT IN",
            FilterOp::IsNull => "IS NULL",
            FilterOp::NotNull => "IS NOT NULL",
            FilterOp::Between => "BETWEEN",
        }
    }
}

impl std::fmt::Display for FilterOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FilterOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FilterOp::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| Error::invalid_filter("", s, "unknown operator"))
    }
}

/// Operand of a leaf condition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FilterValue {
    /// No operand (`isnull` / `notnull`).
    None,
    /// A single scalar.
    Scalar(Value),
    /// A list of scalars (`in` / `notin`).
    List(Vec<Value>),
    /// Inclusive lower and upper bound (`between`).
    Range(Value, Value),
}

impl From<Value> for FilterValue {
    fn from(value: Value) -> Self {
        FilterValue::Scalar(value)
    }
}

impl From<Vec<Value>> for FilterValue {
    fn from(values: Vec<Value>) -> Self {
        FilterValue::List(values)
    }
}

/// A validated leaf condition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Condition {
    field: String,
    operator: FilterOp,
    value: FilterValue,
}

impl Condition {
    /// Field the condition applies to, qualified or not.
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Comparison operator.
    pub fn operator(&self) -> FilterOp {
        self.operator
    }

    /// Operand.
    pub fn value(&self) -> &FilterValue {
        &self.value
    }
}

/// How the children of a composite are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Combinator {
    /// All children must match.
    And,
    /// At least one child must match.
    Or,
}

impl std::fmt::Display for Combinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Combinator::And => f.write_str("AND"),
            Combinator::Or => f.write_str("OR"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
enum Node {
    Leaf(Condition),
    Composite {
        combinator: Combinator,
        children: Vec<FilterExpr>,
    },
}

/// A borrowed view of a filter node, for consumers that walk the tree.
#[derive(Debug, Clone, Copy)]
pub enum FilterNode<'a> {
    /// A leaf condition.
    Leaf(&'a Condition),
    /// A composite with its combinator and ordered children.
    Composite(Combinator, &'a [FilterExpr]),
}

/// An immutable filter expression tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FilterExpr {
    node: Node,
}

impl FilterExpr {
    /// Build a leaf condition, validating that the operand fits the operator.
    pub fn leaf(
        field: impl Into<String>,
        operator: FilterOp,
        value: impl Into<FilterValue>,
    ) -> Result<Self, Error> {
        let field = field.into();
        let value = value.into();
        validate_leaf(&field, operator, &value)?;
        Ok(Self {
            node: Node::Leaf(Condition {
                field,
                operator,
                value,
            }),
        })
    }

    /// Combine children with AND. Fails when `children` is empty.
    pub fn and(children: Vec<FilterExpr>) -> Result<Self, Error> {
        Self::composite(Combinator::And, children)
    }

    /// Combine children with OR. Fails when `children` is empty.
    pub fn or(children: Vec<FilterExpr>) -> Result<Self, Error> {
        Self::composite(Combinator::Or, children)
    }

    /// Combine children with the given combinator.
    pub fn composite(combinator: Combinator, children: Vec<FilterExpr>) -> Result<Self, Error> {
        if children.is_empty() {
            return Err(Error::invalid_filter(
                "",
                combinator,
                "composite filter needs at least one child",
            ));
        }
        Ok(Self {
            node: Node::Composite {
                combinator,
                children,
            },
        })
    }

    /// Create an equality filter.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Result<Self, Error> {
        Self::leaf(field, FilterOp::Eq, FilterValue::Scalar(value.into()))
    }

    /// Create a not-equal filter.
    pub fn neq(field: impl Into<String>, value: impl Into<Value>) -> Result<Self, Error> {
        Self::leaf(field, FilterOp::Neq, FilterValue::Scalar(value.into()))
    }

    /// Create a greater-than filter.
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Result<Self, Error> {
        Self::leaf(field, FilterOp::Gt, FilterValue::Scalar(value.into()))
    }

    /// Create a greater-than-or-equal filter.
    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Result<Self, Error> {
        Self::leaf(field, FilterOp::Gte, FilterValue::Scalar(value.into()))
    }

    /// Create a less-than filter.
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Result<Self, Error> {
        Self::leaf(field, FilterOp::Lt, FilterValue::Scalar(value.into()))
    }

    /// Create a less-than-or-equal filter.
    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Result<Self, Error> {
        Self::leaf(field, FilterOp::Lte, FilterValue::Scalar(value.into()))
    }

    /// Create a LIKE filter.
    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Result<Self, Error> {
        Self::leaf(field, FilterOp::Like, Value::String(pattern.into()))
    }

    /// Create a NOT LIKE filter.
    pub fn not_like(field: impl Into<String>, pattern: impl Into<String>) -> Result<Self, Error> {
        Self::leaf(field, FilterOp::NotLike, Value::String(pattern.into()))
    }

    /// Create an IN filter.
    pub fn in_values<V: Into<Value>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Result<Self, Error> {
        let values = values.into_iter().map(Into::into).collect::<Vec<_>>();
        Self::leaf(field, FilterOp::In, FilterValue::List(values))
    }

    /// Create a NOT IN filter.
    pub fn not_in<V: Into<Value>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Result<Self, Error> {
        let values = values.into_iter().map(Into::into).collect::<Vec<_>>();
        Self::leaf(field, FilterOp::NotIn, FilterValue::List(values))
    }

    /// Create a BETWEEN filter (inclusive on both ends).
    pub fn between(
        field: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Result<Self, Error> {
        Self::leaf(
            field,
            FilterOp::Between,
            FilterValue::Range(low.into(), high.into()),
        )
    }

    /// Create an IS NULL filter.
    pub fn is_null(field: impl Into<String>) -> Result<Self, Error> {
        Self::leaf(field, FilterOp::IsNull, FilterValue::None)
    }

    /// Create an IS NOT NULL filter.
    pub fn not_null(field: impl Into<String>) -> Result<Self, Error> {
        Self::leaf(field, FilterOp::NotNull, FilterValue::None)
    }

    /// Borrowed view of this node.
    pub fn node(&self) -> FilterNode<'_> {
        match &self.node {
            Node::Leaf(condition) => FilterNode::Leaf(condition),
            Node::Composite {
                combinator,
                children,
            } => FilterNode::Composite(*combinator, children),
        }
    }

    /// The leaf condition, if this node is a leaf.
    pub fn as_leaf(&self) -> Option<&Condition> {
        match &self.node {
            Node::Leaf(condition) => Some(condition),
            Node::Composite { .. } => None,
        }
    }

    /// Check if this node is a leaf.
    pub fn is_leaf(&self) -> bool {
        matches!(self.node, Node::Leaf(_))
    }

    /// AND `other` into this expression, flattening an existing AND root.
    pub fn and_with(self, other: FilterExpr) -> FilterExpr {
        let children = match self.node {
            Node::Composite {
                combinator: Combinator::And,
                mut children,
            } => {
                children.push(other);
                children
            }
            node => vec![FilterExpr { node }, other],
        };
        FilterExpr {
            node: Node::Composite {
                combinator: Combinator::And,
                children,
            },
        }
    }

    /// Every field name referenced by the tree, in first-seen order.
    pub fn fields(&self) -> Vec<&str> {
        let mut fields = Vec::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields<'a>(&'a self, fields: &mut Vec<&'a str>) {
        match &self.node {
            Node::Leaf(condition) => {
                if !fields.contains(&condition.field.as_str()) {
                    fields.push(&condition.field);
                }
            }
            Node::Composite { children, .. } => {
                for child in children {
                    child.collect_fields(fields);
                }
            }
        }
    }

    /// Rebuild the tree with every field name passed through `rename`.
    ///
    /// Operators and operands are kept as they are, so the validity of each
    /// leaf carries over.
    pub fn map_fields<E, F>(&self, rename: &mut F) -> Result<FilterExpr, E>
    where
        F: FnMut(&str) -> Result<String, E>,
    {
        let node = match &self.node {
            Node::Leaf(condition) => Node::Leaf(Condition {
                field: rename(&condition.field)?,
                operator: condition.operator,
                value: condition.value.clone(),
            }),
            Node::Composite {
                combinator,
                children,
            } => Node::Composite {
                combinator: *combinator,
                children: children
                    .iter()
                    .map(|child| child.map_fields(rename))
                    .collect::<Result<Vec<_>, E>>()?,
            },
        };
        Ok(FilterExpr { node })
    }
}

impl std::fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.node {
            Node::Leaf(c) => match &c.value {
                FilterValue::None => write!(f, "{} {}", c.field, c.operator.symbol()),
                FilterValue::Scalar(v) => write!(f, "{} {} {}", c.field, c.operator.symbol(), v),
                FilterValue::List(values) => {
                    write!(f, "{} {} (", c.field, c.operator.symbol())?;
                    for (i, v) in values.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", v)?;
                    }
                    write!(f, ")")
                }
                FilterValue::Range(low, high) => {
                    write!(f, "{} BETWEEN {} AND {}", c.field, low, high)
                }
            },
            Node::Composite {
                combinator,
                children,
            } => {
                write!(f, "(")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, " {} ", combinator)?;
                    }
                    write!(f, "{}", child)?;
                }
                write!(f, ")")
            }
        }
    }
}

fn is_nan(value: &Value) -> bool {
    match value {
        Value::Float32(x) => x.is_nan(),
        Value::Float64(x) => x.is_nan(),
        _ => false,
    }
}

fn validate_leaf(field: &str, operator: FilterOp, value: &FilterValue) -> Result<(), Error> {
    let fail = |reason: &str| Err(Error::invalid_filter(field, operator, reason));

    if field.is_empty() {
        return fail("field name is empty");
    }
    let has_nan = match value {
        FilterValue::None => false,
        FilterValue::Scalar(v) => is_nan(v),
        FilterValue::List(values) => values.iter().any(is_nan),
        FilterValue::Range(low, high) => is_nan(low) || is_nan(high),
    };
    if has_nan {
        return fail("NaN operand is not comparable");
    }

    match operator {
        FilterOp::Eq | FilterOp::Neq | FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte => {
            match value {
                FilterValue::Scalar(Value::Null) => {
                    fail("null operand never matches; use isnull/notnull")
                }
                FilterValue::Scalar(_) => Ok(()),
                _ => fail("expected a single scalar value"),
            }
        }
        FilterOp::Like | FilterOp::NotLike => match value {
            FilterValue::Scalar(Value::String(_)) => Ok(()),
            _ => fail("expected a string pattern"),
        },
        FilterOp::In | FilterOp::NotIn => match value {
            FilterValue::List(values) if values.is_empty() => fail("value list is empty"),
            FilterValue::List(values) if values.iter().any(Value::is_null) => {
                fail("value list contains null")
            }
            FilterValue::List(_) => Ok(()),
            _ => fail("expected a list of values"),
        },
        FilterOp::IsNull | FilterOp::NotNull => match value {
            FilterValue::None => Ok(()),
            _ => fail("operator takes no value"),
        },
        FilterOp::Between => match value {
            FilterValue::Range(low, high) if low.is_null() || high.is_null() => {
                fail("range bounds must not be null")
            }
            FilterValue::Range(_, _) => Ok(()),
            _ => fail("expected exactly two bounds"),
        },
    }
}
