//! Filter evaluation against raw rows.
//!
//! `FilterEvaluator` is the in-process reference for filter semantics; SQL
//! back ends compile the same trees and must agree with it.

use quarry_proto::{Combinator, Condition, FilterExpr, FilterNode, FilterOp, FilterValue, Row, Value};

use super::compare::{compare_values, values_equal};

/// Evaluates filter expressions against rows.
pub struct FilterEvaluator;

impl FilterEvaluator {
    /// Evaluate a filter expression against a row.
    ///
    /// Returns `true` if the row matches the filter, `false` otherwise. A
    /// missing column reads as NULL.
    pub fn evaluate(filter: &FilterExpr, row: &Row) -> bool {
        match filter.node() {
            FilterNode::Leaf(condition) => Self::evaluate_condition(condition, row),
            FilterNode::Composite(Combinator::And, children) => {
                children.iter().all(|child| Self::evaluate(child, row))
            }
            FilterNode::Composite(Combinator::Or, children) => {
                children.iter().any(|child| Self::evaluate(child, row))
            }
        }
    }

    fn evaluate_condition(condition: &Condition, row: &Row) -> bool {
        let field_value = row.get(condition.field()).filter(|v| !v.is_null());

        match condition.operator() {
            FilterOp::IsNull => return field_value.is_none(),
            FilterOp::NotNull => return field_value.is_some(),
            _ => {}
        }

        // Everything else is unknown on NULL, which never matches.
        let Some(fv) = field_value else {
            return false;
        };

        match (condition.operator(), condition.value()) {
            (FilterOp::Eq, FilterValue::Scalar(v)) => values_equal(fv, v),
            (FilterOp::Neq, FilterValue::Scalar(v)) => {
                compare_values(fv, v).map(|ord| ord.is_ne()).unwrap_or(false)
            }
            (FilterOp::Gt, FilterValue::Scalar(v)) => {
                compare_values(fv, v).map(|ord| ord.is_gt()).unwrap_or(false)
            }
            (FilterOp::Gte, FilterValue::Scalar(v)) => {
                compare_values(fv, v).map(|ord| ord.is_ge()).unwrap_or(false)
            }
            (FilterOp::Lt, FilterValue::Scalar(v)) => {
                compare_values(fv, v).map(|ord| ord.is_lt()).unwrap_or(false)
            }
            (FilterOp::Lte, FilterValue::Scalar(v)) => {
                compare_values(fv, v).map(|ord| ord.is_le()).unwrap_or(false)
            }
            (FilterOp::Like, FilterValue::Scalar(Value::String(pattern))) => match fv {
                Value::String(s) => Self::like_match(s, pattern),
                _ => false,
            },
            (FilterOp::NotLike, FilterValue::Scalar(Value::String(pattern))) => match fv {
                Value::String(s) => !Self::like_match(s, pattern),
                _ => false,
            },
            (FilterOp::In, FilterValue::List(values)) => {
                values.iter().any(|v| values_equal(fv, v))
            }
            (FilterOp::NotIn, FilterValue::List(values)) => {
                !values.iter().any(|v| values_equal(fv, v))
            }
            (FilterOp::Between, FilterValue::Range(low, high)) => {
                let above = compare_values(fv, low).map(|ord| ord.is_ge());
                let below = compare_values(fv, high).map(|ord| ord.is_le());
                above == Some(true) && below == Some(true)
            }
            // Shapes are validated at construction; anything else cannot match.
            _ => false,
        }
    }

    /// Match a string against a SQL LIKE pattern, case-sensitively.
    ///
    /// Supports:
    /// - `%` matches zero or more characters
    /// - `_` matches exactly one character
    /// - `\%`, `\_` and `\\` match the literal character
    ///
    /// A pattern ending in a lone `\` matches nothing.
    pub fn like_match(value: &str, pattern: &str) -> bool {
        let Some(tokens) = like_tokens(pattern) else {
            return false;
        };
        let chars: Vec<char> = value.chars().collect();

        let (mut t, mut c) = (0, 0);
        // Token after the most recent `%`, and the input position it covers up to.
        let mut resume: Option<(usize, usize)> = None;
        while c < chars.len() {
            match tokens.get(t) {
                Some(LikeToken::AnyRun) => {
                    t += 1;
                    resume = Some((t, c));
                }
                Some(LikeToken::AnyOne) => {
                    t += 1;
                    c += 1;
                }
                Some(LikeToken::Literal(l)) if *l == chars[c] => {
                    t += 1;
                    c += 1;
                }
                _ => match resume {
                    Some((after, covered)) => {
                        t = after;
                        c = covered + 1;
                        resume = Some((after, c));
                    }
                    None => return false,
                },
            }
        }
        tokens[t..].iter().all(|token| *token == LikeToken::AnyRun)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LikeToken {
    AnyRun,
    AnyOne,
    Literal(char),
}

fn like_tokens(pattern: &str) -> Option<Vec<LikeToken>> {
    let mut tokens = Vec::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '%' => LikeToken::AnyRun,
            '_' => LikeToken::AnyOne,
            '\\' => LikeToken::Literal(chars.next()?),
            other => LikeToken::Literal(other),
        });
    }
    Some(tokens)
}
