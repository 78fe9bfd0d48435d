//! Value comparison shared by filtering, sorting, joining and hydration.
//!
//! Values are ordered across types as NULL < numeric < text < bytes. Booleans
//! are numeric (0/1), and integers compare with floats by magnitude, so an
//! in-process evaluation agrees with a relational back end.

use std::cmp::Ordering;

use quarry_proto::Value;

/// Rank of a value's type class in the cross-type order.
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_)
        | Value::Int32(_)
        | Value::Int64(_)
        | Value::Float32(_)
        | Value::Float64(_) => 1,
        Value::String(_) => 2,
        Value::Bytes(_) => 3,
    }
}

fn is_integral(value: &Value) -> bool {
    matches!(value, Value::Bool(_) | Value::Int32(_) | Value::Int64(_))
}

/// Compare two non-null values.
///
/// Returns `None` when either side is NULL: such comparisons are unknown
/// and never satisfy a predicate.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    if a.is_null() || b.is_null() {
        return None;
    }
    Some(total_cmp(a, b))
}

/// SQL equality: false whenever either side is NULL.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    compare_values(a, b) == Some(Ordering::Equal)
}

/// Total order over values, NULL first.
fn total_cmp(a: &Value, b: &Value) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }

    match (a, b) {
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
        _ if is_integral(a) && is_integral(b) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => Ordering::Equal,
        },
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
    }
}

/// Ordering used by sort keys: missing and NULL values sort first.
///
/// Descending sorts reverse this, which puts NULLs last.
pub fn sort_cmp(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let null = Value::Null;
    total_cmp(a.unwrap_or(&null), b.unwrap_or(&null))
}

/// Hashable form of a value, consistent with [`values_equal`].
///
/// Integral floats collapse onto the integer key so `1` and `1.0` meet in
/// the same hash bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKey {
    Null,
    Int(i64),
    Float(u64),
    Text(String),
    Bytes(Vec<u8>),
}

impl ValueKey {
    /// Build the key for a value.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => ValueKey::Null,
            Value::Bool(_) | Value::Int32(_) | Value::Int64(_) => {
                ValueKey::Int(value.as_i64().unwrap_or_default())
            }
            Value::Float32(_) | Value::Float64(_) => {
                let f = value.as_f64().unwrap_or_default();
                if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e18 {
                    ValueKey::Int(f as i64)
                } else if f == 0.0 {
                    ValueKey::Int(0)
                } else {
                    ValueKey::Float(f.to_bits())
                }
            }
            Value::String(s) => ValueKey::Text(s.clone()),
            Value::Bytes(b) => ValueKey::Bytes(b.clone()),
        }
    }
}
