//! Scalar values carried by rows, filters and entities.

use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

/// A scalar value stored in a column.
///
/// Booleans are kept distinct for callers but compare as the integers 0/1,
/// which is how relational back ends store them.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Narrow integer.
    Int32(i32),
    /// Integer.
    Int64(i64),
    /// Double-precision float.
    Float64(f64),
    /// Single-precision float.
    Float32(f32),
    /// UTF-8 string.
    String(String),
    /// Binary data.
    Bytes(Vec<u8>),
}

impl Value {
    /// Check for NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if this value is numeric (booleans included).
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Value::Bool(_) | Value::Int32(_) | Value::Int64(_) | Value::Float32(_) | Value::Float64(_)
        )
    }

    /// The boolean, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        if let Value::Bool(flag) = self {
            Some(*flag)
        } else {
            None
        }
    }

    /// Integer view, widening `Int32` and `Bool`.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int64(n) => Some(n),
            Value::Int32(n) => Some(i64::from(n)),
            Value::Bool(flag) => Some(i64::from(flag)),
            _ => None,
        }
    }

    /// Floating-point view of any numeric value.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float64(x) => Some(x),
            Value::Float32(x) => Some(f64::from(x)),
            Value::Int32(n) => Some(f64::from(n)),
            Value::Int64(n) => Some(n as f64),
            Value::Bool(flag) => Some(f64::from(u8::from(flag))),
            _ => None,
        }
    }

    /// The text, if this is a `String`.
    pub fn as_str(&self) -> Option<&str> {
        if let Value::String(text) = self {
            Some(text)
        } else {
            None
        }
    }

    /// The payload, if this is `Bytes`.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        if let Value::Bytes(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }

    /// Short type name used in error messages and plan summaries.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::Float32(_) => "float32",
            Value::Float64(_) => "float64",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int32(i) => write!(f, "{}", i),
            Value::Int64(i) => write!(f, "{}", i),
            Value::Float32(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Value::Bytes(b) => {
                write!(f, "x'")?;
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                write!(f, "'")
            }
        }
    }
}

macro_rules! value_from {
    ($($source:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$source> for Value {
                fn from(value: $source) -> Self {
                    Value::$variant(value)
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i32 => Int32,
    i64 => Int64,
    f32 => Float32,
    f64 => Float64,
    String => String,
    Vec<u8> => Bytes,
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

/// `None` maps to NULL.
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}
