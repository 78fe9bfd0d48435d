//! Core error types.

use quarry_proto::Value;
use thiserror::Error;

/// Boxed cause reported by a data source adapter.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by collections, planning, execution and hydration.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed filter construction.
    #[error("invalid filter on '{field}' ({operator}): {reason}")]
    InvalidFilter {
        field: String,
        operator: String,
        reason: String,
    },

    /// Malformed join specification.
    #[error("invalid join '{alias}': {reason}")]
    InvalidJoin { alias: String, reason: String },

    /// Join alias collides with the base alias or another join.
    #[error("join alias '{alias}' is already in use")]
    DuplicateAlias { alias: String },

    /// Unqualified field resolves to more than one column.
    #[error("column '{field}' is ambiguous; candidates: {}", .candidates.join(", "))]
    AmbiguousColumn {
        field: String,
        candidates: Vec<String>,
    },

    /// Field does not exist in the registered schema.
    #[error("unknown field '{field}' in {scope}")]
    UnknownField { field: String, scope: String },

    /// Column reference could not be parsed.
    #[error("invalid column reference '{0}'")]
    InvalidColumnRef(String),

    /// Page size or page number out of range.
    #[error("invalid pagination: {reason}")]
    InvalidPagination { reason: String },

    /// The data source failed; the original cause is preserved.
    #[error("data source error during {operation}: {source}")]
    DataSource {
        operation: &'static str,
        #[source]
        source: BoxError,
    },

    /// The cancellation token fired around a data source call.
    #[error("{operation} was cancelled")]
    Cancelled { operation: &'static str },

    /// A required attribute join produced no row for an entity.
    #[error("entity {identity} is missing required attribute '{attribute}'")]
    IncompleteHydration { identity: Value, attribute: String },

    /// A raw row arrived without its identity value.
    #[error("row from '{table}' has no value for identity column '{column}'")]
    MissingIdentity { table: String, column: String },

    /// The data source returned more raw rows than the budget allows.
    #[error("query returned {rows} rows, exceeding budget of {max_rows}")]
    BudgetExceeded { rows: usize, max_rows: usize },

    /// `first()` / `last()` on a collection with no items.
    #[error("collection over '{table}' is empty")]
    EmptyCollection { table: String },

    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl Error {
    /// Whether retrying the same operation may succeed without changing
    /// the collection's configuration.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::DataSource { .. } | Error::Cancelled { .. })
    }
}

impl From<quarry_proto::Error> for Error {
    fn from(err: quarry_proto::Error) -> Self {
        match err {
            quarry_proto::Error::InvalidFilter {
                field,
                operator,
                reason,
            } => Error::InvalidFilter {
                field,
                operator,
                reason,
            },
            quarry_proto::Error::InvalidJoin { alias, reason } => {
                Error::InvalidJoin { alias, reason }
            }
            quarry_proto::Error::InvalidColumnRef(column) => Error::InvalidColumnRef(column),
        }
    }
}
