//! Construction-time error types.

use thiserror::Error;

/// Errors raised while building filters, joins and column references.
///
/// These are always reported at the configuration call that caused them,
/// before any query is planned or executed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// A filter leaf or composite was malformed.
    #[error("invalid filter on '{field}' ({operator}): {reason}")]
    InvalidFilter {
        field: String,
        operator: String,
        reason: String,
    },

    /// A join specification was malformed.
    #[error("invalid join '{alias}': {reason}")]
    InvalidJoin { alias: String, reason: String },

    /// A column reference could not be parsed.
    #[error("invalid column reference '{0}'")]
    InvalidColumnRef(String),
}

impl Error {
    pub(crate) fn invalid_filter(
        field: impl Into<String>,
        operator: impl std::fmt::Display,
        reason: impl Into<String>,
    ) -> Self {
        Error::InvalidFilter {
            field: field.into(),
            operator: operator.to_string(),
            reason: reason.into(),
        }
    }
}
