//! SQLite adapter errors.

use thiserror::Error;

/// Errors raised while compiling or running plans on SQLite.
#[derive(Debug, Error)]
pub enum Error {
    /// SQLite reported an error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The plan cannot be expressed as SQL.
    #[error("cannot compile plan: {0}")]
    InvalidPlan(String),

    /// Rows handed to an insert helper disagree with the table.
    #[error("invalid row for table '{table}': {reason}")]
    InvalidRow { table: String, reason: String },
}
