//! Error types for keel.

use thiserror::Error;

/// Failure reported by a [`Driver`](crate::driver::Driver) implementation.
pub type DriverError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The main error type for keel operations.
#[derive(Debug, Error)]
pub enum KeelError {
    /// A value or schema rule was broken before any statement was sent.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// A column was used in a query that does not contain its table.
    #[error("Invalid reference to column {column} not present in the query's tables")]
    UnresolvedReference { column: String },

    /// The database could not be opened.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The storage driver rejected or failed to run a statement.
    #[error("Storage error executing [{sql}]: {source}")]
    Storage {
        sql: String,
        #[source]
        source: DriverError,
    },

    /// A stored value could not be decoded into the column's declared type.
    #[error("Cannot decode {column}: {message}")]
    Decode { column: String, message: String },

    /// The API was called in a way that cannot produce a statement.
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    /// The operation exists but is deliberately unsupported.
    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl KeelError {
    /// Create a constraint violation error.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::ConstraintViolation(message.into())
    }

    /// Wrap a driver failure with the SQL that caused it.
    pub fn storage(sql: impl Into<String>, source: impl Into<DriverError>) -> Self {
        Self::Storage {
            sql: sql.into(),
            source: source.into(),
        }
    }

    /// Create a decode error for the named column.
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create an invalid usage error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidUsage(message.into())
    }

    /// True for failures raised before the driver was involved.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Self::ConstraintViolation(_))
    }
}

/// Result type alias for keel operations.
pub type KeelResult<T> = Result<T, KeelError>;
