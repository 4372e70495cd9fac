//! Error types for the data model.

use thiserror::Error;

/// Result type for data model operations.
pub type DataResult<T> = Result<T, DataError>;

/// Errors raised when a value, key or priority cannot be represented.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    /// A key or path segment is not allowed.
    #[error("invalid key {key:?}: {reason}")]
    InvalidKey {
        /// Offending key.
        key: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A number is NaN or infinite.
    #[error("invalid number {0}: numbers must be finite")]
    InvalidNumber(f64),

    /// A priority value has an unsupported type.
    #[error("invalid priority: {0}")]
    InvalidPriority(String),

    /// The payload nests deeper than allowed.
    #[error("value nests deeper than {limit} levels")]
    TooDeep {
        /// Configured depth limit.
        limit: usize,
    },

    /// Structurally malformed payload.
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

impl DataError {
    /// Creates an invalid key error.
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(message: impl Into<String>) -> Self {
        Self::InvalidValue(message.into())
    }
}
