//! Rejection codes sent by the authority.

use thiserror::Error;

/// Why the authority rejected a request or revoked a listener.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// Security rules refused the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A conditional write was guarded by a stale value.
    #[error("data stale: value changed since it was read")]
    DataStale,

    /// The request was malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Any other failure on the authority side.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Creates a permission denied error.
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied(message.into())
    }
}
