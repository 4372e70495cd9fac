//! Error types for the sync engine.

use livetree_data::{DataError, Path};
use livetree_protocol::ServerError;
use thiserror::Error;

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors reported by the engine.
///
/// Only [`SyncError::InvalidData`] is ever returned synchronously; every
/// other failure arrives through a completion or a cancel callback.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// The operation was queued while offline and has not been sent yet.
    #[error("not connected to server: operation queued")]
    Disconnected,

    /// The authority refused the operation on authorization grounds.
    #[error("permission denied at {path}: {message}")]
    PermissionDenied {
        /// Location of the refused operation.
        path: Path,
        /// Message from the authority.
        message: String,
    },

    /// Malformed value, key or priority, rejected before sending.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A transaction gave up.
    #[error("transaction aborted: {reason}")]
    TransactionAborted {
        /// Why.
        reason: String,
    },

    /// The operation was superseded or canceled before it completed.
    #[error("operation canceled")]
    ActionCanceled,

    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The authority failed for a reason other than permissions.
    #[error("server error: {0}")]
    Server(String),

    /// Unexpected message from the authority.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invalid connection state transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// The engine task has stopped.
    #[error("engine is shut down")]
    EngineClosed,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Disconnected => true,
            SyncError::Server(_) => true,
            _ => false,
        }
    }

    /// Maps an authority rejection for an operation at `path`.
    pub fn from_server(path: &Path, error: ServerError) -> Self {
        match error {
            ServerError::PermissionDenied(message) => SyncError::PermissionDenied {
                path: path.clone(),
                message,
            },
            ServerError::DataStale => SyncError::TransactionAborted {
                reason: "data changed on the server".into(),
            },
            ServerError::InvalidRequest(message) => SyncError::InvalidData(message),
            ServerError::Internal(message) => SyncError::Server(message),
        }
    }
}

impl From<DataError> for SyncError {
    fn from(error: DataError) -> Self {
        SyncError::InvalidData(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::Disconnected.is_retryable());
        assert!(!SyncError::ActionCanceled.is_retryable());
        assert!(!SyncError::InvalidData("x".into()).is_retryable());
    }

    #[test]
    fn server_errors_map_to_kinds() {
        let path = Path::parse("admin").unwrap();
        let err = SyncError::from_server(&path, ServerError::permission_denied("rules"));
        assert_eq!(err.to_string(), "permission denied at /admin: rules");
        assert!(matches!(
            SyncError::from_server(&path, ServerError::DataStale),
            SyncError::TransactionAborted { .. }
        ));
    }

    #[test]
    fn data_errors_become_invalid_data() {
        let err: SyncError = Path::parse("a.b").unwrap_err().into();
        assert!(matches!(err, SyncError::InvalidData(_)));
    }
}
