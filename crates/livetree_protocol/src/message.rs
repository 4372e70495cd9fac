//! Messages from the authority to a client.

use crate::error::ServerError;
use crate::request::RequestId;
use livetree_data::{Node, Path, QueryParams};
use std::collections::BTreeMap;

/// Connectivity as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection.
    Disconnected,
    /// Connection being established.
    Connecting,
    /// Connected and able to exchange messages.
    Connected,
}

impl ConnectionState {
    /// Returns a short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

/// Payload of a successful acknowledgement.
#[derive(Debug, Clone, PartialEq)]
pub enum AckBody {
    /// The request was applied.
    Done,
    /// Authentication succeeded; carries the authority's view of the
    /// credential.
    Auth {
        /// Auth data (claims), as a tree.
        data: Node,
    },
}

/// A message delivered to a client session.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Outcome of a request.
    Ack {
        /// Request being answered.
        id: RequestId,
        /// Success or rejection.
        outcome: Result<AckBody, ServerError>,
    },
    /// Authoritative value of a location.
    DataUpdate {
        /// Location.
        path: Path,
        /// New value.
        data: Node,
    },
    /// Authoritative values of some children of a location.
    MergeUpdate {
        /// Location.
        path: Path,
        /// Replaced children.
        children: BTreeMap<String, Node>,
    },
    /// A listen is no longer permitted.
    ListenRevoked {
        /// Location.
        path: Path,
        /// Constraints of the revoked listen.
        query: QueryParams,
        /// Reason.
        error: ServerError,
    },
    /// The session's credential is no longer valid.
    AuthRevoked {
        /// Reason.
        error: ServerError,
    },
    /// The transport's connectivity changed.
    ConnectionChanged(ConnectionState),
}

/// Receives messages for one client session.
///
/// Implementations must not block; delivery only enqueues.
pub trait SessionSink: Send + Sync {
    /// Delivers a message to the session.
    fn deliver(&self, message: ServerMessage);
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<ServerMessage>>);

    impl SessionSink for Collect {
        fn deliver(&self, message: ServerMessage) {
            self.0.lock().push(message);
        }
    }

    #[test]
    fn sink_is_object_safe() {
        let sink: Box<dyn SessionSink> = Box::new(Collect::default());
        sink.deliver(ServerMessage::ConnectionChanged(ConnectionState::Connected));
        sink.deliver(ServerMessage::Ack {
            id: RequestId(1),
            outcome: Err(ServerError::DataStale),
        });
    }

    #[test]
    fn connection_state_names() {
        assert_eq!(ConnectionState::Connected.name(), "connected");
        assert_eq!(ConnectionState::Disconnected.name(), "disconnected");
    }
}
