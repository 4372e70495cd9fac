//! Connection state machine.

use crate::error::{SyncError, SyncResult};
use livetree_protocol::ConnectionState;
use tokio::sync::watch;

/// Tracks connectivity and publishes every change.
#[derive(Debug)]
pub(crate) struct ConnectionStateMachine {
    state: ConnectionState,
    publisher: watch::Sender<ConnectionState>,
}

/// Result of applying a transport signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    /// Already in the signalled state.
    Unchanged,
    /// The state changed.
    Changed {
        from: ConnectionState,
        to: ConnectionState,
    },
}

impl ConnectionStateMachine {
    /// Starts disconnected.
    pub(crate) fn new() -> Self {
        let (publisher, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            state: ConnectionState::Disconnected,
            publisher,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.publisher.subscribe()
    }

    /// Applies a transport signal.
    ///
    /// A connected session can only end; going back to `Connecting` without
    /// passing through `Disconnected` is rejected.
    pub(crate) fn transition(&mut self, to: ConnectionState) -> SyncResult<Transition> {
        use ConnectionState::*;
        let from = self.state;
        if from == to {
            return Ok(Transition::Unchanged);
        }
        match (from, to) {
            (Disconnected, Connecting)
            | (Disconnected, Connected)
            | (Connecting, Connected)
            | (Connecting, Disconnected)
            | (Connected, Disconnected) => {}
            _ => {
                return Err(SyncError::InvalidStateTransition {
                    from: from.name().into(),
                    to: to.name().into(),
                })
            }
        }
        self.state = to;
        self.publisher.send_replace(to);
        Ok(Transition::Changed { from, to })
    }
}
