//! Operations the authority runs when this session ends.
//!
//! Registered actions live on the server; the client only keeps what it
//! must resend if the registration might not have reached the server. An
//! action acknowledged during a session is dropped when that session ends,
//! since the server has executed it by then. Nothing here touches the local
//! tree.

use crate::completion::Completer;
use livetree_data::{Node, Path};
use livetree_protocol::Action;
use std::collections::BTreeMap;
use tracing::debug;

/// A deferred operation.
#[derive(Debug, Clone, PartialEq)]
pub enum DisconnectKind {
    /// Overwrite the location.
    Set(Node),
    /// Replace the named children.
    Update(BTreeMap<String, Node>),
    /// Remove the location.
    Remove,
    /// Drop previously registered actions at or below the location.
    Cancel,
}

impl DisconnectKind {
    pub(crate) fn action(&self, path: &Path) -> Action {
        let path = path.clone();
        match self {
            DisconnectKind::Set(data) => Action::OnDisconnectPut {
                path,
                data: data.clone(),
            },
            DisconnectKind::Update(children) => Action::OnDisconnectMerge {
                path,
                children: children.clone(),
            },
            DisconnectKind::Remove => Action::OnDisconnectPut {
                path,
                data: Node::Empty,
            },
            DisconnectKind::Cancel => Action::OnDisconnectCancel { path },
        }
    }
}

#[derive(Debug)]
pub(crate) struct DisconnectAction {
    pub(crate) path: Path,
    pub(crate) kind: DisconnectKind,
    pub(crate) acknowledged: bool,
    pub(crate) completion: Option<Completer<()>>,
}

/// Disconnect actions of the current session, in registration order.
#[derive(Debug, Default)]
pub(crate) struct DisconnectActionManager {
    next_id: u64,
    actions: BTreeMap<u64, DisconnectAction>,
}

impl DisconnectActionManager {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records an action. A cancel also forgets earlier unacknowledged
    /// actions it covers, so they are not resent.
    pub(crate) fn register(
        &mut self,
        path: Path,
        kind: DisconnectKind,
        completion: Completer<()>,
    ) -> u64 {
        if kind == DisconnectKind::Cancel {
            self.actions.retain(|_, action| {
                action.acknowledged
                    || action.kind == DisconnectKind::Cancel
                    || !path.contains(&action.path)
            });
        }
        self.next_id += 1;
        self.actions.insert(
            self.next_id,
            DisconnectAction {
                path,
                kind,
                acknowledged: false,
                completion: Some(completion),
            },
        );
        self.next_id
    }

    pub(crate) fn get_mut(&mut self, id: u64) -> Option<&mut DisconnectAction> {
        self.actions.get_mut(&id)
    }

    /// The authority stored the action.
    pub(crate) fn acknowledge(&mut self, id: u64) -> Option<Completer<()>> {
        let action = self.actions.get_mut(&id)?;
        action.acknowledged = true;
        action.completion.take()
    }

    /// The authority refused the action.
    pub(crate) fn reject(&mut self, id: u64) -> Option<DisconnectAction> {
        self.actions.remove(&id)
    }

    /// The session ended: the server ran everything it had acknowledged.
    pub(crate) fn session_ended(&mut self) {
        let before = self.actions.len();
        self.actions.retain(|_, action| !action.acknowledged);
        debug!(
            executed = before - self.actions.len(),
            queued = self.actions.len(),
            "session ended"
        );
    }

    /// Actions to send again, oldest first.
    pub(crate) fn unacknowledged(&self) -> impl Iterator<Item = (u64, Action)> + '_ {
        self.actions
            .iter()
            .filter(|(_, action)| !action.acknowledged)
            .map(|(id, action)| (*id, action.kind.action(&action.path)))
    }

    pub(crate) fn len(&self) -> usize {
        self.actions.len()
    }
}
