//! Outstanding optimistic writes.
//!
//! The pipeline remembers every write the authority has not resolved yet:
//! what to resend after a reconnect, and whom to tell once it resolves.
//! The tree effect of a write lives in [`SyncTree`](crate::tree::SyncTree);
//! both are keyed by the same [`WriteId`].

use crate::completion::Completer;
use crate::tree::{WriteId, WriteOp};
use livetree_data::{Node, Path, Priority};
use livetree_protocol::Action;
use std::collections::BTreeMap;

/// What a write does.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteKind {
    /// Replace the value (and priority) at the path.
    Set(Node),
    /// Replace only the named children.
    Update(BTreeMap<String, Node>),
    /// Remove the subtree.
    Remove,
    /// Change the priority of the existing node.
    SetPriority(Priority),
}

impl WriteKind {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            WriteKind::Set(_) => "set",
            WriteKind::Update(_) => "update",
            WriteKind::Remove => "remove",
            WriteKind::SetPriority(_) => "set_priority",
        }
    }

    pub(crate) fn op(&self) -> WriteOp {
        match self {
            WriteKind::Set(node) => WriteOp::Overwrite(node.clone()),
            WriteKind::Update(children) => WriteOp::Merge(children.clone()),
            WriteKind::Remove => WriteOp::Overwrite(Node::Empty),
            WriteKind::SetPriority(priority) => WriteOp::Priority(priority.clone()),
        }
    }

    pub(crate) fn action(&self, path: &Path) -> Action {
        let path = path.clone();
        match self {
            WriteKind::Set(data) => Action::Put {
                path,
                data: data.clone(),
            },
            WriteKind::Update(children) => Action::Merge {
                path,
                children: children.clone(),
            },
            WriteKind::Remove => Action::Put {
                path,
                data: Node::Empty,
            },
            WriteKind::SetPriority(priority) => Action::SetPriority {
                path,
                priority: priority.clone(),
            },
        }
    }
}

/// A write awaiting its acknowledgement.
#[derive(Debug)]
pub(crate) struct PendingWrite {
    pub(crate) id: WriteId,
    pub(crate) path: Path,
    pub(crate) kind: WriteKind,
    /// Taken when the completion fires early (queued while offline).
    pub(crate) completion: Option<Completer<()>>,
}

/// Unresolved writes in write order.
#[derive(Debug, Default)]
pub(crate) struct WritePipeline {
    next_id: u64,
    pending: BTreeMap<WriteId, PendingWrite>,
}

impl WritePipeline {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Allocates the next write id. Transactions draw from the same
    /// sequence so that every tree overlay is ordered.
    pub(crate) fn next_id(&mut self) -> WriteId {
        self.next_id += 1;
        WriteId(self.next_id)
    }

    pub(crate) fn track(&mut self, write: PendingWrite) {
        self.pending.insert(write.id, write);
    }

    /// Removes a resolved write.
    pub(crate) fn resolve(&mut self, id: WriteId) -> Option<PendingWrite> {
        self.pending.remove(&id)
    }

    /// Writes still to be confirmed, oldest first, with the request that
    /// carries each.
    pub(crate) fn unresolved(&self) -> impl Iterator<Item = (WriteId, Action)> + '_ {
        self.pending
            .values()
            .map(|write| (write.id, write.kind.action(&write.path)))
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}
