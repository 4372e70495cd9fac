//! Client requests.

use livetree_data::{Node, Path, Priority, QueryParams};
use std::collections::BTreeMap;
use std::fmt;

/// Identifies a request so its acknowledgement can be matched.
///
/// Ids are unique per engine and never reused, even across reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a request asks the authority to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Start streaming updates for a (possibly constrained) location.
    Listen {
        /// Location.
        path: Path,
        /// Constraints.
        query: QueryParams,
    },
    /// Stop streaming updates for a location.
    Unlisten {
        /// Location.
        path: Path,
        /// Constraints.
        query: QueryParams,
    },
    /// Overwrite a location.
    Put {
        /// Location.
        path: Path,
        /// New value, [`Node::Empty`] to remove.
        data: Node,
    },
    /// Shallow merge into a location.
    Merge {
        /// Location.
        path: Path,
        /// Children to replace.
        children: BTreeMap<String, Node>,
    },
    /// Change the priority of an existing node.
    SetPriority {
        /// Location.
        path: Path,
        /// New priority.
        priority: Priority,
    },
    /// Overwrite a location only if it still hashes to `expected_hash`.
    CompareAndPut {
        /// Location.
        path: Path,
        /// New value.
        data: Node,
        /// Hash of the value the writer based its change on.
        expected_hash: [u8; 32],
    },
    /// Register an overwrite to run when this session ends.
    OnDisconnectPut {
        /// Location.
        path: Path,
        /// Value to write.
        data: Node,
    },
    /// Register a merge to run when this session ends.
    OnDisconnectMerge {
        /// Location.
        path: Path,
        /// Children to replace.
        children: BTreeMap<String, Node>,
    },
    /// Drop registered disconnect actions at or below a location.
    OnDisconnectCancel {
        /// Location.
        path: Path,
    },
    /// Authenticate this session.
    Auth {
        /// Opaque credential.
        credential: String,
    },
    /// Drop this session's authentication.
    Unauth,
}

impl Action {
    /// Returns a short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Listen { .. } => "listen",
            Action::Unlisten { .. } => "unlisten",
            Action::Put { .. } => "put",
            Action::Merge { .. } => "merge",
            Action::SetPriority { .. } => "set_priority",
            Action::CompareAndPut { .. } => "compare_and_put",
            Action::OnDisconnectPut { .. } => "on_disconnect_put",
            Action::OnDisconnectMerge { .. } => "on_disconnect_merge",
            Action::OnDisconnectCancel { .. } => "on_disconnect_cancel",
            Action::Auth { .. } => "auth",
            Action::Unauth => "unauth",
        }
    }

    /// Returns the location this action targets, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Action::Listen { path, .. }
            | Action::Unlisten { path, .. }
            | Action::Put { path, .. }
            | Action::Merge { path, .. }
            | Action::SetPriority { path, .. }
            | Action::CompareAndPut { path, .. }
            | Action::OnDisconnectPut { path, .. }
            | Action::OnDisconnectMerge { path, .. }
            | Action::OnDisconnectCancel { path } => Some(path),
            Action::Auth { .. } | Action::Unauth => None,
        }
    }

    /// Returns true for actions that change data, now or at disconnect.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Action::Put { .. }
                | Action::Merge { .. }
                | Action::SetPriority { .. }
                | Action::CompareAndPut { .. }
                | Action::OnDisconnectPut { .. }
                | Action::OnDisconnectMerge { .. }
                | Action::OnDisconnectCancel { .. }
        )
    }
}

/// A request sent to the authority.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Request id, echoed in the acknowledgement.
    pub id: RequestId,
    /// What to do.
    pub action: Action,
}

impl Request {
    /// Creates a request.
    pub fn new(id: RequestId, action: Action) -> Self {
        Self { id, action }
    }
}
