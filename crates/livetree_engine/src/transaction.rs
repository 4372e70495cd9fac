//! Read-modify-write transactions.
//!
//! A transaction runs its transform against the merged value, then asks
//! the authority to store the result only if the location still holds the
//! value the client last heard from the server. The guard is the content
//! hash of that value. When the authority reports a conflict it first
//! pushes its current value, so the retry reads fresh data.
//!
//! Status moves `Running -> AwaitingAck`, then either back to `Running`
//! on a conflict or out of the coordinator once committed or aborted.

use crate::completion::Completer;
use crate::error::{SyncError, SyncResult};
use crate::snapshot::{MutableData, TransactionOutcome, TransactionResult};
use crate::tree::WriteId;
use livetree_data::{node_hash, Node, Path};
use livetree_protocol::Action;
use std::collections::BTreeMap;
use std::fmt;

/// A transaction transform. May run several times.
pub type Transform = Box<dyn FnMut(MutableData) -> TransactionResult + Send>;

/// Where a transaction stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TxStatus {
    Running,
    AwaitingAck,
}

/// What one run of the transform produced.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Attempt {
    /// The transform declined to write.
    Abort,
    /// Write `node` with the guarded request `action`.
    Write { node: Node, action: Action },
}

pub(crate) struct Transaction {
    pub(crate) path: Path,
    transform: Transform,
    pub(crate) apply_locally: bool,
    pub(crate) retries: u32,
    pub(crate) status: TxStatus,
    /// The guarded request of the current attempt.
    pub(crate) action: Option<Action>,
    completion: Option<Completer<TransactionOutcome>>,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("path", &self.path)
            .field("apply_locally", &self.apply_locally)
            .field("retries", &self.retries)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl Transaction {
    pub(crate) fn new(
        path: Path,
        transform: Transform,
        apply_locally: bool,
        completion: Completer<TransactionOutcome>,
    ) -> Self {
        Self {
            path,
            transform,
            apply_locally,
            retries: 0,
            status: TxStatus::Running,
            action: None,
            completion: Some(completion),
        }
    }

    /// Runs the transform on `current`, guarding the write with the hash
    /// of `server`, the last value heard from the authority.
    pub(crate) fn run(&mut self, current: &Node, server: &Node) -> Attempt {
        let data = MutableData::new(self.path.clone(), current.clone());
        match (self.transform)(data) {
            TransactionResult::Abort => Attempt::Abort,
            TransactionResult::Success(data) => {
                let node = data.into_node();
                let action = Action::CompareAndPut {
                    path: self.path.clone(),
                    data: node.clone(),
                    expected_hash: node_hash(server),
                };
                self.action = Some(action.clone());
                self.status = TxStatus::AwaitingAck;
                Attempt::Write { node, action }
            }
        }
    }

    /// Counts a conflict. Returns true if another attempt is allowed.
    pub(crate) fn record_conflict(&mut self, max_retries: u32) -> bool {
        self.retries += 1;
        self.status = TxStatus::Running;
        self.action = None;
        self.retries <= max_retries
    }

    /// Reports the terminal outcome.
    pub(crate) fn finish(mut self, result: SyncResult<TransactionOutcome>) {
        if let Some(completion) = self.completion.take() {
            completion.complete(result);
        }
    }

    pub(crate) fn abort_error(&self) -> SyncError {
        SyncError::TransactionAborted {
            reason: format!("gave up after {} conflicting attempts", self.retries),
        }
    }
}

/// Transactions waiting for the authority, by the id of their overlay.
#[derive(Debug, Default)]
pub(crate) struct TransactionCoordinator {
    active: BTreeMap<WriteId, Transaction>,
}

impl TransactionCoordinator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn await_ack(&mut self, id: WriteId, transaction: Transaction) {
        self.active.insert(id, transaction);
    }

    pub(crate) fn take(&mut self, id: WriteId) -> Option<Transaction> {
        self.active.remove(&id)
    }

    /// Guarded requests still to be confirmed, oldest first.
    pub(crate) fn unresolved(&self) -> impl Iterator<Item = (WriteId, Action)> + '_ {
        self.active
            .iter()
            .filter_map(|(id, tx)| tx.action.clone().map(|action| (*id, action)))
    }

    pub(crate) fn len(&self) -> usize {
        self.active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::channel;
    use serde_json::json;

    fn increment() -> Transform {
        Box::new(|mut data: MutableData| {
            let current = data.value().as_i64().unwrap_or(0);
            data.set_value(&json!(current + 1)).unwrap();
            TransactionResult::Success(data)
        })
    }

    fn transaction(transform: Transform) -> Transaction {
        let (completer, _completion) = channel();
        Transaction::new(Path::parse("counter").unwrap(), transform, true, completer)
    }

    #[test]
    fn run_guards_with_server_hash() {
        let mut tx = transaction(increment());
        let server = Node::from(4);
        let Attempt::Write { node, action } = tx.run(&Node::from(5), &server) else {
            panic!("expected a write");
        };
        assert_eq!(node, Node::from(6));
        assert_eq!(tx.status, TxStatus::AwaitingAck);
        match action {
            Action::CompareAndPut { expected_hash, .. } => {
                assert_eq!(expected_hash, node_hash(&server));
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn abort_produces_no_write() {
        let mut tx = transaction(Box::new(|_: MutableData| TransactionResult::Abort));
        assert_eq!(tx.run(&Node::Empty, &Node::Empty), Attempt::Abort);
        assert!(tx.action.is_none());
    }

    #[test]
    fn retries_are_bounded() {
        let mut tx = transaction(increment());
        assert!(tx.record_conflict(2));
        assert!(tx.record_conflict(2));
        assert!(!tx.record_conflict(2));
        assert!(matches!(tx.abort_error(), SyncError::TransactionAborted { .. }));

        let mut strict = transaction(increment());
        assert!(!strict.record_conflict(0));
    }

    #[tokio::test]
    async fn finish_resolves_completion() {
        let (completer, completion) = channel();
        let tx = Transaction::new(Path::root(), increment(), false, completer);
        tx.finish(Err(SyncError::ActionCanceled));
        assert_eq!(completion.await, Err(SyncError::ActionCanceled));
    }

    #[test]
    fn coordinator_lists_awaiting_transactions() {
        let mut coordinator = TransactionCoordinator::new();
        let mut waiting = transaction(increment());
        waiting.run(&Node::Empty, &Node::Empty);
        coordinator.await_ack(WriteId(3), waiting);
        coordinator.await_ack(WriteId(1), transaction(increment()));

        let ids: Vec<_> = coordinator.unresolved().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![WriteId(3)]);
        assert!(coordinator.take(WriteId(1)).is_some());
        assert_eq!(coordinator.len(), 1);
    }
}
