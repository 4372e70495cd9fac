//! The engine's serialized state.
//!
//! [`Repo`] owns the tree and every piece of bookkeeping around it. It is
//! driven one [`Command`] at a time by the engine task and never shared,
//! so nothing in here locks. Each command runs to completion: the tree
//! change, the events it causes and the requests it sends all happen
//! before the next command is looked at.

use crate::completion::Completer;
use crate::config::EngineConfig;
use crate::connection::{ConnectionStateMachine, Transition};
use crate::disconnect::{DisconnectActionManager, DisconnectKind};
use crate::error::{SyncError, SyncResult};
use crate::registry::{CancelCallback, ListenerHandle, ListenerRegistry, Registration, ViewKey};
use crate::snapshot::{DataSnapshot, TransactionOutcome};
use crate::transaction::{Attempt, Transaction, TransactionCoordinator, Transform};
use crate::transport::Transport;
use crate::tree::{SyncTree, WriteId, WriteOp};
use crate::writes::{PendingWrite, WriteKind, WritePipeline};
use livetree_data::{Node, Path};
use livetree_protocol::{
    AckBody, Action, ConnectionState, Request, RequestId, ServerError, ServerMessage,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, trace, warn};

/// Work for the engine task.
pub(crate) enum Command {
    Write {
        path: Path,
        kind: WriteKind,
        completer: Completer<()>,
    },
    Transaction {
        path: Path,
        transform: Transform,
        apply_locally: bool,
        completer: Completer<TransactionOutcome>,
    },
    Subscribe {
        key: ViewKey,
        registration: Registration,
    },
    Unsubscribe(ListenerHandle),
    UnsubscribeAll(Path),
    OnDisconnect {
        path: Path,
        kind: DisconnectKind,
        completer: Completer<()>,
    },
    Auth {
        credential: String,
        cancel: Option<CancelCallback>,
        completer: Completer<Node>,
    },
    Unauth,
    Read {
        path: Path,
        reply: oneshot::Sender<Node>,
    },
    Server(ServerMessage),
    /// Replies true if nothing else is queued.
    Barrier(oneshot::Sender<bool>),
    Shutdown,
}

/// What an in-flight request was for.
#[derive(Debug, Clone)]
enum Pending {
    Write(WriteId),
    Transaction(WriteId),
    Disconnect(u64),
    Listen(ViewKey),
    Unlisten,
    Auth(String),
    Unauth,
}

#[derive(Default)]
struct AuthState {
    credential: Option<String>,
    cancel: Option<CancelCallback>,
    completion: Option<Completer<Node>>,
}

pub(crate) struct Repo {
    config: EngineConfig,
    transport: Arc<dyn Transport>,
    tree: SyncTree,
    registry: ListenerRegistry,
    writes: WritePipeline,
    transactions: TransactionCoordinator,
    disconnects: DisconnectActionManager,
    connection: ConnectionStateMachine,
    auth: AuthState,
    next_request: u64,
    in_flight: HashMap<RequestId, Pending>,
}

impl Repo {
    pub(crate) fn new(config: EngineConfig, transport: Arc<dyn Transport>) -> Self {
        let registry = ListenerRegistry::new(Arc::clone(&config.dispatcher));
        Self {
            config,
            transport,
            tree: SyncTree::new(),
            registry,
            writes: WritePipeline::new(),
            transactions: TransactionCoordinator::new(),
            disconnects: DisconnectActionManager::new(),
            connection: ConnectionStateMachine::new(),
            auth: AuthState::default(),
            next_request: 0,
            in_flight: HashMap::new(),
        }
    }

    pub(crate) fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    pub(crate) fn handle(&mut self, command: Command) {
        match command {
            Command::Write {
                path,
                kind,
                completer,
            } => self.write(path, kind, completer),
            Command::Transaction {
                path,
                transform,
                apply_locally,
                completer,
            } => {
                debug!(%path, apply_locally, "transaction started");
                let transaction = Transaction::new(path, transform, apply_locally, completer);
                self.attempt(transaction);
            }
            Command::Subscribe { key, registration } => self.subscribe(key, registration),
            Command::Unsubscribe(handle) => {
                if let Some(key) = self.registry.unregister(handle) {
                    self.unlisten(key);
                }
            }
            Command::UnsubscribeAll(path) => {
                for key in self.registry.unregister_all(&path) {
                    self.unlisten(key);
                }
            }
            Command::OnDisconnect {
                path,
                kind,
                completer,
            } => self.on_disconnect(path, kind, completer),
            Command::Auth {
                credential,
                cancel,
                completer,
            } => self.authenticate(credential, cancel, completer),
            Command::Unauth => self.unauthenticate(),
            Command::Read { path, reply } => {
                let _ = reply.send(self.tree.read(&path));
            }
            Command::Server(message) => self.server_message(message),
            Command::Barrier(_) | Command::Shutdown => {}
        }
    }

    /// Sends a request if connected. Offline requests are not sent; the
    /// caller keeps whatever it needs to send them again on reconnect.
    fn send(&mut self, action: Action, pending: Pending) -> SyncResult<RequestId> {
        if !self.connection.is_connected() {
            return Err(SyncError::Disconnected);
        }
        self.next_request += 1;
        let id = RequestId(self.next_request);
        trace!(%id, action = action.name(), "sending request");
        self.in_flight.insert(id, pending);
        if let Err(error) = self.transport.send(Request::new(id, action)) {
            warn!(%id, %error, "transport refused request; keeping it queued");
            self.in_flight.remove(&id);
            return Err(error);
        }
        Ok(id)
    }

    /// Delivers the differences at `path` and closes views that ran out of
    /// listeners.
    fn refresh(&mut self, path: &Path) {
        let tree = &self.tree;
        let closed = self.registry.refresh(path, |p| tree.read(p));
        for key in closed {
            self.unlisten(key);
        }
    }

    fn unlisten(&mut self, key: ViewKey) {
        let action = Action::Unlisten {
            path: key.path,
            query: key.query,
        };
        // Offline the authority has already forgotten the listen.
        let _ = self.send(action, Pending::Unlisten);
    }

    fn subscribe(&mut self, key: ViewKey, registration: Registration) {
        let current = self.tree.read(&key.path);
        if self.registry.register(key.clone(), registration, &current) {
            let action = Action::Listen {
                path: key.path.clone(),
                query: key.query.clone(),
            };
            let _ = self.send(action, Pending::Listen(key));
        }
    }

    fn write(&mut self, path: Path, kind: WriteKind, completer: Completer<()>) {
        let id = self.writes.next_id();
        debug!(write = %id, %path, kind = kind.name(), "optimistic write");
        self.tree
            .apply_optimistic_write(id, path.clone(), kind.op(), true);
        let action = kind.action(&path);
        let mut write = PendingWrite {
            id,
            path: path.clone(),
            kind,
            completion: Some(completer),
        };
        if let Err(error) = self.send(action, Pending::Write(id)) {
            // Report the queued state now; the write itself stays pending.
            if let Some(completion) = write.completion.take() {
                completion.complete(Err(error));
            }
        }
        self.writes.track(write);
        self.refresh(&path);
    }

    fn write_acked(&mut self, id: WriteId, outcome: Result<AckBody, ServerError>) {
        let Some(write) = self.writes.resolve(id) else {
            trace!(write = %id, "acknowledgement for unknown write");
            return;
        };
        match outcome {
            Ok(_) => {
                debug!(write = %id, path = %write.path, "write acknowledged");
                self.tree.acknowledge(id);
                if let Some(completion) = write.completion {
                    completion.complete(Ok(()));
                }
            }
            Err(error) => {
                warn!(write = %id, path = %write.path, %error, "write rejected; reverting");
                self.tree.revert(id);
                self.refresh(&write.path);
                if let Some(completion) = write.completion {
                    completion.complete(Err(SyncError::from_server(&write.path, error)));
                }
            }
        }
    }

    /// Runs one attempt of a transaction.
    fn attempt(&mut self, mut transaction: Transaction) {
        let path = transaction.path.clone();
        let current = self.tree.read_all(&path);
        let server = self.tree.server_value(&path).clone();
        match transaction.run(&current, &server) {
            Attempt::Abort => {
                debug!(%path, "transaction aborted by its transform");
                self.refresh(&path);
                let snapshot = DataSnapshot::new(path.clone(), self.tree.read(&path));
                transaction.finish(Ok(TransactionOutcome {
                    committed: false,
                    snapshot,
                }));
            }
            Attempt::Write { node, action } => {
                let id = self.writes.next_id();
                trace!(write = %id, %path, retries = transaction.retries, "transaction attempt");
                self.tree.apply_optimistic_write(
                    id,
                    path.clone(),
                    WriteOp::Overwrite(node),
                    transaction.apply_locally,
                );
                // Offline attempts go out on reconnect.
                let _ = self.send(action, Pending::Transaction(id));
                self.transactions.await_ack(id, transaction);
                self.refresh(&path);
            }
        }
    }

    fn transaction_acked(&mut self, id: WriteId, outcome: Result<AckBody, ServerError>) {
        let Some(mut transaction) = self.transactions.take(id) else {
            trace!(write = %id, "acknowledgement for unknown transaction");
            return;
        };
        let path = transaction.path.clone();
        match outcome {
            Ok(_) => {
                self.tree.reveal(id);
                self.tree.acknowledge(id);
                self.refresh(&path);
                debug!(write = %id, %path, retries = transaction.retries, "transaction committed");
                let snapshot = DataSnapshot::new(path.clone(), self.tree.read(&path));
                transaction.finish(Ok(TransactionOutcome {
                    committed: true,
                    snapshot,
                }));
            }
            Err(ServerError::DataStale) => {
                self.tree.revert(id);
                if transaction.record_conflict(self.config.transaction.max_retries) {
                    debug!(%path, retries = transaction.retries, "transaction conflict; retrying");
                    self.attempt(transaction);
                } else {
                    warn!(%path, retries = transaction.retries, "transaction gave up");
                    self.refresh(&path);
                    let error = transaction.abort_error();
                    transaction.finish(Err(error));
                }
            }
            Err(error) => {
                warn!(%path, %error, "transaction rejected");
                self.tree.revert(id);
                self.refresh(&path);
                transaction.finish(Err(SyncError::from_server(&path, error)));
            }
        }
    }

    fn on_disconnect(&mut self, path: Path, kind: DisconnectKind, completer: Completer<()>) {
        let action = kind.action(&path);
        let id = self.disconnects.register(path, kind, completer);
        if let Err(error) = self.send(action, Pending::Disconnect(id)) {
            if let Some(completion) = self
                .disconnects
                .get_mut(id)
                .and_then(|action| action.completion.take())
            {
                completion.complete(Err(error));
            }
        }
    }

    fn disconnect_acked(&mut self, id: u64, outcome: Result<AckBody, ServerError>) {
        match outcome {
            Ok(_) => {
                if let Some(completion) = self.disconnects.acknowledge(id) {
                    completion.complete(Ok(()));
                }
            }
            Err(error) => {
                if let Some(action) = self.disconnects.reject(id) {
                    warn!(path = %action.path, %error, "disconnect action rejected");
                    if let Some(completion) = action.completion {
                        completion.complete(Err(SyncError::from_server(&action.path, error)));
                    }
                }
            }
        }
    }

    fn authenticate(
        &mut self,
        credential: String,
        cancel: Option<CancelCallback>,
        completer: Completer<Node>,
    ) {
        if let Some(previous) = self.auth.completion.take() {
            previous.complete(Err(SyncError::ActionCanceled));
        }
        self.auth = AuthState {
            credential: Some(credential.clone()),
            cancel,
            completion: Some(completer),
        };
        // Offline, the credential is sent once connected.
        let _ = self.send(
            Action::Auth {
                credential: credential.clone(),
            },
            Pending::Auth(credential),
        );
    }

    fn unauthenticate(&mut self) {
        let previous = std::mem::take(&mut self.auth);
        if let Some(completion) = previous.completion {
            completion.complete(Err(SyncError::ActionCanceled));
        }
        let _ = self.send(Action::Unauth, Pending::Unauth);
    }

    fn auth_acked(&mut self, credential: String, outcome: Result<AckBody, ServerError>) {
        if self.auth.credential.as_deref() != Some(credential.as_str()) {
            trace!("acknowledgement for a replaced credential");
            return;
        }
        match outcome {
            Ok(body) => {
                debug!("authenticated");
                let data = match body {
                    AckBody::Auth { data } => data,
                    AckBody::Done => Node::Empty,
                };
                if let Some(completion) = self.auth.completion.take() {
                    completion.complete(Ok(data));
                }
            }
            Err(error) => {
                warn!(%error, "authentication rejected");
                let previous = std::mem::take(&mut self.auth);
                if let Some(completion) = previous.completion {
                    completion.complete(Err(SyncError::from_server(&Path::root(), error)));
                }
            }
        }
    }

    fn server_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::DataUpdate { path, data } => {
                trace!(%path, "server update");
                self.tree.apply_server_update(&path, data);
                self.refresh(&path);
            }
            ServerMessage::MergeUpdate { path, children } => {
                trace!(%path, children = children.len(), "server merge");
                self.tree.apply_server_merge(&path, &children);
                self.refresh(&path);
            }
            ServerMessage::Ack { id, outcome } => match self.in_flight.remove(&id) {
                Some(Pending::Write(write)) => self.write_acked(write, outcome),
                Some(Pending::Transaction(write)) => self.transaction_acked(write, outcome),
                Some(Pending::Disconnect(action)) => self.disconnect_acked(action, outcome),
                Some(Pending::Listen(key)) => {
                    if let Err(error) = outcome {
                        let error = SyncError::from_server(&key.path, error);
                        self.registry.revoke(&key, error);
                    }
                }
                Some(Pending::Auth(credential)) => self.auth_acked(credential, outcome),
                Some(Pending::Unlisten) | Some(Pending::Unauth) => {}
                None => trace!(%id, "acknowledgement for unknown request"),
            },
            ServerMessage::ListenRevoked { path, query, error } => {
                let error = SyncError::from_server(&path, error);
                self.registry.revoke(&ViewKey { path, query }, error);
            }
            ServerMessage::AuthRevoked { error } => {
                warn!(%error, "authentication revoked");
                let previous = std::mem::take(&mut self.auth);
                if let Some(cancel) = previous.cancel {
                    let error = SyncError::from_server(&Path::root(), error);
                    self.config
                        .dispatcher
                        .dispatch(Box::new(move || cancel(error)));
                }
            }
            ServerMessage::ConnectionChanged(state) => self.connection_changed(state),
        }
    }

    fn connection_changed(&mut self, state: ConnectionState) {
        match self.connection.transition(state) {
            Err(error) => warn!(%error, "ignoring connection signal"),
            Ok(Transition::Unchanged) => {}
            Ok(Transition::Changed { from, to }) => {
                info!(from = from.name(), to = to.name(), "connection state changed");
                match to {
                    ConnectionState::Connected => self.resync(),
                    ConnectionState::Disconnected => {
                        // Unanswered requests are resent from their owners.
                        self.in_flight.clear();
                        self.disconnects.session_ended();
                    }
                    ConnectionState::Connecting => {}
                }
            }
        }
    }

    /// Restores server-side session state after connecting: credential,
    /// listens, unresolved writes in write order, then disconnect actions.
    fn resync(&mut self) {
        debug!(
            views = self.registry.keys().len(),
            listeners = self.registry.listener_count(),
            writes = self.writes.len(),
            transactions = self.transactions.len(),
            disconnect_actions = self.disconnects.len(),
            "resynchronizing"
        );
        if let Some(credential) = self.auth.credential.clone() {
            let action = Action::Auth {
                credential: credential.clone(),
            };
            if self.send(action, Pending::Auth(credential)).is_err() {
                return;
            }
        }
        for key in self.registry.keys() {
            let action = Action::Listen {
                path: key.path.clone(),
                query: key.query.clone(),
            };
            if self.send(action, Pending::Listen(key)).is_err() {
                return;
            }
        }

        let mut writes: Vec<(WriteId, Action, Pending)> = self
            .writes
            .unresolved()
            .map(|(id, action)| (id, action, Pending::Write(id)))
            .chain(
                self.transactions
                    .unresolved()
                    .map(|(id, action)| (id, action, Pending::Transaction(id))),
            )
            .collect();
        writes.sort_by_key(|(id, _, _)| *id);
        for (_, action, pending) in writes {
            if self.send(action, pending).is_err() {
                return;
            }
        }

        let actions: Vec<(u64, Action)> = self.disconnects.unacknowledged().collect();
        for (id, action) in actions {
            if self.send(action, Pending::Disconnect(id)).is_err() {
                return;
            }
        }
    }
}
