//! An in-memory authority for end-to-end tests.
//!
//! [`MemoryServer`] holds the authoritative tree and any number of client
//! sessions. It answers every request synchronously: replies go to the
//! session's [`SessionSink`] before [`MemoryServer::handle`] returns, in the
//! order a real authority would send them (data first, acknowledgement
//! last).
//!
//! Listens receive the full value at the listened path; clients apply
//! query constraints themselves.

use livetree_data::{node_hash, Node, Path, QueryParams};
use livetree_protocol::{
    AckBody, Action, ConnectionState, Request, RequestId, ServerError, ServerMessage, SessionSink,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Identifies one client session on a [`MemoryServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Rewrites the value at a path, simulating another writer.
type Interference = Box<dyn FnMut(&Node) -> Node + Send>;

/// A write registered to run when its session ends.
#[derive(Debug, Clone)]
enum DisconnectOp {
    Put(Node),
    Merge(BTreeMap<String, Node>),
}

#[derive(Default)]
struct Session {
    sink: Option<Arc<dyn SessionSink>>,
    connected: bool,
    held: bool,
    backlog: VecDeque<Request>,
    listens: Vec<(Path, QueryParams)>,
    on_disconnect: Vec<(Path, DisconnectOp)>,
    credential: Option<String>,
}

impl Session {
    fn listens_to(&self, path: &Path) -> bool {
        self.listens.iter().any(|(listened, _)| listened.overlaps(path))
    }
}

#[derive(Default)]
struct State {
    data: Node,
    sessions: BTreeMap<SessionId, Session>,
    next_session: u64,
    denied_reads: Vec<(Path, String)>,
    denied_writes: Vec<(Path, String)>,
    credentials: BTreeMap<String, Node>,
    interference: Option<(Path, usize, Interference)>,
    log: Vec<(SessionId, Action)>,
}

type Outbox = Vec<(Arc<dyn SessionSink>, ServerMessage)>;

impl State {
    /// Listens at or below a denied path are refused.
    fn read_denial(&self, path: &Path) -> Option<ServerError> {
        self.denied_reads
            .iter()
            .find(|(denied, _)| denied.contains(path))
            .map(|(_, message)| ServerError::permission_denied(message.clone()))
    }

    /// Writes that replace a denied node, at it or above it, are refused.
    fn write_denial(&self, path: &Path) -> Option<ServerError> {
        self.denied_writes
            .iter()
            .find(|(denied, _)| path.contains(denied))
            .map(|(_, message)| ServerError::permission_denied(message.clone()))
    }

    fn push(&self, outbox: &mut Outbox, session: SessionId, message: ServerMessage) {
        if let Some(sink) = self
            .sessions
            .get(&session)
            .filter(|s| s.connected)
            .and_then(|s| s.sink.clone())
        {
            outbox.push((sink, message));
        }
    }

    fn ack(&self, outbox: &mut Outbox, session: SessionId, id: RequestId, outcome: Result<AckBody, ServerError>) {
        self.push(outbox, session, ServerMessage::Ack { id, outcome });
    }

    /// Queues `message` for every connected session listening at or around
    /// `path`.
    fn broadcast(&self, outbox: &mut Outbox, path: &Path, message: &ServerMessage) {
        for (id, session) in &self.sessions {
            if session.connected && session.listens_to(path) {
                self.push(outbox, *id, message.clone());
            }
        }
    }

    fn put(&mut self, outbox: &mut Outbox, path: &Path, node: Node) {
        let data = std::mem::take(&mut self.data);
        self.data = data.with_path(path, node);
        let message = ServerMessage::DataUpdate {
            path: path.clone(),
            data: self.data.get(path).clone(),
        };
        self.broadcast(outbox, path, &message);
    }

    fn merge(&mut self, outbox: &mut Outbox, path: &Path, children: &BTreeMap<String, Node>) {
        let data = std::mem::take(&mut self.data);
        self.data = data.with_merge(path, children);
        let message = ServerMessage::MergeUpdate {
            path: path.clone(),
            children: children
                .keys()
                .map(|name| (name.clone(), self.data.get(path).child(name).clone()))
                .collect(),
        };
        self.broadcast(outbox, path, &message);
    }

    fn interfere(&mut self, outbox: &mut Outbox, path: &Path) {
        let Some((target, remaining, mut rewrite)) = self.interference.take() else {
            return;
        };
        if &target != path || remaining == 0 {
            self.interference = Some((target, remaining, rewrite));
            return;
        }
        let next = rewrite(self.data.get(path));
        trace!(%path, remaining, "interfering write");
        self.put(outbox, path, next);
        self.interference = Some((target, remaining - 1, rewrite));
    }

    fn handle(&mut self, outbox: &mut Outbox, session: SessionId, request: Request) {
        let Request { id, action } = request;
        self.log.push((session, action.clone()));
        match action {
            Action::Listen { path, query } => {
                if let Some(error) = self.read_denial(&path) {
                    self.ack(outbox, session, id, Err(error));
                    return;
                }
                if let Some(state) = self.sessions.get_mut(&session) {
                    state.listens.push((path.clone(), query));
                }
                let data = self.data.get(&path).clone();
                self.push(outbox, session, ServerMessage::DataUpdate { path, data });
                self.ack(outbox, session, id, Ok(AckBody::Done));
            }
            Action::Unlisten { path, query } => {
                if let Some(state) = self.sessions.get_mut(&session) {
                    if let Some(index) = state
                        .listens
                        .iter()
                        .position(|(p, q)| p == &path && q == &query)
                    {
                        state.listens.remove(index);
                    }
                }
                self.ack(outbox, session, id, Ok(AckBody::Done));
            }
            Action::Put { path, data } => {
                if let Some(error) = self.write_denial(&path) {
                    self.ack(outbox, session, id, Err(error));
                    return;
                }
                self.put(outbox, &path, data);
                self.ack(outbox, session, id, Ok(AckBody::Done));
            }
            Action::Merge { path, children } => {
                let denied = children
                    .keys()
                    .find_map(|name| self.write_denial(&path.child_key(name)));
                if let Some(error) = denied {
                    self.ack(outbox, session, id, Err(error));
                    return;
                }
                self.merge(outbox, &path, &children);
                self.ack(outbox, session, id, Ok(AckBody::Done));
            }
            Action::SetPriority { path, priority } => {
                if let Some(error) = self.write_denial(&path) {
                    self.ack(outbox, session, id, Err(error));
                    return;
                }
                let node = self.data.get(&path).clone().with_priority(priority);
                self.put(outbox, &path, node);
                self.ack(outbox, session, id, Ok(AckBody::Done));
            }
            Action::CompareAndPut {
                path,
                data,
                expected_hash,
            } => {
                if let Some(error) = self.write_denial(&path) {
                    self.ack(outbox, session, id, Err(error));
                    return;
                }
                self.interfere(outbox, &path);
                if node_hash(self.data.get(&path)) != expected_hash {
                    let current = self.data.get(&path).clone();
                    self.push(
                        outbox,
                        session,
                        ServerMessage::DataUpdate {
                            path,
                            data: current,
                        },
                    );
                    self.ack(outbox, session, id, Err(ServerError::DataStale));
                    return;
                }
                self.put(outbox, &path, data);
                self.ack(outbox, session, id, Ok(AckBody::Done));
            }
            Action::OnDisconnectPut { path, data } => {
                self.register_disconnect(outbox, session, id, path, DisconnectOp::Put(data));
            }
            Action::OnDisconnectMerge { path, children } => {
                self.register_disconnect(outbox, session, id, path, DisconnectOp::Merge(children));
            }
            Action::OnDisconnectCancel { path } => {
                if let Some(state) = self.sessions.get_mut(&session) {
                    state.on_disconnect.retain(|(registered, _)| !path.contains(registered));
                }
                self.ack(outbox, session, id, Ok(AckBody::Done));
            }
            Action::Auth { credential } => match self.credentials.get(&credential).cloned() {
                Some(data) => {
                    if let Some(state) = self.sessions.get_mut(&session) {
                        state.credential = Some(credential);
                    }
                    self.ack(outbox, session, id, Ok(AckBody::Auth { data }));
                }
                None => {
                    let error = ServerError::permission_denied("invalid credential");
                    self.ack(outbox, session, id, Err(error));
                }
            },
            Action::Unauth => {
                if let Some(state) = self.sessions.get_mut(&session) {
                    state.credential = None;
                }
                self.ack(outbox, session, id, Ok(AckBody::Done));
            }
        }
    }

    fn register_disconnect(
        &mut self,
        outbox: &mut Outbox,
        session: SessionId,
        id: RequestId,
        path: Path,
        op: DisconnectOp,
    ) {
        if let Some(error) = self.write_denial(&path) {
            self.ack(outbox, session, id, Err(error));
            return;
        }
        if let Some(state) = self.sessions.get_mut(&session) {
            state.on_disconnect.push((path, op));
        }
        self.ack(outbox, session, id, Ok(AckBody::Done));
    }
}

/// An in-memory authority shared by any number of client sessions.
#[derive(Default)]
pub struct MemoryServer {
    state: Mutex<State>,
}

impl MemoryServer {
    /// Creates an empty authority.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a disconnected session.
    pub fn open_session(&self) -> SessionId {
        let mut state = self.state.lock();
        state.next_session += 1;
        let id = SessionId(state.next_session);
        state.sessions.insert(id, Session::default());
        id
    }

    /// Attaches `sink` to `session` and connects it.
    pub fn connect(&self, session: SessionId, sink: Arc<dyn SessionSink>) {
        {
            let mut state = self.state.lock();
            let entry = state.sessions.entry(session).or_default();
            entry.sink = Some(sink);
        }
        self.reconnect(session);
    }

    /// Connects a session that already has a sink.
    pub fn reconnect(&self, session: SessionId) {
        let sink = {
            let mut state = self.state.lock();
            let Some(entry) = state.sessions.get_mut(&session) else {
                return;
            };
            if entry.connected {
                return;
            }
            entry.connected = true;
            entry.sink.clone()
        };
        debug!(%session, "session connected");
        if let Some(sink) = sink {
            sink.deliver(ServerMessage::ConnectionChanged(ConnectionState::Connecting));
            sink.deliver(ServerMessage::ConnectionChanged(ConnectionState::Connected));
        }
    }

    /// Ends a session's connection.
    ///
    /// Requests still held are lost, listens are dropped, and the session's
    /// disconnect actions run once, in registration order.
    pub fn disconnect(&self, session: SessionId) {
        let mut outbox = Outbox::new();
        let sink = {
            let mut state = self.state.lock();
            let Some(entry) = state.sessions.get_mut(&session) else {
                return;
            };
            if !entry.connected {
                return;
            }
            entry.connected = false;
            entry.held = false;
            entry.backlog.clear();
            entry.listens.clear();
            entry.credential = None;
            let actions = std::mem::take(&mut entry.on_disconnect);
            let sink = entry.sink.clone();
            debug!(%session, actions = actions.len(), "session disconnected");
            for (path, op) in actions {
                match op {
                    DisconnectOp::Put(node) => state.put(&mut outbox, &path, node),
                    DisconnectOp::Merge(children) => state.merge(&mut outbox, &path, &children),
                }
            }
            sink
        };
        deliver(outbox);
        if let Some(sink) = sink {
            sink.deliver(ServerMessage::ConnectionChanged(ConnectionState::Disconnected));
        }
    }

    /// Processes one request from `session`. Requests from a disconnected
    /// session are dropped.
    pub fn handle(&self, session: SessionId, request: Request) {
        let mut outbox = Outbox::new();
        {
            let mut state = self.state.lock();
            let Some(entry) = state.sessions.get_mut(&session) else {
                return;
            };
            if !entry.connected {
                trace!(%session, id = %request.id, "request from disconnected session dropped");
                return;
            }
            if entry.held {
                entry.backlog.push_back(request);
                return;
            }
            state.handle(&mut outbox, session, request);
        }
        deliver(outbox);
    }

    /// Queues `session`'s requests without answering them.
    pub fn hold(&self, session: SessionId) {
        if let Some(entry) = self.state.lock().sessions.get_mut(&session) {
            entry.held = true;
        }
    }

    /// Answers every held request, in arrival order, and stops holding.
    pub fn release(&self, session: SessionId) {
        let mut outbox = Outbox::new();
        {
            let mut state = self.state.lock();
            let backlog = match state.sessions.get_mut(&session) {
                Some(entry) => {
                    entry.held = false;
                    std::mem::take(&mut entry.backlog)
                }
                None => return,
            };
            for request in backlog {
                state.handle(&mut outbox, session, request);
            }
        }
        deliver(outbox);
    }

    /// Writes directly, as another client would.
    pub fn set(&self, path: &Path, node: Node) {
        let mut outbox = Outbox::new();
        self.state.lock().put(&mut outbox, path, node);
        deliver(outbox);
    }

    /// The authoritative value at `path`.
    pub fn value(&self, path: &Path) -> Node {
        self.state.lock().data.get(path).clone()
    }

    /// Rejects listens at or below `path`.
    pub fn deny_reads(&self, path: &Path, message: impl Into<String>) {
        self.state.lock().denied_reads.push((path.clone(), message.into()));
    }

    /// Rejects writes that would replace the node at `path`: writes at
    /// `path` or at one of its ancestors. Writes below it are accepted.
    pub fn deny_writes(&self, path: &Path, message: impl Into<String>) {
        self.state.lock().denied_writes.push((path.clone(), message.into()));
    }

    /// Accepts `credential`, answering with `data`.
    pub fn accept_credential(&self, credential: impl Into<String>, data: Node) {
        self.state.lock().credentials.insert(credential.into(), data);
    }

    /// Before each of the next `times` conditional writes at `path`,
    /// replaces the stored value with `rewrite(current)`.
    pub fn interfere<F>(&self, path: &Path, times: usize, rewrite: F)
    where
        F: FnMut(&Node) -> Node + Send + 'static,
    {
        self.state.lock().interference = Some((path.clone(), times, Box::new(rewrite)));
    }

    /// Revokes one of `session`'s listens.
    pub fn revoke_listen(&self, session: SessionId, path: &Path, query: &QueryParams, error: ServerError) {
        let mut outbox = Outbox::new();
        {
            let mut state = self.state.lock();
            if let Some(entry) = state.sessions.get_mut(&session) {
                entry.listens.retain(|(p, q)| !(p == path && q == query));
            }
            let message = ServerMessage::ListenRevoked {
                path: path.clone(),
                query: query.clone(),
                error,
            };
            state.push(&mut outbox, session, message);
        }
        deliver(outbox);
    }

    /// Revokes `session`'s credential.
    pub fn revoke_auth(&self, session: SessionId, error: ServerError) {
        let mut outbox = Outbox::new();
        {
            let mut state = self.state.lock();
            if let Some(entry) = state.sessions.get_mut(&session) {
                entry.credential = None;
            }
            state.push(&mut outbox, session, ServerMessage::AuthRevoked { error });
        }
        deliver(outbox);
    }

    /// Whether `session` is currently authenticated.
    pub fn is_authenticated(&self, session: SessionId) -> bool {
        self.state
            .lock()
            .sessions
            .get(&session)
            .is_some_and(|s| s.credential.is_some())
    }

    /// Number of disconnect actions registered for `session`.
    pub fn disconnect_actions(&self, session: SessionId) -> usize {
        self.state
            .lock()
            .sessions
            .get(&session)
            .map_or(0, |s| s.on_disconnect.len())
    }

    /// Every action received so far, with its session.
    pub fn received(&self) -> Vec<(SessionId, Action)> {
        self.state.lock().log.clone()
    }

    /// Names of the actions `session` sent, in arrival order.
    pub fn received_names(&self, session: SessionId) -> Vec<&'static str> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|(s, _)| *s == session)
            .map(|(_, action)| action.name())
            .collect()
    }

    /// Forgets the received-action log.
    pub fn clear_received(&self) {
        self.state.lock().log.clear();
    }
}

impl fmt::Debug for MemoryServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryServer")
            .field("sessions", &state.sessions.len())
            .field("received", &state.log.len())
            .finish_non_exhaustive()
    }
}

fn deliver(outbox: Outbox) {
    for (sink, message) in outbox {
        sink.deliver(message);
    }
}
