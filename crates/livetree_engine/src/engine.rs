//! The engine task and its handles.
//!
//! An [`Engine`] spawns one Tokio task that owns all client state. Every
//! caller, and the transport delivering server messages, talks to it by
//! enqueueing commands through an [`EngineHandle`]. Commands are processed
//! strictly in enqueue order.

use crate::completion::Completion;
use crate::config::EngineConfig;
use crate::error::{SyncError, SyncResult};
use crate::push_id::PushIdGenerator;
use crate::reference::Reference;
use crate::registry::CancelCallback;
use crate::repo::{Command, Repo};
use crate::transport::Transport;
use livetree_data::{Node, Path};
use livetree_protocol::{ConnectionState, ServerMessage, SessionSink};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info_span, trace, Instrument};

/// Enqueues commands for the engine task.
///
/// Cheap to clone. Also the [`SessionSink`] a transport delivers server
/// messages to.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<Command>,
    queued: Arc<AtomicUsize>,
}

impl EngineHandle {
    pub(crate) fn send(&self, command: Command) -> SyncResult<()> {
        self.queued.fetch_add(1, Ordering::SeqCst);
        self.commands.send(command).map_err(|_| {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            SyncError::EngineClosed
        })
    }

    /// Returns true once the engine task has stopped.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle")
            .field("queued", &self.queued.load(Ordering::SeqCst))
            .finish()
    }
}

impl SessionSink for EngineHandle {
    fn deliver(&self, message: ServerMessage) {
        if self.send(Command::Server(message)).is_err() {
            trace!("engine closed; dropping server message");
        }
    }
}

/// State shared by an engine and every reference derived from it.
pub(crate) struct Shared {
    pub(crate) handle: EngineHandle,
    pub(crate) host: String,
    pub(crate) max_depth: usize,
    pub(crate) push_ids: PushIdGenerator,
}

/// A client sync engine.
///
/// # Example
///
/// ```no_run
/// use livetree_engine::{Engine, EngineConfig, MockTransport};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # async fn demo() -> livetree_engine::SyncResult<()> {
/// let engine = Engine::new(EngineConfig::new("https://demo.livetree.dev"), Arc::new(MockTransport::new()));
/// let users = engine.reference("users")?;
/// let _queued = users.child("fred")?.set(&json!({"age": 30}))?;
/// engine.flush().await?;
/// # Ok(())
/// # }
/// ```
pub struct Engine {
    shared: Arc<Shared>,
    connection: watch::Receiver<ConnectionState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Starts an engine. Must be called within a Tokio runtime.
    ///
    /// The engine starts disconnected. The transport reports connectivity
    /// and server messages through [`Engine::handle`].
    pub fn new(config: EngineConfig, transport: Arc<dyn Transport>) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let queued = Arc::new(AtomicUsize::new(0));
        let handle = EngineHandle {
            commands,
            queued: Arc::clone(&queued),
        };

        let span = info_span!("livetree_engine", name = %config.name);
        let shared = Arc::new(Shared {
            handle,
            host: config.host.clone(),
            max_depth: config.max_depth,
            push_ids: PushIdGenerator::new(),
        });
        let repo = Repo::new(config, transport);
        let connection = repo.watch_connection();
        let task = tokio::spawn(run(repo, receiver, queued).instrument(span));

        Self {
            shared,
            connection,
            task: Mutex::new(Some(task)),
        }
    }

    /// A handle for the transport to deliver server messages through.
    pub fn handle(&self) -> EngineHandle {
        self.shared.handle.clone()
    }

    /// Absolute URL of the authority.
    pub fn host(&self) -> &str {
        &self.shared.host
    }

    /// A reference to the root of the tree.
    pub fn root(&self) -> Reference {
        Reference::new(Arc::clone(&self.shared), Path::root())
    }

    /// A reference from either an absolute URL under this engine's host or
    /// a slash separated path.
    pub fn reference(&self, location: &str) -> SyncResult<Reference> {
        let host = self.shared.host.as_str();
        let path = match location.strip_prefix(host) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
            _ if location.contains("://") => {
                return Err(SyncError::InvalidData(format!(
                    "{location} is not a location on {host}"
                )))
            }
            _ => location,
        };
        Ok(Reference::new(Arc::clone(&self.shared), Path::parse(path)?))
    }

    /// Current connectivity.
    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    /// Receives every connectivity change.
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    /// The merged value at `path`, as the engine sees it now.
    pub async fn read(&self, path: &Path) -> SyncResult<Node> {
        let (reply, response) = oneshot::channel();
        self.shared.handle.send(Command::Read {
            path: path.clone(),
            reply,
        })?;
        response.await.map_err(|_| SyncError::EngineClosed)
    }

    /// Authenticates the session. `cancel` runs once if the authority
    /// later revokes the credential. The credential is presented again
    /// after every reconnect until [`Engine::unauth`].
    pub fn auth_with_credential(
        &self,
        credential: impl Into<String>,
        cancel: Option<CancelCallback>,
    ) -> Completion<Node> {
        self.root().auth_with_credential(credential, cancel)
    }

    /// Drops the session's credential.
    pub fn unauth(&self) {
        self.root().unauth()
    }

    /// Waits until every command enqueued so far, and everything those
    /// commands caused to be enqueued, has been processed.
    ///
    /// Callbacks handed to a non-inline dispatcher may still be pending.
    pub async fn flush(&self) -> SyncResult<()> {
        loop {
            let (reply, idle) = oneshot::channel();
            self.shared.handle.send(Command::Barrier(reply))?;
            if idle.await.map_err(|_| SyncError::EngineClosed)? {
                return Ok(());
            }
            tokio::task::yield_now().await;
        }
    }

    /// Stops the engine task. Outstanding completions resolve with
    /// [`SyncError::EngineClosed`].
    pub async fn shutdown(&self) {
        if self.shared.handle.send(Command::Shutdown).is_err() {
            return;
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("host", &self.shared.host)
            .field("connection", &self.connection_state())
            .finish_non_exhaustive()
    }
}

async fn run(mut repo: Repo, mut commands: mpsc::UnboundedReceiver<Command>, queued: Arc<AtomicUsize>) {
    debug!("engine started");
    while let Some(command) = commands.recv().await {
        let stop = match command {
            Command::Barrier(reply) => {
                let _ = reply.send(queued.load(Ordering::SeqCst) == 1);
                false
            }
            Command::Shutdown => true,
            command => {
                repo.handle(command);
                false
            }
        };
        queued.fetch_sub(1, Ordering::SeqCst);
        if stop {
            break;
        }
    }
    debug!("engine stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use serde_json::json;

    fn engine() -> (Engine, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new());
        let engine = Engine::new(EngineConfig::new("https://demo.livetree.dev"), transport.clone());
        (engine, transport)
    }

    #[tokio::test]
    async fn references_from_urls_and_paths() {
        let (engine, _) = engine();
        let by_url = engine.reference("https://demo.livetree.dev/users/fred").unwrap();
        let by_path = engine.reference("/users/fred").unwrap();
        assert_eq!(by_url.path(), by_path.path());
        assert_eq!(by_url.to_string(), "https://demo.livetree.dev/users/fred");
        assert!(engine.reference("https://elsewhere.dev/users").is_err());
        assert!(engine.reference("users/a.b").is_err());
        assert!(engine.reference("https://demo.livetree.dev").unwrap().path().is_root());
    }

    #[tokio::test]
    async fn offline_writes_are_readable() {
        let (engine, transport) = engine();
        let completion = engine.reference("a").unwrap().set(&json!(1)).unwrap();
        assert_eq!(completion.await, Err(SyncError::Disconnected));
        engine.flush().await.unwrap();
        assert_eq!(engine.read(&Path::parse("a").unwrap()).await, Ok(Node::from(1)));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn connection_changes_are_published() {
        let (engine, _) = engine();
        assert_eq!(engine.connection_state(), ConnectionState::Disconnected);
        engine
            .handle()
            .deliver(ServerMessage::ConnectionChanged(ConnectionState::Connected));
        engine.flush().await.unwrap();
        assert_eq!(engine.connection_state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn shutdown_closes_outstanding_work() {
        let (engine, _) = engine();
        engine
            .handle()
            .deliver(ServerMessage::ConnectionChanged(ConnectionState::Connected));
        let pending = engine.reference("a").unwrap().set(&json!(1)).unwrap();
        engine.shutdown().await;

        assert_eq!(pending.await, Err(SyncError::EngineClosed));
        assert!(engine.handle().is_closed());
        assert_eq!(engine.flush().await, Err(SyncError::EngineClosed));
    }
}
