//! The public handle surface: queries and references.
//!
//! A [`Query`] is an immutable (location, constraints) value that can be
//! observed. A [`Reference`] is an unconstrained location that can also be
//! written, navigated and given disconnect actions. Narrowing a reference
//! yields a new [`Query`]; neither type is ever mutated.

use crate::completion::{channel, Completion};
use crate::disconnect::DisconnectKind;
use crate::engine::Shared;
use crate::error::{SyncError, SyncResult};
use crate::events::{Event, EventKind};
use crate::registry::{CancelCallback, EventCallback, ListenerHandle, Registration, ViewKey};
use crate::repo::Command;
use crate::snapshot::{MutableData, TransactionOutcome, TransactionResult};
use crate::transaction::Transform;
use crate::writes::WriteKind;
use livetree_data::{node_from_json_with_depth, validate_key, Node, Path, Priority, QueryParams};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// An observable, possibly constrained location.
#[derive(Clone)]
pub struct Query {
    shared: Arc<Shared>,
    path: Path,
    params: QueryParams,
}

impl Query {
    /// Location observed.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Constraints applied.
    pub fn params(&self) -> &QueryParams {
        &self.params
    }

    fn with_params(&self, params: QueryParams) -> Query {
        Query {
            shared: Arc::clone(&self.shared),
            path: self.path.clone(),
            params,
        }
    }

    /// Only children at or after `priority`.
    pub fn start_at(&self, priority: impl Into<Priority>) -> SyncResult<Query> {
        let priority = priority.into();
        priority.validate()?;
        Ok(self.with_params(self.params.clone().with_start(priority, None)))
    }

    /// Only children at or after (`priority`, `name`).
    pub fn start_at_with_name(&self, priority: impl Into<Priority>, name: &str) -> SyncResult<Query> {
        let priority = priority.into();
        priority.validate()?;
        validate_key(name)?;
        Ok(self.with_params(self.params.clone().with_start(priority, Some(name.to_string()))))
    }

    /// Only children at or before `priority`.
    pub fn end_at(&self, priority: impl Into<Priority>) -> SyncResult<Query> {
        let priority = priority.into();
        priority.validate()?;
        Ok(self.with_params(self.params.clone().with_end(priority, None)))
    }

    /// Only children at or before (`priority`, `name`).
    pub fn end_at_with_name(&self, priority: impl Into<Priority>, name: &str) -> SyncResult<Query> {
        let priority = priority.into();
        priority.validate()?;
        validate_key(name)?;
        Ok(self.with_params(self.params.clone().with_end(priority, Some(name.to_string()))))
    }

    /// At most `limit` children.
    pub fn limit(&self, limit: usize) -> Query {
        self.with_params(self.params.clone().with_limit(limit))
    }

    /// Calls `callback` for every event of `kind`, starting with the
    /// initial events for the current data.
    pub fn observe<F>(&self, kind: EventKind, callback: F) -> ListenerHandle
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.register(kind, Arc::new(callback), None, false)
    }

    /// Like [`Query::observe`]; `cancel` runs once if the authority
    /// revokes the listen, after which no more events arrive.
    pub fn observe_with_cancel<F, C>(&self, kind: EventKind, callback: F, cancel: C) -> ListenerHandle
    where
        F: Fn(Event) + Send + Sync + 'static,
        C: FnOnce(SyncError) + Send + 'static,
    {
        self.register(kind, Arc::new(callback), Some(Box::new(cancel)), false)
    }

    /// Calls `callback` for the first event of `kind` only.
    pub fn observe_single<F>(&self, kind: EventKind, callback: F) -> ListenerHandle
    where
        F: FnOnce(Event) + Send + 'static,
    {
        self.register(kind, once(callback), None, true)
    }

    /// Like [`Query::observe_single`], with a cancel callback.
    pub fn observe_single_with_cancel<F, C>(&self, kind: EventKind, callback: F, cancel: C) -> ListenerHandle
    where
        F: FnOnce(Event) + Send + 'static,
        C: FnOnce(SyncError) + Send + 'static,
    {
        self.register(kind, once(callback), Some(Box::new(cancel)), true)
    }

    /// Streams events of `kind` into a channel.
    pub fn listen(&self, kind: EventKind) -> (ListenerHandle, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.observe(kind, move |event| {
            let _ = tx.send(event);
        });
        (handle, rx)
    }

    /// Removes one registration. Events already computed may still arrive.
    pub fn remove_observer(&self, handle: ListenerHandle) {
        self.enqueue(Command::Unsubscribe(handle));
    }

    /// Removes every registration at this location, whatever its
    /// constraints.
    pub fn remove_all_observers(&self) {
        self.enqueue(Command::UnsubscribeAll(self.path.clone()));
    }

    fn register(
        &self,
        kind: EventKind,
        callback: EventCallback,
        cancel: Option<CancelCallback>,
        once: bool,
    ) -> ListenerHandle {
        let handle = ListenerHandle::next();
        self.enqueue(Command::Subscribe {
            key: ViewKey {
                path: self.path.clone(),
                query: self.params.clone(),
            },
            registration: Registration {
                handle,
                kind,
                callback,
                cancel,
                once,
            },
        });
        handle
    }

    fn enqueue(&self, command: Command) {
        if self.shared.handle.send(command).is_err() {
            trace!(path = %self.path, "engine closed; command dropped");
        }
    }

    fn submit(&self, path: Path, kind: WriteKind) -> Completion<()> {
        let (completer, completion) = channel();
        match self.shared.handle.send(Command::Write {
            path,
            kind,
            completer,
        }) {
            Ok(()) => completion,
            Err(error) => Completion::ready(Err(error)),
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_root() {
            f.write_str(&self.shared.host)
        } else {
            write!(f, "{}{}", self.shared.host, self.path)
        }
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("path", &self.path)
            .field("params", &self.params)
            .finish()
    }
}

/// Wraps a one-shot callback so it can sit behind a shared `Fn`.
fn once<F>(callback: F) -> EventCallback
where
    F: FnOnce(Event) + Send + 'static,
{
    let slot = Mutex::new(Some(callback));
    Arc::new(move |event: Event| {
        if let Some(callback) = slot.lock().take() {
            callback(event);
        }
    })
}

/// A location that can be read, written and navigated.
#[derive(Clone)]
pub struct Reference {
    query: Query,
}

impl Reference {
    pub(crate) fn new(shared: Arc<Shared>, path: Path) -> Self {
        Self {
            query: Query {
                shared,
                path,
                params: QueryParams::default(),
            },
        }
    }

    fn at(&self, path: Path) -> Reference {
        Reference::new(Arc::clone(&self.query.shared), path)
    }

    /// Location.
    pub fn path(&self) -> &Path {
        &self.query.path
    }

    /// Last path segment, `None` at the root.
    pub fn name(&self) -> Option<&str> {
        self.query.path.name()
    }

    /// The parent location, `None` at the root.
    pub fn parent(&self) -> Option<Reference> {
        self.query.path.parent().map(|path| self.at(path))
    }

    /// The root location.
    pub fn root(&self) -> Reference {
        self.at(Path::root())
    }

    /// A descendant, addressed by a relative slash path.
    pub fn child(&self, path: &str) -> SyncResult<Reference> {
        let relative = Path::parse(path)?;
        Ok(self.at(self.query.path.join(&relative)))
    }

    /// A new child with a unique, time-ordered name.
    pub fn child_by_auto_id(&self) -> Reference {
        let name = self.query.shared.push_ids.generate();
        self.at(self.query.path.child_key(&name))
    }

    /// This location as an unconstrained query.
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// See [`Query::start_at`].
    pub fn start_at(&self, priority: impl Into<Priority>) -> SyncResult<Query> {
        self.query.start_at(priority)
    }

    /// See [`Query::end_at`].
    pub fn end_at(&self, priority: impl Into<Priority>) -> SyncResult<Query> {
        self.query.end_at(priority)
    }

    /// See [`Query::limit`].
    pub fn limit(&self, limit: usize) -> Query {
        self.query.limit(limit)
    }

    /// See [`Query::observe`].
    pub fn observe<F>(&self, kind: EventKind, callback: F) -> ListenerHandle
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.query.observe(kind, callback)
    }

    /// See [`Query::observe_with_cancel`].
    pub fn observe_with_cancel<F, C>(&self, kind: EventKind, callback: F, cancel: C) -> ListenerHandle
    where
        F: Fn(Event) + Send + Sync + 'static,
        C: FnOnce(SyncError) + Send + 'static,
    {
        self.query.observe_with_cancel(kind, callback, cancel)
    }

    /// See [`Query::observe_single`].
    pub fn observe_single<F>(&self, kind: EventKind, callback: F) -> ListenerHandle
    where
        F: FnOnce(Event) + Send + 'static,
    {
        self.query.observe_single(kind, callback)
    }

    /// See [`Query::listen`].
    pub fn listen(&self, kind: EventKind) -> (ListenerHandle, mpsc::UnboundedReceiver<Event>) {
        self.query.listen(kind)
    }

    /// See [`Query::remove_observer`].
    pub fn remove_observer(&self, handle: ListenerHandle) {
        self.query.remove_observer(handle)
    }

    /// See [`Query::remove_all_observers`].
    pub fn remove_all_observers(&self) {
        self.query.remove_all_observers()
    }

    /// Replaces the value. Any existing priority is cleared.
    ///
    /// Malformed values fail here; every other failure arrives through the
    /// completion.
    pub fn set(&self, value: &Value) -> SyncResult<Completion<()>> {
        let node = self.import(value)?;
        Ok(self.query.submit(self.path().clone(), WriteKind::Set(node)))
    }

    /// Replaces the value and priority together.
    pub fn set_with_priority(&self, value: &Value, priority: impl Into<Priority>) -> SyncResult<Completion<()>> {
        let priority = priority.into();
        priority.validate()?;
        let node = self.import(value)?.with_priority(priority);
        Ok(self.query.submit(self.path().clone(), WriteKind::Set(node)))
    }

    /// Replaces the value with an already built tree.
    ///
    /// The tree is checked like imported JSON: keys, finite numbers and
    /// priorities, no absent children, and the configured depth limit.
    pub fn set_node(&self, node: Node) -> SyncResult<Completion<()>> {
        node.validate(self.query.shared.max_depth)?;
        Ok(self.query.submit(self.path().clone(), WriteKind::Set(node)))
    }

    /// Removes the value.
    pub fn remove(&self) -> Completion<()> {
        self.query.submit(self.path().clone(), WriteKind::Remove)
    }

    /// Changes the priority of the existing value.
    pub fn set_priority(&self, priority: impl Into<Priority>) -> SyncResult<Completion<()>> {
        let priority = priority.into();
        priority.validate()?;
        Ok(self
            .query
            .submit(self.path().clone(), WriteKind::SetPriority(priority)))
    }

    /// Replaces the children named in `children` (a JSON object), leaving
    /// the others untouched. A `null` child removes it.
    pub fn update(&self, children: &Value) -> SyncResult<Completion<()>> {
        let children = self.import_children(children)?;
        Ok(self
            .query
            .submit(self.path().clone(), WriteKind::Update(children)))
    }

    /// Disconnect actions for this location.
    pub fn on_disconnect(&self) -> OnDisconnect {
        OnDisconnect {
            reference: self.clone(),
        }
    }

    /// Runs an atomic read-modify-write at this location, firing local
    /// events for intermediate attempts.
    pub fn run_transaction<F>(&self, transform: F) -> Completion<TransactionOutcome>
    where
        F: FnMut(MutableData) -> TransactionResult + Send + 'static,
    {
        self.run_transaction_with_options(transform, true)
    }

    /// Runs a transaction. With `apply_locally` false, listeners only see
    /// the final outcome.
    pub fn run_transaction_with_options<F>(&self, transform: F, apply_locally: bool) -> Completion<TransactionOutcome>
    where
        F: FnMut(MutableData) -> TransactionResult + Send + 'static,
    {
        let transform: Transform = Box::new(transform);
        let (completer, completion) = channel();
        let command = Command::Transaction {
            path: self.path().clone(),
            transform,
            apply_locally,
            completer,
        };
        match self.query.shared.handle.send(command) {
            Ok(()) => completion,
            Err(error) => Completion::ready(Err(error)),
        }
    }

    /// Authenticates the session. See [`Engine::auth_with_credential`](crate::Engine::auth_with_credential).
    pub fn auth_with_credential(
        &self,
        credential: impl Into<String>,
        cancel: Option<CancelCallback>,
    ) -> Completion<Node> {
        let (completer, completion) = channel();
        let command = Command::Auth {
            credential: credential.into(),
            cancel,
            completer,
        };
        match self.query.shared.handle.send(command) {
            Ok(()) => completion,
            Err(error) => Completion::ready(Err(error)),
        }
    }

    /// Drops the session's credential.
    pub fn unauth(&self) {
        self.query.enqueue(Command::Unauth);
    }

    fn import(&self, value: &Value) -> SyncResult<Node> {
        Ok(node_from_json_with_depth(value, self.query.shared.max_depth)?)
    }

    fn import_children(&self, children: &Value) -> SyncResult<BTreeMap<String, Node>> {
        let Value::Object(map) = children else {
            return Err(SyncError::InvalidData("update expects an object".into()));
        };
        let mut imported = BTreeMap::new();
        for (name, child) in map {
            validate_key(name)?;
            imported.insert(name.clone(), self.import(child)?);
        }
        Ok(imported)
    }

    fn submit_disconnect(&self, kind: DisconnectKind) -> Completion<()> {
        let (completer, completion) = channel();
        let command = Command::OnDisconnect {
            path: self.path().clone(),
            kind,
            completer,
        };
        match self.query.shared.handle.send(command) {
            Ok(()) => completion,
            Err(error) => Completion::ready(Err(error)),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.query, f)
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reference").field("path", self.path()).finish()
    }
}

impl PartialEq for Reference {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.query.shared, &other.query.shared) && self.path() == other.path()
    }
}

/// Operations the authority performs when this session ends.
#[derive(Debug, Clone)]
pub struct OnDisconnect {
    reference: Reference,
}

impl OnDisconnect {
    /// Overwrite the location on disconnect.
    pub fn set(&self, value: &Value) -> SyncResult<Completion<()>> {
        let node = self.reference.import(value)?;
        Ok(self.reference.submit_disconnect(DisconnectKind::Set(node)))
    }

    /// Overwrite the location, with a priority, on disconnect.
    pub fn set_with_priority(&self, value: &Value, priority: impl Into<Priority>) -> SyncResult<Completion<()>> {
        let priority = priority.into();
        priority.validate()?;
        let node = self.reference.import(value)?.with_priority(priority);
        Ok(self.reference.submit_disconnect(DisconnectKind::Set(node)))
    }

    /// Merge children into the location on disconnect.
    pub fn update(&self, children: &Value) -> SyncResult<Completion<()>> {
        let children = self.reference.import_children(children)?;
        Ok(self.reference.submit_disconnect(DisconnectKind::Update(children)))
    }

    /// Remove the location on disconnect.
    pub fn remove(&self) -> Completion<()> {
        self.reference.submit_disconnect(DisconnectKind::Remove)
    }

    /// Drop every disconnect action registered at or below the location.
    pub fn cancel(&self) -> Completion<()> {
        self.reference.submit_disconnect(DisconnectKind::Cancel)
    }
}

#[cfg(test)]
mod tests {
    use crate::{Engine, EngineConfig, EventKind, MockTransport, SyncError};
    use livetree_data::{Node, Primitive, Priority};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn engine() -> Engine {
        Engine::new(EngineConfig::new("https://demo.livetree.dev"), Arc::new(MockTransport::new()))
    }

    #[tokio::test]
    async fn navigation() {
        let engine = engine();
        let fred = engine.reference("users/fred").unwrap();
        assert_eq!(fred.name(), Some("fred"));
        assert_eq!(fred.parent().unwrap().name(), Some("users"));
        assert!(fred.root().path().is_root());
        assert!(fred.root().parent().is_none());
        assert_eq!(fred.child("pets/rex").unwrap().to_string(), "https://demo.livetree.dev/users/fred/pets/rex");
        assert_eq!(engine.root().to_string(), "https://demo.livetree.dev");
        assert_eq!(fred.parent().unwrap(), engine.reference("users").unwrap());
    }

    #[tokio::test]
    async fn auto_ids_are_ordered_children() {
        let engine = engine();
        let list = engine.reference("list").unwrap();
        let a = list.child_by_auto_id();
        let b = list.child_by_auto_id();
        assert_eq!(a.parent().unwrap(), list);
        assert!(a.name().unwrap() < b.name().unwrap());
    }

    #[tokio::test]
    async fn queries_are_immutable() {
        let engine = engine();
        let list = engine.reference("list").unwrap();
        let limited = list.limit(2);
        let ranged = limited.start_at(1).unwrap();
        assert!(list.query().params().is_default());
        assert_eq!(limited.params().limit, Some(2));
        assert!(limited.params().start.is_none());
        assert_eq!(ranged.params().start.as_ref().unwrap().priority, Priority::from(1));
        assert!(list.start_at(f64::NAN).is_err());
        assert!(list.query().end_at_with_name(1, "bad/name").is_err());
    }

    #[tokio::test]
    async fn malformed_values_fail_synchronously() {
        let engine = engine();
        let node = engine.reference("x").unwrap();
        assert!(matches!(node.set(&json!({"a.b": 1})), Err(SyncError::InvalidData(_))));
        assert!(node.update(&json!([1, 2])).is_err());
        assert!(node.update(&json!({"$bad": 1})).is_err());
        assert!(node.set_priority(f64::INFINITY).is_err());
        assert!(node.on_disconnect().set(&json!({"": 1})).is_err());
    }

    #[tokio::test]
    async fn hand_built_nodes_are_validated() {
        let engine = engine();
        let x = engine.reference("x").unwrap();
        let (_handle, mut events) = x.listen(EventKind::ChildAdded);

        let malformed = Node::Branch {
            children: BTreeMap::from([
                ("a.b/$".to_string(), Node::Empty),
                ("n".to_string(), Node::leaf(Primitive::Number(f64::NAN))),
            ]),
            priority: Priority::Number(f64::INFINITY),
        };
        assert!(matches!(x.set_node(malformed), Err(SyncError::InvalidData(_))));
        let nan = Node::leaf(Primitive::Number(f64::NAN));
        assert!(x.set_node(nan).is_err());
        let deep = (0..64).fold(Node::from(1), |child, _| {
            Node::branch([("k".to_string(), child)])
        });
        assert!(x.set_node(deep).is_err());

        let _ = x.set_node(Node::branch([("ok".to_string(), Node::from(1))])).unwrap();
        engine.flush().await.unwrap();

        let mut added = Vec::new();
        while let Ok(event) = events.try_recv() {
            added.push(event.snapshot.name().map(str::to_string));
        }
        assert_eq!(added, vec![Some("ok".to_string())]);
    }

    #[tokio::test]
    async fn observe_single_fires_once() {
        let engine = engine();
        let node = engine.reference("x").unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        node.observe_single(EventKind::Value, move |event| {
            let _ = tx.send(event.snapshot.value());
        });
        let _ = node.set(&json!(1)).unwrap();
        let _ = node.set(&json!(2)).unwrap();
        engine.flush().await.unwrap();

        assert_eq!(rx.recv().await, Some(json!(null)));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn listen_streams_events() {
        let engine = engine();
        let node = engine.reference("x").unwrap();
        let (handle, mut events) = node.listen(EventKind::Value);
        let _ = node.set(&json!("a")).unwrap();
        engine.flush().await.unwrap();
        node.remove_observer(handle);
        let _ = node.set(&json!("b")).unwrap();
        engine.flush().await.unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event.snapshot.value());
        }
        assert_eq!(seen, vec![json!(null), json!("a")]);
    }
}
