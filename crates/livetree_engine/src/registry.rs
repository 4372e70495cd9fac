//! Listener registrations and event delivery.
//!
//! Registrations are grouped into views, one per (path, query) pair. Each
//! view caches what its listeners last saw, so that after a mutation only
//! the difference is delivered. A view exists exactly as long as it has
//! registrations, and the authority is asked to stream a location for as
//! long as a view exists for it.
//!
//! Delivery goes through the configured [`Dispatcher`]: every job for one
//! mutation is submitted before the next mutation is processed, and the
//! dispatcher preserves submission order.

use crate::dispatcher::Dispatcher;
use crate::error::SyncError;
use crate::events::{diff, initial_events, Event, EventKind};
use livetree_data::{Node, Path, QueryParams};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Identifies a listener registration.
///
/// Handles are unique within the process and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerHandle(u64);

impl ListenerHandle {
    pub(crate) fn next() -> Self {
        Self(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric value of the handle.
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Callback receiving events.
pub type EventCallback = Arc<dyn Fn(Event) + Send + Sync>;

/// Callback told, once, that a registration was revoked.
pub type CancelCallback = Box<dyn FnOnce(SyncError) + Send>;

/// The location and constraints a view observes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewKey {
    /// Observed location.
    pub path: Path,
    /// Constraints.
    pub query: QueryParams,
}

pub(crate) struct Registration {
    pub(crate) handle: ListenerHandle,
    pub(crate) kind: EventKind,
    pub(crate) callback: EventCallback,
    pub(crate) cancel: Option<CancelCallback>,
    pub(crate) once: bool,
}

struct View {
    cache: Node,
    registrations: Vec<Registration>,
}

/// All active registrations, grouped by view.
pub(crate) struct ListenerRegistry {
    views: BTreeMap<ViewKey, View>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl ListenerRegistry {
    pub(crate) fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            views: BTreeMap::new(),
            dispatcher,
        }
    }

    /// Adds a registration and delivers its initial events from `current`,
    /// the unfiltered merged value at the view's path.
    ///
    /// Returns true if this created the view.
    pub(crate) fn register(&mut self, key: ViewKey, registration: Registration, current: &Node) -> bool {
        let created = !self.views.contains_key(&key);
        let view = self.views.entry(key.clone()).or_insert_with(|| View {
            cache: key.query.filter(current),
            registrations: Vec::new(),
        });
        debug!(handle = %registration.handle, path = %key.path, query = %key.query, kind = %registration.kind, "listener registered");

        let events = initial_events(registration.kind, &key.path, &view.cache);
        let delivered = deliver(self.dispatcher.as_ref(), &registration, &events);
        if !(registration.once && delivered) {
            view.registrations.push(registration);
        }
        if view.registrations.is_empty() {
            self.views.remove(&key);
            return false;
        }
        created
    }

    /// Removes one registration. Returns the view key if the view closed.
    pub(crate) fn unregister(&mut self, handle: ListenerHandle) -> Option<ViewKey> {
        let key = self
            .views
            .iter()
            .find(|(_, view)| view.registrations.iter().any(|r| r.handle == handle))
            .map(|(key, _)| key.clone())?;
        let view = self.views.get_mut(&key)?;
        view.registrations.retain(|r| r.handle != handle);
        debug!(%handle, path = %key.path, "listener removed");
        if view.registrations.is_empty() {
            self.views.remove(&key);
            Some(key)
        } else {
            None
        }
    }

    /// Removes every registration at `path`, whatever its query. Returns
    /// the closed views.
    pub(crate) fn unregister_all(&mut self, path: &Path) -> Vec<ViewKey> {
        let closed: Vec<ViewKey> = self
            .views
            .keys()
            .filter(|key| &key.path == path)
            .cloned()
            .collect();
        for key in &closed {
            self.views.remove(key);
        }
        debug!(%path, views = closed.len(), "all listeners removed");
        closed
    }

    /// Recomputes every view overlapping `changed` and delivers the
    /// differences. `read` returns the unfiltered merged value at a path.
    pub(crate) fn refresh(&mut self, changed: &Path, read: impl Fn(&Path) -> Node) -> Vec<ViewKey> {
        let mut closed = Vec::new();
        for (key, view) in self.views.iter_mut() {
            if !key.path.overlaps(changed) {
                continue;
            }
            let updated = key.query.filter(&read(&key.path));
            let events = diff(&key.path, &view.cache, &updated);
            view.cache = updated;
            if events.is_empty() {
                continue;
            }
            trace!(path = %key.path, query = %key.query, events = events.len(), "delivering events");
            view.registrations.retain(|registration| {
                let delivered = deliver(self.dispatcher.as_ref(), registration, &events);
                !(registration.once && delivered)
            });
            if view.registrations.is_empty() {
                closed.push(key.clone());
            }
        }
        for key in &closed {
            self.views.remove(key);
        }
        closed
    }

    /// Drops a view, telling each of its listeners once.
    pub(crate) fn revoke(&mut self, key: &ViewKey, error: SyncError) -> bool {
        let Some(view) = self.views.remove(key) else {
            return false;
        };
        debug!(path = %key.path, query = %key.query, listeners = view.registrations.len(), %error, "listen revoked");
        for registration in view.registrations {
            if let Some(cancel) = registration.cancel {
                let error = error.clone();
                self.dispatcher.dispatch(Box::new(move || cancel(error)));
            }
        }
        true
    }

    /// Keys of every open view.
    pub(crate) fn keys(&self) -> Vec<ViewKey> {
        self.views.keys().cloned().collect()
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.views.values().map(|v| v.registrations.len()).sum()
    }
}

/// Hands the events matching a registration to the dispatcher. A `once`
/// registration receives at most one. Returns true if anything was sent.
fn deliver(dispatcher: &dyn Dispatcher, registration: &Registration, events: &[Event]) -> bool {
    let mut delivered = false;
    for event in events.iter().filter(|e| e.kind == registration.kind) {
        let callback = Arc::clone(&registration.callback);
        let event = event.clone();
        dispatcher.dispatch(Box::new(move || callback(event)));
        delivered = true;
        if registration.once {
            break;
        }
    }
    delivered
}
