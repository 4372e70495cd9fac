//! # livetree engine
//!
//! Client synchronization engine for a realtime hierarchical data store.
//!
//! This crate provides:
//! - A merged local view (server data plus optimistic writes)
//! - Ordered, filtered views with listener registration
//! - Child added, changed, removed and moved events with previous sibling names
//! - Optimistic writes with completions, revert on rejection and resend on reconnect
//! - Compare-and-set transactions with bounded retries
//! - Disconnect actions registered with the authority
//! - A connection state machine driving resynchronization
//!
//! ## Architecture
//!
//! One Tokio task owns all client state. Every public handle enqueues a
//! command, and the transport delivers server messages through the same
//! queue, so all state changes are serialized. Callbacks run through a
//! [`Dispatcher`], inline on the engine task by default.
//!
//! ## Key Invariants
//!
//! - The visible value at a path is the server value with every pending
//!   visible write applied in write order
//! - Every event batch for one change is dispatched before the next change
//! - Each completion resolves exactly once
//! - Each cancel callback runs at most once
//! - After reconnecting, writes are resent in their original order

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod completion;
mod config;
mod connection;
mod disconnect;
mod dispatcher;
mod engine;
mod error;
mod events;
mod push_id;
mod reference;
mod registry;
mod repo;
mod snapshot;
mod transaction;
mod transport;
mod tree;
mod writes;

pub use completion::Completion;
pub use config::{EngineConfig, TransactionConfig};
pub use disconnect::DisconnectKind;
pub use dispatcher::{Dispatcher, InlineDispatcher, Job, TaskDispatcher};
pub use engine::{Engine, EngineHandle};
pub use error::{SyncError, SyncResult};
pub use events::{Event, EventKind};
pub use push_id::PushIdGenerator;
pub use reference::{OnDisconnect, Query, Reference};
pub use registry::{CancelCallback, EventCallback, ListenerHandle, ViewKey};
pub use snapshot::{DataSnapshot, MutableData, TransactionOutcome, TransactionResult};
pub use transaction::Transform;
pub use transport::{MockTransport, Transport};
pub use tree::{SyncTree, WriteId, WriteOp};
pub use writes::WriteKind;

pub use livetree_data::{Node, Path, Priority, QueryParams};
pub use livetree_protocol::ConnectionState;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
