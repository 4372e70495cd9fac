//! # livetree testkit
//!
//! Test utilities for livetree.
//!
//! This crate provides:
//! - [`MemoryServer`], an in-memory authority speaking the livetree protocol
//! - Property-based test generators using proptest
//! - Tracing setup and value helpers for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use livetree_testkit::prelude::*;
//!
//! let server = Arc::new(MemoryServer::new());
//! let session = server.open_session();
//! // route the engine's requests to `server.handle(session, request)`
//! server.connect(session, Arc::new(engine.handle()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod memory_server;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::memory_server::*;
}

pub use fixtures::*;
pub use generators::*;
pub use memory_server::{MemoryServer, SessionId};
