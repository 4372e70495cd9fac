//! # livetree protocol
//!
//! Messages exchanged between a livetree client engine and the remote
//! authority.
//!
//! This crate provides:
//! - [`Request`] and [`Action`], everything a client asks of the authority
//! - [`ServerMessage`], everything the authority tells a client
//! - [`ServerError`], the rejection codes carried by acknowledgements
//! - [`SessionSink`], the seam through which a transport delivers messages
//!
//! Encoding is left to transports: this is a pure protocol crate with no I/O.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod message;
mod request;

pub use error::ServerError;
pub use message::{AckBody, ConnectionState, ServerMessage, SessionSink};
pub use request::{Action, Request, RequestId};
