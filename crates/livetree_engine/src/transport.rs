//! Transport layer abstraction.

use crate::error::{SyncError, SyncResult};
use livetree_protocol::Request;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// A transport carries requests to the authority.
///
/// Sending only hands the request over; acknowledgements, data updates and
/// connectivity changes come back through the engine's
/// [`SessionSink`](livetree_protocol::SessionSink) handle. This trait
/// abstracts the network layer, allowing for different implementations
/// (WebSocket, long polling, in-memory for testing, etc.).
///
/// `send` is called from the engine task and must not block.
pub trait Transport: Send + Sync {
    /// Hands a request to the transport.
    fn send(&self, request: Request) -> SyncResult<()>;
}

/// A transport that records requests for inspection.
#[derive(Debug, Default)]
pub struct MockTransport {
    failing: AtomicBool,
    sent: Mutex<Vec<Request>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following `send` fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Returns every request sent so far.
    pub fn sent(&self) -> Vec<Request> {
        self.sent.lock().clone()
    }

    /// Returns and forgets the requests sent so far.
    pub fn take_sent(&self) -> Vec<Request> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Returns the most recent request.
    pub fn last(&self) -> Option<Request> {
        self.sent.lock().last().cloned()
    }
}

impl Transport for MockTransport {
    fn send(&self, request: Request) -> SyncResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SyncError::transport_retryable("mock transport failing"));
        }
        self.sent.lock().push(request);
        Ok(())
    }
}
