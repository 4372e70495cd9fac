//! One-shot outcomes of asynchronous operations.

use crate::error::{SyncError, SyncResult};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Resolves once with the outcome of an operation.
///
/// Dropping a `Completion` does not cancel the operation; it only discards
/// its outcome.
#[derive(Debug)]
#[must_use = "a completion does nothing unless awaited, but dropping it is allowed"]
pub struct Completion<T> {
    rx: oneshot::Receiver<SyncResult<T>>,
}

impl<T> Completion<T> {
    /// Returns a completion that is already resolved.
    pub fn ready(result: SyncResult<T>) -> Self {
        let (completer, completion) = channel();
        completer.complete(result);
        completion
    }
}

impl<T> Future for Completion<T> {
    type Output = SyncResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(SyncError::EngineClosed)))
    }
}

/// The sending half of a [`Completion`].
#[derive(Debug)]
pub(crate) struct Completer<T> {
    tx: oneshot::Sender<SyncResult<T>>,
}

impl<T> Completer<T> {
    /// Resolves the completion. Ignored if it was dropped.
    pub(crate) fn complete(self, result: SyncResult<T>) {
        let _ = self.tx.send(result);
    }
}

/// Creates a linked completer and completion.
pub(crate) fn channel<T>() -> (Completer<T>, Completion<T>) {
    let (tx, rx) = oneshot::channel();
    (Completer { tx }, Completion { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_with_sent_value() {
        let (completer, completion) = channel::<u32>();
        completer.complete(Ok(7));
        assert_eq!(completion.await, Ok(7));
    }

    #[tokio::test]
    async fn dropped_completer_reports_closed() {
        let (completer, completion) = channel::<()>();
        drop(completer);
        assert_eq!(completion.await, Err(SyncError::EngineClosed));
    }

    #[tokio::test]
    async fn ready_is_immediate() {
        let completion = Completion::<()>::ready(Err(SyncError::Disconnected));
        assert_eq!(completion.await, Err(SyncError::Disconnected));
    }
}
