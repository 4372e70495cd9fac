//! Execution contexts for listener callbacks.
//!
//! The engine computes events on its own task and hands each callback
//! invocation to a [`Dispatcher`] as a job. Dispatchers must run jobs in
//! the order they receive them, which keeps delivery FIFO per listener.

use std::fmt;
use tokio::sync::mpsc;

/// A callback invocation ready to run.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs callback jobs, in submission order.
pub trait Dispatcher: Send + Sync + fmt::Debug {
    /// Schedules a job.
    fn dispatch(&self, job: Job);
}

/// Runs callbacks directly on the engine task.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn dispatch(&self, job: Job) {
        job();
    }
}

/// Runs callbacks on a dedicated Tokio task, one at a time.
///
/// Slow callbacks then never hold up the engine.
pub struct TaskDispatcher {
    jobs: mpsc::UnboundedSender<Job>,
}

impl TaskDispatcher {
    /// Spawns the callback task. Must be called within a Tokio runtime.
    pub fn spawn() -> Self {
        let (jobs, mut rx) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job();
            }
        });
        Self { jobs }
    }
}

impl fmt::Debug for TaskDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDispatcher").finish_non_exhaustive()
    }
}

impl Dispatcher for TaskDispatcher {
    fn dispatch(&self, job: Job) {
        if self.jobs.send(job).is_err() {
            tracing::warn!("callback task has stopped; dropping callback");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn inline_runs_immediately() {
        let hits = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&hits);
        InlineDispatcher.dispatch(Box::new(move || *counter.lock() += 1));
        assert_eq!(*hits.lock(), 1);
    }

    #[tokio::test]
    async fn task_dispatcher_preserves_order() {
        let dispatcher = TaskDispatcher::spawn();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        for i in 0..100 {
            let seen = Arc::clone(&seen);
            dispatcher.dispatch(Box::new(move || seen.lock().push(i)));
        }
        dispatcher.dispatch(Box::new(move || {
            let _ = done_tx.send(());
        }));

        done_rx.await.unwrap();
        assert_eq!(*seen.lock(), (0..100).collect::<Vec<_>>());
    }
}
