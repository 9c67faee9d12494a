//! Handles to requests running on their own worker thread.

use futures::channel::oneshot;
use serde::Serialize;
use std::{
    future::Future,
    path::PathBuf,
    pin::Pin,
    task::{Context, Poll},
    thread::{self, JoinHandle},
    time::Duration,
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("Could not start worker thread: {0}")]
    Spawn(String),

    #[error("Worker thread panicked before finishing")]
    WorkerPanicked,
}

/// Outcome of one request once every series has been handled.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub series_total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Files written, in series order.
    pub outputs: Vec<PathBuf>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Completion handle of a background request.
///
/// Requests cannot be cancelled; dropping the handle detaches the worker,
/// which still runs to completion and keeps emitting events.
/// Awaiting the handle (or calling [`TaskHandle::wait`]) yields the
/// [`RunReport`], or [`TaskError::WorkerPanicked`] if the worker died.
pub struct TaskHandle {
    thread: JoinHandle<()>,
    done: oneshot::Receiver<RunReport>,
}

impl TaskHandle {
    pub(crate) fn spawn<F>(name: &str, work: F) -> Result<Self, TaskError>
    where
        F: FnOnce() -> RunReport + Send + 'static,
    {
        let (tx, done) = oneshot::channel();
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let report = work();
                // The handle may already be gone.
                let _ = tx.send(report);
            })
            .map_err(|err| TaskError::Spawn(err.to_string()))?;

        Ok(Self { thread, done })
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Block the calling thread until the request completes.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker panicked.
    pub fn wait(self) -> Result<RunReport, TaskError> {
        futures::executor::block_on(self)
    }
}

impl Future for TaskHandle {
    type Output = Result<RunReport, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.done)
            .poll(cx)
            .map(|result| result.map_err(|_| TaskError::WorkerPanicked))
    }
}
