//! Error types and the task-failure sink.

use std::fmt;

use crate::event_loop::TaskId;

/// Errors returned by scheduling and lifecycle operations on the event loop.
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    /// `start` was called on a loop that already ran.
    #[error("the event loop was already started")]
    AlreadyStarted,
    /// The loop is draining after a stop request and accepts no new tasks.
    #[error("the event loop is stopping and no longer accepts tasks")]
    Stopping,
    /// The loop has terminated; scheduling is permanently unavailable.
    #[error("the event loop has terminated")]
    Terminated,
    /// The OS refused to spawn the loop thread.
    #[error("failed to spawn the event loop thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// A failure observed at the event-loop dispatch boundary.
///
/// Task callbacks are independent; a failure is reported through the
/// configured [`TaskErrorSink`] and the loop moves on to the next task.
#[derive(Debug)]
pub enum TaskFailure {
    /// A task callback panicked; the panic was caught at the loop boundary.
    Panic {
        /// The id of the offending task.
        task: TaskId,
        /// The stringified panic payload.
        message: String,
    },
    /// Building the loop-owned state failed; the loop terminated before
    /// dispatching any task.
    Init {
        /// The initialization error.
        message: String,
    },
    /// A hosted callback reported an error it could not deliver anywhere
    /// else (e.g. an uncaught guest exception inside a timer callback).
    Callback {
        /// Which callback surface produced the error.
        context: &'static str,
        /// The error text.
        message: String,
    },
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskFailure::Panic { task, message } => {
                write!(f, "task {task} panicked: {message}")
            }
            TaskFailure::Init { message } => {
                write!(f, "event loop initialization failed: {message}")
            }
            TaskFailure::Callback { context, message } => {
                write!(f, "uncaught error in {context}: {message}")
            }
        }
    }
}

/// Receives every failure the loop catches at its dispatch boundary.
///
/// The default sink writes to standard error; tests install a collecting
/// sink instead.
pub trait TaskErrorSink: Send + Sync {
    /// Report one failure. Must not panic.
    fn report(&self, failure: &TaskFailure);
}

/// The default sink: one line per failure on standard error.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrSink;

impl TaskErrorSink for StderrSink {
    fn report(&self, failure: &TaskFailure) {
        eprintln!("dougless: {failure}");
    }
}
