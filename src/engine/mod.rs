// src/engine/mod.rs

//! Process scheduling engine.
//!
//! This module ties together:
//! - the pending queue of a submitted batch (started front to back)
//! - admission control (at most `concurrency_limit` live processes)
//! - the liveness sweep that notices exits and fires exit hooks
//! - cancellation of single commands or the whole batch
//!
//! Nothing here blocks: all waiting is a callback scheduled on a
//! [`crate::driver::Driver`]. Bookkeeping lives in [`state`]; the public
//! surface and the timer-driven loops are in [`scheduler`].

pub mod scheduler;
pub mod state;

pub use scheduler::Scheduler;

/// Lifecycle of one command inside a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Waiting in the pending queue.
    Queued,
    /// Popped from the queue; the process is being created/started.
    Starting,
    Running,
    /// A stop was requested and the exit has not been observed yet.
    StopRequested,
    Exited,
    /// Cancelled (or the batch was stopped) before it ever started.
    SkippedByCancellation,
    StartFailed,
}

/// What a stop request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// A stop was sent to at least one running process (or, for
    /// `stop_all`, the batch was marked stopped).
    Requested,
    /// The command has not started yet and will be skipped.
    Deferred,
    /// Nothing to do: already stopped, already stopping, finished, or
    /// unknown.
    NoOp,
}

/// Final result for one command of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The process ran and exited; `None` when the exit code is unknown.
    Exited(Option<i32>),
    SkippedByCancellation,
    StartFailed(String),
}

impl CommandOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CommandOutcome::Exited(Some(0)))
    }
}
