// src/exec/mod.rs

//! Process execution layer.
//!
//! This module is responsible for actually running the commands handed out
//! by the scheduler, using `tokio::process::Command`, behind a small trait
//! seam so the scheduler can be driven by fakes in tests.
//!
//! - [`adapter`] provides the [`ProcessAdapter`] / [`ProcessHandle`] traits
//!   and the [`SpawnRequest`] they consume.
//! - [`status`] holds the sticky exit-status shim every handle relies on.
//! - [`child`] provides [`ChildProcessAdapter`], the real implementation
//!   used in production.

pub mod adapter;
pub mod child;
pub mod status;

pub use adapter::{
    CommandLine, DEFAULT_STOP_SIGNAL, OutputSink, ProcessAdapter, ProcessHandle, SpawnRequest,
};
pub use child::{ChildProcess, ChildProcessAdapter};
pub use status::{ProcessStatus, RawStatus, StatusProbe, StickyStatus};
