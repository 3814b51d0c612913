// src/driver/mod.rs

//! Cooperative timer driver.
//!
//! The scheduler never blocks or sleeps itself: every wait is expressed as
//! "run this callback again after N milliseconds" through a [`Driver`].
//! Production code uses [`TokioDriver`]; tests use the virtual-clock driver
//! from the test-utils crate.

mod tokio_timer;

use std::time::Duration;

pub use tokio_timer::TokioDriver;

/// Deferred unit of work.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Schedules callbacks to run later without blocking the caller.
pub trait Driver: Send + Sync {
    /// Run `callback` once, no earlier than `delay` from now.
    ///
    /// Callbacks with shorter delays run first; there is no ordering
    /// guarantee beyond that.
    fn schedule_after(&self, delay: Duration, callback: Callback);
}
