// src/driver/tokio_timer.rs

use std::fmt;
use std::time::Duration;

use tokio::runtime::Handle;

use super::{Callback, Driver};

/// Driver backed by `tokio::time::sleep` on a captured runtime handle.
#[derive(Clone)]
pub struct TokioDriver {
    runtime: Handle,
}

impl fmt::Debug for TokioDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioDriver").finish_non_exhaustive()
    }
}

impl TokioDriver {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Capture the runtime the caller is running on.
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl Driver for TokioDriver {
    fn schedule_after(&self, delay: Duration, callback: Callback) {
        self.runtime.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            callback();
        });
    }
}
