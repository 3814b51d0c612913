// src/exec/status.rs

//! Sticky exit-status tracking.
//!
//! Some process primitives only report the real exit code on the first
//! status query after the child exits; later queries on the already reaped
//! process return an invalid value (-1) or fail outright. [`StickyStatus`]
//! sits between the raw query ([`StatusProbe`]) and the rest of the crate:
//! the first valid (`>= 0`) exit code it sees is cached and returned from
//! then on, and a process seen as exited is never reported running again.

use std::io;
use std::process::ExitStatus;

/// Exit code reported when the OS gives no usable value.
pub const UNKNOWN_EXIT_CODE: i32 = -1;

/// One raw observation from the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawStatus {
    pub running: bool,
    /// `UNKNOWN_EXIT_CODE` (or any negative value) when not available.
    pub exit_code: i32,
}

impl RawStatus {
    pub fn running() -> Self {
        Self {
            running: true,
            exit_code: UNKNOWN_EXIT_CODE,
        }
    }

    pub fn exited(exit_code: i32) -> Self {
        Self {
            running: false,
            exit_code,
        }
    }
}

/// Normalised view handed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    Exited(Option<i32>),
}

/// Raw, possibly forgetful, status query.
pub trait StatusProbe {
    fn probe(&mut self) -> io::Result<RawStatus>;
}

impl StatusProbe for tokio::process::Child {
    fn probe(&mut self) -> io::Result<RawStatus> {
        Ok(match self.try_wait()? {
            None => RawStatus::running(),
            Some(status) => RawStatus::exited(exit_code_of(status)),
        })
    }
}

/// Map an `ExitStatus` to a single integer.
///
/// A child killed by signal `N` reports `128 + N`, like a POSIX shell does.
pub fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    UNKNOWN_EXIT_CODE
}

#[derive(Debug, Clone, Default)]
pub struct StickyStatus {
    exited: bool,
    exit_code: Option<i32>,
}

impl StickyStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Query `probe` and fold the answer into the cached state.
    ///
    /// A failing probe on a process already known to have exited is not an
    /// error: the cached answer is returned instead.
    pub fn refresh<P: StatusProbe + ?Sized>(&mut self, probe: &mut P) -> io::Result<ProcessStatus> {
        let raw = match probe.probe() {
            Ok(raw) => raw,
            Err(_) if self.exited => return Ok(self.current()),
            Err(e) => return Err(e),
        };

        if self.exit_code.is_none() && raw.exit_code >= 0 {
            self.exit_code = Some(raw.exit_code);
        }
        if !raw.running {
            self.exited = true;
        }

        Ok(self.current())
    }

    /// Cached state without querying.
    pub fn current(&self) -> ProcessStatus {
        if self.exited {
            ProcessStatus::Exited(self.exit_code)
        } else {
            ProcessStatus::Running
        }
    }
}
