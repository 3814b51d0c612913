// src/exec/adapter.rs

//! Pluggable process adapter abstraction.
//!
//! The scheduler talks to a [`ProcessAdapter`] instead of spawning OS
//! processes itself. This makes it easy to swap in a scripted fake in tests
//! while keeping the production implementation in [`super::child`].
//!
//! A handle goes through two phases: it is *created* from a
//! [`SpawnRequest`] (structural validation only, nothing is launched) and
//! then *started*. The gap between the two is where the before-start hook
//! runs and may adjust the request via [`ProcessHandle::configure`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::command::CommandSpec;
use crate::errors::{ParexecError, Result};
use crate::types::StreamKind;

/// Signal sent by `stop` when the caller does not pick one (SIGTERM).
pub const DEFAULT_STOP_SIGNAL: i32 = 15;

/// Receives output chunks as soon as the adapter reads them.
pub type OutputSink = Box<dyn Fn(StreamKind, &[u8]) + Send + Sync>;

/// What to launch: a program with arguments, or a line for the shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandLine {
    Argv(Vec<String>),
    Shell(String),
}

impl CommandLine {
    pub fn is_empty(&self) -> bool {
        match self {
            CommandLine::Argv(argv) => argv.first().is_none_or(|program| program.is_empty()),
            CommandLine::Shell(line) => line.trim().is_empty(),
        }
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandLine::Argv(argv) => {
                let escaped: Vec<String> = argv.iter().map(|a| escape_argument(a)).collect();
                f.write_str(&escaped.join(" "))
            }
            CommandLine::Shell(line) => f.write_str(line),
        }
    }
}

/// Quote an argument for display the way a POSIX shell would accept it.
pub fn escape_argument(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./=:,+@%".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Everything an adapter needs to build one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub command: CommandLine,
    pub cwd: Option<PathBuf>,
    /// Extra variables applied on top of the inherited environment.
    pub env: Option<BTreeMap<String, String>>,
    pub input: Option<Vec<u8>>,
    /// `None` or zero disables the timeout.
    pub timeout: Option<Duration>,
}

impl SpawnRequest {
    /// Build the request for `spec`, falling back to `default_timeout` when
    /// the spec carries none.
    pub fn from_spec(spec: &CommandSpec, default_timeout: Option<Duration>) -> Self {
        Self {
            command: spec.command_line(),
            cwd: spec.cwd().map(PathBuf::from),
            env: spec.env().cloned(),
            input: spec.input().map(<[u8]>::to_vec),
            timeout: spec.timeout().or(default_timeout),
        }
    }

    /// The timeout the adapter should enforce, if any.
    pub fn effective_timeout(&self) -> Option<Duration> {
        self.timeout.filter(|t| !t.is_zero())
    }

    /// Structural checks only; OS-level problems surface on start.
    pub fn validate(&self) -> Result<()> {
        if self.command.is_empty() {
            return Err(ParexecError::spawn(
                self.command.to_string(),
                "command line is empty",
            ));
        }
        if let Some(env) = &self.env {
            if let Some(bad) = env.keys().find(|k| k.is_empty() || k.contains('=')) {
                return Err(ParexecError::spawn(
                    self.command.to_string(),
                    format!("invalid environment variable name '{bad}'"),
                ));
            }
        }
        Ok(())
    }
}

/// Factory for process handles.
///
/// Production code uses [`super::ChildProcessAdapter`]; tests can provide
/// their own implementation that doesn't spawn real processes.
pub trait ProcessAdapter: Send + Sync {
    /// Build a not-yet-started handle, failing on structurally invalid
    /// requests.
    fn create(&self, request: SpawnRequest) -> Result<Arc<dyn ProcessHandle>>;
}

/// One process, before and after launch.
///
/// Every method must be non-blocking: the scheduler calls them from its
/// timer callbacks.
pub trait ProcessHandle: Send + Sync {
    /// Mutate the pending request. Fails once the process has started.
    fn configure(&self, edit: &mut dyn FnMut(&mut SpawnRequest)) -> Result<()>;

    /// Launch the process. `on_output` receives every chunk read from
    /// stdout/stderr.
    fn start(&self, on_output: Option<OutputSink>) -> Result<()>;

    /// Whether the process is still alive. Never true again once false.
    fn is_running(&self) -> bool;

    fn pid(&self) -> Option<u32>;

    /// Bytes produced on (stdout, stderr) since the previous call.
    fn read_incremental_output(&self) -> (Vec<u8>, Vec<u8>);

    /// Exit code of a finished process.
    ///
    /// `Ok(None)` while running or when the OS reported no usable code.
    /// Once a code has been returned, every later call returns the same one.
    fn exit_code(&self) -> Result<Option<i32>>;

    /// Request termination: send `signal` (default SIGTERM) now, force-kill
    /// if still alive after `timeout`. Returns immediately.
    fn stop(&self, timeout: Duration, signal: Option<i32>);

    /// Human readable command line, for diagnostics.
    fn command_line(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_leaves_plain_arguments_alone() {
        assert_eq!(escape_argument("--color=auto"), "--color=auto");
        assert_eq!(escape_argument("/usr/bin/env"), "/usr/bin/env");
    }

    #[test]
    fn escape_quotes_spaces_and_single_quotes() {
        assert_eq!(escape_argument("a b"), "'a b'");
        assert_eq!(escape_argument("it's"), r"'it'\''s'");
        assert_eq!(escape_argument(""), "''");
    }

    #[test]
    fn argv_display_is_escaped() {
        let line = CommandLine::Argv(vec!["grep".into(), "random string".into(), "/usr".into()]);
        assert_eq!(line.to_string(), "grep 'random string' /usr");
    }

    #[test]
    fn spec_timeout_wins_over_default() {
        let spec = CommandSpec::from_string("sleep 5").with_timeout(Some(Duration::from_secs(1)));
        let req = SpawnRequest::from_spec(&spec, Some(Duration::from_secs(60)));
        assert_eq!(req.timeout, Some(Duration::from_secs(1)));

        let spec = CommandSpec::from_string("sleep 5");
        let req = SpawnRequest::from_spec(&spec, Some(Duration::from_secs(60)));
        assert_eq!(req.timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn zero_timeout_is_disabled() {
        let spec = CommandSpec::from_string("true").with_timeout(Some(Duration::ZERO));
        let req = SpawnRequest::from_spec(&spec, None);
        assert_eq!(req.effective_timeout(), None);
    }

    #[test]
    fn empty_commands_are_rejected() {
        let empty_argv = SpawnRequest::from_spec(&CommandSpec::from_string(""), None);
        assert!(matches!(empty_argv.validate(), Err(ParexecError::Spawn { .. })));

        let empty_shell = SpawnRequest::from_spec(&CommandSpec::shell("  "), None);
        assert!(matches!(empty_shell.validate(), Err(ParexecError::Spawn { .. })));
    }

    #[test]
    fn bad_env_names_are_rejected() {
        let spec = CommandSpec::from_string("env").with_env_var("A=B", "1");
        let req = SpawnRequest::from_spec(&spec, None);
        match req.validate() {
            Err(ParexecError::Spawn { reason, .. }) => assert!(reason.contains("A=B")),
            other => panic!("expected Spawn error, got {other:?}"),
        }
    }
}
