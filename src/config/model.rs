// src/config/model.rs

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::command::{Batch, CommandSpec};
use crate::engine::Scheduler;
use crate::exec::ProcessHandle;
use crate::types::StreamKind;

/// Called after a handle is created and before it is started.
pub type BeforeStartHook =
    Arc<dyn Fn(&Scheduler, &dyn ProcessHandle, &CommandSpec, &str) + Send + Sync>;

/// Called once per started command after it exits. `None` means the exit
/// code is unknown.
pub type ExitHook =
    Arc<dyn Fn(&dyn ProcessHandle, Option<i32>, &Scheduler, &CommandSpec, &str) + Send + Sync>;

/// Called for every chunk of output read from a running command.
pub type StreamReadHook = Arc<
    dyn Fn(StreamKind, &[u8], &Scheduler, &dyn ProcessHandle, &CommandSpec, &str) + Send + Sync,
>;

/// Optional lifecycle callbacks.
#[derive(Clone, Default)]
pub struct Hooks {
    pub on_before_start: Option<BeforeStartHook>,
    pub on_exit: Option<ExitHook>,
    pub on_stream_read: Option<StreamReadHook>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_before_start", &self.on_before_start.is_some())
            .field("on_exit", &self.on_exit.is_some())
            .field("on_stream_read", &self.on_stream_read.is_some())
            .finish()
    }
}

/// Tunables read by the scheduler.
///
/// ```
/// use std::time::Duration;
/// use parexec::config::SchedulerConfig;
///
/// let cfg = SchedulerConfig::default()
///     .with_concurrency_limit(4)
///     .with_poll_interval(Duration::from_millis(20));
/// assert_eq!(cfg.concurrency_limit, 4);
/// ```
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Max number of processes alive at once. Clamped to at least 1.
    pub concurrency_limit: usize,
    /// Default per-process timeout for specs that carry none.
    pub process_timeout: Option<Duration>,
    /// Liveness sweep interval, and start-tick interval while saturated.
    pub poll_interval: Duration,
    /// Delay for "as soon as possible" work (first tick, exit callbacks).
    pub fast_retry_interval: Duration,
    /// Grace period used by callers that stop commands without picking one.
    pub stop_timeout: Duration,
    pub hooks: Hooks,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 10,
            process_timeout: None,
            poll_interval: Duration::from_millis(70),
            fast_retry_interval: Duration::from_millis(10),
            stop_timeout: Duration::from_secs(10),
            hooks: Hooks::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn with_process_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.process_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_fast_retry_interval(mut self, interval: Duration) -> Self {
        self.fast_retry_interval = interval;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn on_before_start<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Scheduler, &dyn ProcessHandle, &CommandSpec, &str) + Send + Sync + 'static,
    {
        self.hooks.on_before_start = Some(Arc::new(hook));
        self
    }

    pub fn on_exit<F>(mut self, hook: F) -> Self
    where
        F: Fn(&dyn ProcessHandle, Option<i32>, &Scheduler, &CommandSpec, &str)
            + Send
            + Sync
            + 'static,
    {
        self.hooks.on_exit = Some(Arc::new(hook));
        self
    }

    pub fn on_stream_read<F>(mut self, hook: F) -> Self
    where
        F: Fn(StreamKind, &[u8], &Scheduler, &dyn ProcessHandle, &CommandSpec, &str)
            + Send
            + Sync
            + 'static,
    {
        self.hooks.on_stream_read = Some(Arc::new(hook));
        self
    }
}

/// Batch file as read from TOML, before validation.
///
/// ```toml
/// [config]
/// concurrency_limit = 4
/// poll_interval_ms = 70
///
/// [[command]]
/// id = "list"
/// cmd = "ls -la /tmp"
///
/// [[command]]
/// id = "grep"
/// cmd = "grep -rn 'needle' /var | head"
/// shell = true
/// ```
///
/// All sections are optional at this stage; validation rejects a file with
/// no commands.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    /// `[[command]]` entries, in start order.
    #[serde(default)]
    pub command: Vec<CommandConfig>,
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Default timeout for commands without `timeout_sec`. No timeout when
    /// absent.
    #[serde(default)]
    pub process_timeout_sec: Option<f64>,

    /// Grace period between the stop signal and SIGKILL.
    #[serde(default = "default_stop_timeout_sec")]
    pub stop_timeout_sec: f64,

    /// Stop the whole batch as soon as one command exits non-zero.
    #[serde(default)]
    pub stop_on_failure: bool,
}

fn default_concurrency_limit() -> usize {
    10
}

fn default_poll_interval_ms() -> u64 {
    70
}

fn default_stop_timeout_sec() -> f64 {
    10.0
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency_limit(),
            poll_interval_ms: default_poll_interval_ms(),
            process_timeout_sec: None,
            stop_timeout_sec: default_stop_timeout_sec(),
            stop_on_failure: false,
        }
    }
}

/// One `[[command]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandConfig {
    pub id: String,

    /// Command line split on whitespace, or passed to the shell verbatim
    /// when `shell = true`. Mutually exclusive with `argv`.
    #[serde(default)]
    pub cmd: Option<String>,

    #[serde(default)]
    pub argv: Option<Vec<String>>,

    #[serde(default)]
    pub shell: bool,

    #[serde(default)]
    pub cwd: Option<PathBuf>,

    #[serde(default)]
    pub env: Option<BTreeMap<String, String>>,

    /// Text written to stdin.
    #[serde(default)]
    pub input: Option<String>,

    #[serde(default)]
    pub timeout_sec: Option<f64>,
}

impl CommandConfig {
    pub fn to_spec(&self) -> CommandSpec {
        let mut spec = match (&self.argv, &self.cmd) {
            (Some(argv), _) => CommandSpec::new(argv.iter().cloned()).as_shell_escaped(self.shell),
            (None, Some(cmd)) if self.shell => CommandSpec::shell(cmd.clone()),
            (None, Some(cmd)) => CommandSpec::from_string(cmd),
            (None, None) => CommandSpec::new(Vec::<String>::new()),
        };
        if let Some(cwd) = &self.cwd {
            spec = spec.with_cwd(cwd.clone());
        }
        if let Some(env) = &self.env {
            spec = spec.with_env(env.clone());
        }
        if let Some(input) = &self.input {
            spec = spec.with_input(input.clone());
        }
        spec.with_timeout(self.timeout_sec.and_then(secs_to_duration))
    }
}

pub(crate) fn secs_to_duration(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}

/// Validated batch file.
///
/// Only constructible through `TryFrom<RawConfigFile>` (see `validate.rs`).
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub command: Vec<CommandConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(config: ConfigSection, command: Vec<CommandConfig>) -> Self {
        Self { config, command }
    }

    pub fn batch(&self) -> Batch {
        self.command
            .iter()
            .map(|c| (c.id.clone(), c.to_spec()))
            .collect()
    }

    /// Scheduler tunables from `[config]`, without hooks.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        let defaults = SchedulerConfig::default();
        SchedulerConfig {
            concurrency_limit: self.config.concurrency_limit,
            process_timeout: self.config.process_timeout_sec.and_then(secs_to_duration),
            poll_interval: Duration::from_millis(self.config.poll_interval_ms),
            stop_timeout: secs_to_duration(self.config.stop_timeout_sec)
                .unwrap_or(defaults.stop_timeout),
            ..defaults
        }
    }
}
