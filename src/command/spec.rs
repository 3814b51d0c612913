// src/command/spec.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::exec::CommandLine;

/// Description of one command to run.
///
/// The argument list is authoritative unless the spec is marked as
/// shell-escaped, in which case the arguments are joined with single spaces
/// and handed to the platform shell untouched.
///
/// ```
/// use parexec::command::CommandSpec;
///
/// let spec = CommandSpec::from_string("ls -la /tmp").with_cwd("/");
/// assert_eq!(spec.arguments(), ["ls", "-la", "/tmp"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    arguments: Vec<String>,
    shell_escaped: bool,
    cwd: Option<PathBuf>,
    env: Option<BTreeMap<String, String>>,
    input: Option<Vec<u8>>,
    timeout: Option<Duration>,
}

impl CommandSpec {
    /// Build a spec from a pre-split argument list.
    pub fn new<I, S>(arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            arguments: arguments.into_iter().map(Into::into).collect(),
            shell_escaped: false,
            cwd: None,
            env: None,
            input: None,
            timeout: None,
        }
    }

    /// Build a spec by splitting `line` on whitespace.
    ///
    /// No quoting rules apply. Commands that need literal spaces or shell
    /// metacharacters should use [`CommandSpec::shell`] instead.
    pub fn from_string(line: &str) -> Self {
        Self::new(line.split_whitespace())
    }

    /// Build a spec from a single, already escaped shell line.
    pub fn shell(line: impl Into<String>) -> Self {
        Self::new([line.into()]).as_shell_escaped(true)
    }

    /// Mark the arguments as already escaped for the shell.
    pub fn as_shell_escaped(mut self, shell_escaped: bool) -> Self {
        self.shell_escaped = shell_escaped;
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Replace the extra environment for this command.
    ///
    /// The variables are applied on top of the inherited environment.
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn with_env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Bytes written to the command's stdin, which is closed afterwards.
    pub fn with_input(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.input = Some(input.into());
        self
    }

    /// Per-command timeout; `None` falls back to the configured default.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    /// The arguments joined with single spaces.
    pub fn command_string(&self) -> String {
        self.arguments.join(" ")
    }

    pub fn is_shell_escaped(&self) -> bool {
        self.shell_escaped
    }

    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub fn env(&self) -> Option<&BTreeMap<String, String>> {
        self.env.as_ref()
    }

    pub fn input(&self) -> Option<&[u8]> {
        self.input.as_deref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The representation the process adapter should launch.
    pub fn command_line(&self) -> CommandLine {
        if self.shell_escaped {
            CommandLine::Shell(self.command_string())
        } else {
            CommandLine::Argv(self.arguments.clone())
        }
    }
}
