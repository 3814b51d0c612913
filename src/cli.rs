// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `parexec`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "parexec",
    version,
    about = "Run a batch of commands in parallel with a concurrency limit.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the batch file (TOML).
    ///
    /// Default: `Parexec.toml` in the current working directory. Ignored
    /// when `--cmd` is given.
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Command line to run through the shell. May be repeated; commands get
    /// the ids `cmd-1`, `cmd-2`, ...
    #[arg(long = "cmd", value_name = "LINE")]
    pub commands: Vec<String>,

    /// Max number of commands running at once.
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// How often running commands are checked for exit.
    #[arg(long, value_name = "MS")]
    pub poll_interval_ms: Option<u64>,

    /// Per-command timeout in seconds (0 disables).
    #[arg(long, value_name = "SEC")]
    pub timeout: Option<f64>,

    /// Stop every command as soon as one exits non-zero.
    #[arg(long)]
    pub stop_on_failure: bool,

    /// Parse + validate, print the batch, but don't execute any commands.
    #[arg(long)]
    pub dry_run: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `PAREXEC_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
