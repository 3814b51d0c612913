// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParexecError {
    /// `exec` was called while a previous batch still has work in flight.
    #[error(
        "can't run new processes while current processes have not exited \
         ({running} running, {pending} pending)"
    )]
    AlreadyRunning { running: usize, pending: usize },

    /// A single command could not be created or started.
    #[error("failed to start command [{command}]: {reason}")]
    Spawn { command: String, reason: String },

    /// Querying a process status or exit code failed.
    #[error("process status query failed: {0}")]
    AdapterStatus(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),
}

impl ParexecError {
    pub(crate) fn spawn(command: impl Into<String>, reason: impl ToString) -> Self {
        ParexecError::Spawn {
            command: command.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ParexecError>;
