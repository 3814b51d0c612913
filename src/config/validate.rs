// src/config/validate.rs

use std::collections::HashSet;

use crate::config::model::{CommandConfig, ConfigFile, RawConfigFile};
use crate::errors::{ParexecError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::ParexecError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.config, raw.command))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_commands(cfg)?;
    validate_global_config(cfg)?;
    validate_unique_ids(cfg)?;
    for command in &cfg.command {
        validate_command(command)?;
    }
    Ok(())
}

fn ensure_has_commands(cfg: &RawConfigFile) -> Result<()> {
    if cfg.command.is_empty() {
        return Err(ParexecError::ConfigError(
            "config must contain at least one [[command]] entry".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.concurrency_limit == 0 {
        return Err(ParexecError::ConfigError(
            "[config].concurrency_limit must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.config.poll_interval_ms == 0 {
        return Err(ParexecError::ConfigError(
            "[config].poll_interval_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    if let Some(timeout) = cfg.config.process_timeout_sec {
        check_seconds("[config].process_timeout_sec", timeout)?;
    }
    check_seconds("[config].stop_timeout_sec", cfg.config.stop_timeout_sec)?;
    Ok(())
}

fn validate_unique_ids(cfg: &RawConfigFile) -> Result<()> {
    let mut seen = HashSet::new();
    for command in &cfg.command {
        if command.id.trim().is_empty() {
            return Err(ParexecError::ConfigError(
                "every [[command]] needs a non-empty `id`".to_string(),
            ));
        }
        if !seen.insert(command.id.as_str()) {
            return Err(ParexecError::ConfigError(format!(
                "duplicate command id '{}'",
                command.id
            )));
        }
    }
    Ok(())
}

fn validate_command(command: &CommandConfig) -> Result<()> {
    match (&command.cmd, &command.argv) {
        (Some(_), Some(_)) => {
            return Err(ParexecError::ConfigError(format!(
                "command '{}' sets both `cmd` and `argv`; pick one",
                command.id
            )));
        }
        (None, None) => {
            return Err(ParexecError::ConfigError(format!(
                "command '{}' needs either `cmd` or `argv`",
                command.id
            )));
        }
        (Some(cmd), None) if cmd.trim().is_empty() => {
            return Err(ParexecError::ConfigError(format!(
                "command '{}' has an empty `cmd`",
                command.id
            )));
        }
        (None, Some(argv)) if argv.first().is_none_or(|p| p.is_empty()) => {
            return Err(ParexecError::ConfigError(format!(
                "command '{}' has an empty `argv`",
                command.id
            )));
        }
        _ => {}
    }

    if let Some(timeout) = command.timeout_sec {
        check_seconds(&format!("command '{}' timeout_sec", command.id), timeout)?;
    }
    Ok(())
}

fn check_seconds(what: &str, secs: f64) -> Result<()> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(ParexecError::ConfigError(format!(
            "{what} must be a non-negative number of seconds (got {secs})"
        )));
    }
    Ok(())
}
