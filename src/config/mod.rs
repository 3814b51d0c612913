// src/config/mod.rs

//! Configuration: scheduler tunables, lifecycle hooks, and the TOML batch
//! file format.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{
    BeforeStartHook, CommandConfig, ConfigFile, ConfigSection, ExitHook, Hooks, RawConfigFile,
    SchedulerConfig, StreamReadHook,
};
