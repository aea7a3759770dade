//! Configuration module for the botkit runtime.
//!
//! This module provides TOML/YAML configuration loading and validation for
//! the bot identity, lifecycle bounds and logging.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    BotConfig, BotkitConfig, ErrorPolicy, LifecycleConfig, LogFormat, LogLevel, LogOutput,
    LogRotation, LoggingConfig, SpanEventConfig, StatusPersistence,
};
pub use validation::validate_config;
