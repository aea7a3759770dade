//! Configuration schema definitions.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use botkit_core::BotIdentity;
use serde::{Deserialize, Serialize};

use super::error::{ConfigError, ConfigResult};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BotkitConfig {
    /// Bot identity, credentials and store location.
    #[serde(default)]
    pub bot: BotConfig,

    /// Lifecycle bounds and error policies.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

// =============================================================================
// Bot
// =============================================================================

/// Bot identity and backing services.
#[derive(Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Explicit identity. Derived from the token when absent.
    #[serde(default)]
    pub name: Option<String>,

    /// Platform credential handed to the dispatcher.
    #[serde(default)]
    pub token: Option<String>,

    /// Store location: `memory://` or `file://<dir>`.
    #[serde(default = "default_store_url")]
    pub store_url: String,

    /// Webhook URL reported in the status record once running.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: None,
            token: None,
            store_url: default_store_url(),
            webhook_url: None,
        }
    }
}

impl BotConfig {
    /// Resolves the bot identity: `name` if set, otherwise the token prefix.
    pub fn identity(&self) -> ConfigResult<BotIdentity> {
        match (&self.name, &self.token) {
            (Some(name), _) => Ok(BotIdentity::new(name.clone())?),
            (None, Some(token)) => Ok(BotIdentity::from_token(token)?),
            (None, None) => Err(ConfigError::missing("bot.name or bot.token")),
        }
    }
}

impl fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotConfig")
            .field("name", &self.name)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("store_url", &self.store_url)
            .field("webhook_url", &self.webhook_url)
            .finish()
    }
}

fn default_store_url() -> String {
    "memory://".to_string()
}

// =============================================================================
// Lifecycle
// =============================================================================

/// What the runtime does after a handler fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Report the error and keep processing updates.
    #[default]
    Continue,
    /// Report the error and request a graceful shutdown.
    Stop,
}

/// How status persistence failures are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusPersistence {
    /// Log and count the failure; the in-memory status stays authoritative.
    #[default]
    BestEffort,
    /// Surface the failure to the caller.
    Strict,
}

/// Lifecycle bounds and error policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Upper bound for dispatcher `initialize` + `start`.
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,

    /// Upper bound for draining in-flight updates on stop.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// Upper bound for a single state save.
    #[serde(default = "default_save_timeout_ms")]
    pub save_timeout_ms: u64,

    /// Periodic state checkpoint while running. Disabled when absent.
    #[serde(default)]
    pub checkpoint_interval_ms: Option<u64>,

    /// Reaction to handler errors.
    #[serde(default)]
    pub on_handler_error: ErrorPolicy,

    /// Reaction to status persistence failures.
    #[serde(default)]
    pub status_persistence: StatusPersistence,

    /// Reply sent when a handler fails.
    #[serde(default = "default_failure_reply")]
    pub failure_reply: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            startup_timeout_ms: default_startup_timeout_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
            save_timeout_ms: default_save_timeout_ms(),
            checkpoint_interval_ms: None,
            on_handler_error: ErrorPolicy::default(),
            status_persistence: StatusPersistence::default(),
            failure_reply: default_failure_reply(),
        }
    }
}

impl LifecycleConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn save_timeout(&self) -> Duration {
        Duration::from_millis(self.save_timeout_ms)
    }

    pub fn checkpoint_interval(&self) -> Option<Duration> {
        self.checkpoint_interval_ms.map(Duration::from_millis)
    }
}

fn default_startup_timeout_ms() -> u64 {
    30_000
}

fn default_drain_timeout_ms() -> u64 {
    5_000
}

fn default_save_timeout_ms() -> u64 {
    3_000
}

fn default_failure_reply() -> String {
    "Sorry, something went wrong while handling that. Please try again.".to_string()
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Returns the level as a filter directive string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Converts to a `tracing` level.
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature; falls back to `full` without it.
    Json,
}

/// Log destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Log file rotation for [`LogOutput::File`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Log file for [`LogOutput::File`].
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    #[serde(default)]
    pub rotation: LogRotation,

    /// Include thread ids in log lines.
    #[serde(default)]
    pub thread_ids: bool,

    /// Include source file and line in log lines.
    #[serde(default)]
    pub file_location: bool,

    /// Per-target level overrides, e.g. `botkit_runtime = "debug"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,

    #[serde(default)]
    pub span_events: SpanEventConfig,
}
