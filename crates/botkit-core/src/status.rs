//! Lifecycle status and the persisted status record.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a bot as reported to monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotStatus {
    /// Loading state and registering handlers.
    Starting,
    /// Dispatcher is running and handling updates.
    Running,
    /// Draining the dispatcher and persisting state.
    Stopping,
    /// Fully stopped.
    Stopped,
    /// An error was reported. Not terminal: the bot may still run or be stopped.
    Error,
}

impl BotStatus {
    /// Returns the status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }

    /// Returns whether a bot may move from `from` to `to`.
    ///
    /// `from == None` is a bot that has not reported any status in this process.
    /// `Error` is reachable from anywhere; restarting always goes through
    /// `Starting`.
    pub fn can_transition(from: Option<BotStatus>, to: BotStatus) -> bool {
        use BotStatus::*;

        if to == Error {
            return true;
        }

        matches!(
            (from, to),
            (None, Starting | Stopping)
                | (Some(Starting), Running | Stopping)
                | (Some(Running), Stopping)
                | (Some(Stopping), Stopped)
                | (Some(Stopped), Starting)
                | (Some(Error), Starting | Stopping)
        )
    }
}

impl fmt::Display for BotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted lifecycle status plus last error and optional webhook URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    /// Current status.
    pub status: BotStatus,
    /// Last error message, if any.
    #[serde(default)]
    pub error: Option<String>,
    /// Webhook URL the bot is reachable at, if any.
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// When this record was written.
    pub updated_at: DateTime<Utc>,
}

impl StatusRecord {
    /// Creates a record stamped with the current time.
    pub fn new(status: BotStatus, error: Option<String>, webhook_url: Option<String>) -> Self {
        Self {
            status,
            error,
            webhook_url,
            updated_at: Utc::now(),
        }
    }
}
