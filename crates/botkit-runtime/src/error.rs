//! Runtime error types.

use std::time::Duration;

use botkit_core::{BotStatus, DispatchError, IdentityError, StoreError};
use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised by the [`StatusController`](crate::StatusController).
#[derive(Error, Debug, Clone)]
pub enum StatusError {
    /// The requested transition is not in the lifecycle graph.
    #[error(
        "invalid status transition: {} -> {to}",
        .from.map_or("created", |s| s.as_str())
    )]
    InvalidTransition {
        /// Status before the update; `None` for a bot that never reported one.
        from: Option<BotStatus>,
        /// Requested status.
        to: BotStatus,
    },

    /// Reading or writing the status record failed.
    #[error("status persistence failed: {0}")]
    Persistence(#[source] StoreError),
}

/// Result type for status operations.
pub type StatusResult<T> = Result<T, StatusError>;

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The bot identity is invalid.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Store error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Status error.
    #[error(transparent)]
    Status(#[from] StatusError),

    /// The dispatcher failed.
    #[error(transparent)]
    Dispatcher(#[from] DispatchError),

    /// Dispatcher initialization did not finish in time.
    #[error("dispatcher did not start within {0:?}")]
    StartupTimeout(Duration),

    /// Persisting state did not finish in time.
    #[error("state save did not finish within {0:?}")]
    SaveTimeout(Duration),

    /// A stop was requested before this start acquired the lifecycle.
    #[error("start was cancelled by a concurrent stop")]
    StartCancelled,

    /// State has not been loaded, so saving it would overwrite persisted data.
    #[error("bot state has not been loaded yet")]
    StateNotLoaded,
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
