//! Unified error types for the botkit core.
//!
//! Runtime-level errors (status transitions, configuration) are defined in
//! `botkit-runtime`.

use thiserror::Error;

// =============================================================================
// Store Errors
// =============================================================================

/// Errors that can occur while reading or writing persisted records.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The backing store could not be reached.
    #[error("store unavailable: {reason}")]
    Unavailable {
        /// Reason for failure.
        reason: String,
    },

    /// A record could not be encoded or decoded.
    #[error("serialization error for '{key}': {reason}")]
    Serialization {
        /// The store key involved.
        key: String,
        /// Reason for failure.
        reason: String,
    },

    /// The key cannot be stored by this backend.
    #[error("invalid store key '{0}'")]
    InvalidKey(String),

    /// The store URL names a scheme no backend handles.
    #[error("unsupported store url '{url}': {reason}")]
    UnsupportedUrl {
        /// The rejected URL.
        url: String,
        /// Reason for rejection.
        reason: String,
    },
}

impl StoreError {
    /// Creates an unavailable error.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Creates a serialization error for the given key.
    pub fn serialization(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Serialization {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` if the store itself could not be reached.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::unavailable(err.to_string())
    }
}

// =============================================================================
// Identity Errors
// =============================================================================

/// Errors raised when building a [`BotIdentity`](crate::BotIdentity).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// The identity is empty.
    #[error("bot identity must not be empty")]
    Empty,

    /// The identity contains a character outside `[A-Za-z0-9_.-]`.
    #[error("invalid character {ch:?} in bot identity '{identity}'")]
    InvalidCharacter {
        /// The rejected identity.
        identity: String,
        /// The first offending character.
        ch: char,
    },

    /// The token carries no bot-id prefix to derive an identity from.
    #[error("cannot derive a bot identity from the token; configure a bot name")]
    Underivable,
}

// =============================================================================
// Dispatcher Errors
// =============================================================================

/// Errors reported by a chat-platform dispatcher.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// The dispatcher failed to initialize.
    #[error("dispatcher initialization failed: {0}")]
    Initialization(String),

    /// Handler registration was rejected.
    #[error("handler registration failed: {0}")]
    Registration(String),

    /// The dispatcher is not running.
    #[error("dispatcher '{0}' is not running")]
    NotRunning(String),

    /// Any other SDK failure.
    #[error("dispatcher error: {0}")]
    Other(String),
}

impl DispatchError {
    /// Creates a generic dispatcher error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

// =============================================================================
// Handler Errors
// =============================================================================

/// Errors raised inside a user-registered handler.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    /// The handler failed.
    #[error("{0}")]
    Failed(String),

    /// The update did not carry what the handler needed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Reading or writing bot state failed.
    #[error("state error: {0}")]
    State(#[from] StoreError),

    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    /// Creates a failure with the given message.
    pub fn msg(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for dispatcher operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Result type for handler invocations.
pub type HandlerResult<T> = Result<T, HandlerError>;
