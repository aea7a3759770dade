//! Configuration error types.

use std::path::PathBuf;

use botkit_core::IdentityError;
use thiserror::Error;

/// Why a botkit configuration could not be loaded or was rejected.
///
/// Field names use the dotted config path, e.g. `lifecycle.save_timeout_ms`.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An explicitly requested config file does not exist.
    #[error("botkit config file {} does not exist", .0.display())]
    MissingFile(PathBuf),

    /// The file extension names no enabled config format.
    #[error("cannot load {}: '.{extension}' is not an enabled config format", .path.display())]
    UnsupportedFormat { path: PathBuf, extension: String },

    /// Merging files and environment into [`BotkitConfig`](super::BotkitConfig) failed.
    #[error("could not read botkit configuration: {0}")]
    Extract(String),

    /// A required setting is absent.
    #[error("`{field}` must be set")]
    MissingField { field: &'static str },

    /// A setting is present but unusable.
    #[error("`{field}` is invalid: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    /// A store or webhook URL was rejected.
    #[error("`{field}` has unusable URL '{url}': {reason}")]
    InvalidUrl {
        field: &'static str,
        url: String,
        reason: String,
    },

    /// The configured name or token does not yield a usable identity.
    #[error("bot identity: {0}")]
    Identity(#[from] IdentityError),
}

impl ConfigError {
    pub fn missing(field: &'static str) -> Self {
        Self::MissingField { field }
    }

    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }

    pub fn invalid_url(field: &'static str, url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            field,
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// The dotted config path the error refers to, when there is one.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::MissingField { field }
            | Self::InvalidValue { field, .. }
            | Self::InvalidUrl { field, .. } => Some(field),
            _ => None,
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Extract(err.to_string())
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_field() {
        let err = ConfigError::invalid("lifecycle.save_timeout_ms", "must be greater than 0");
        assert_eq!(
            err.to_string(),
            "`lifecycle.save_timeout_ms` is invalid: must be greater than 0"
        );
        assert_eq!(err.field(), Some("lifecycle.save_timeout_ms"));

        let err = ConfigError::invalid_url("bot.store_url", "redis://x", "no backend");
        assert_eq!(err.field(), Some("bot.store_url"));
        assert!(err.to_string().contains("redis://x"));

        assert_eq!(ConfigError::Extract("bad".into()).field(), None);
    }
}
