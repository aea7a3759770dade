//! Bot identity used to namespace persisted records.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::IdentityError;

/// Opaque key that namespaces one bot's state and status in the store.
///
/// Identities are restricted to `[A-Za-z0-9_.-]` so they can be embedded in
/// store keys and file names unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BotIdentity(String);

impl BotIdentity {
    /// Creates an identity from a configured name.
    pub fn new(name: impl Into<String>) -> Result<Self, IdentityError> {
        let name = name.into();
        if name.is_empty() {
            return Err(IdentityError::Empty);
        }
        if let Some(ch) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
        {
            return Err(IdentityError::InvalidCharacter { identity: name, ch });
        }
        Ok(Self(name))
    }

    /// Derives an identity from a bot token.
    ///
    /// Platform tokens look like `123456:ABC-secret`; the numeric bot id before
    /// the first `:` is public and stable, so it is used instead of the secret.
    pub fn from_token(token: &str) -> Result<Self, IdentityError> {
        match token.split_once(':') {
            Some((bot_id, secret)) if !bot_id.is_empty() && !secret.is_empty() => {
                Self::new(bot_id)
            }
            _ => Err(IdentityError::Underivable),
        }
    }

    /// Returns the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Store key of this bot's state record.
    pub fn state_key(&self) -> String {
        format!("state:{}", self.0)
    }

    /// Store key of this bot's status record.
    pub fn status_key(&self) -> String {
        format!("status:{}", self.0)
    }
}

impl fmt::Display for BotIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for BotIdentity {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BotIdentity> for String {
    fn from(identity: BotIdentity) -> Self {
        identity.0
    }
}
