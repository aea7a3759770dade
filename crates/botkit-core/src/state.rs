//! Persisted, schema-less bot state.
//!
//! [`BotState`] is a JSON object keyed by string. Values are held as
//! [`serde_json::Value`], so a state can always be encoded; typed access goes
//! through serde at the call site:
//!
//! ```rust
//! use botkit_core::BotState;
//!
//! let mut state = BotState::new();
//! state.set("greeting", "hello").unwrap();
//! state.increment("messages_echoed", 1);
//!
//! assert_eq!(state.get::<String>("greeting").as_deref(), Some("hello"));
//! assert_eq!(state.get::<i64>("messages_echoed"), Some(1));
//! ```

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::error::{StoreError, StoreResult};

/// Arbitrary key/value data owned by one bot instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BotState(Map<String, Value>);

/// A [`BotState`] shared between the runtime and its handlers.
pub type SharedState = Arc<Mutex<BotState>>;

impl BotState {
    /// Creates an empty state.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Returns the value stored under `key` decoded as `T`.
    ///
    /// Returns `None` when the key is missing or holds a value of another shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.0
            .get(key)
            .and_then(|v| T::deserialize(v).ok())
    }

    /// Returns the raw JSON value stored under `key`.
    pub fn get_raw(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn set<T: Serialize>(&mut self, key: impl Into<String>, value: T) -> StoreResult<()> {
        let key = key.into();
        let value =
            serde_json::to_value(value).map_err(|e| StoreError::serialization(&key, e.to_string()))?;
        self.0.insert(key, value);
        Ok(())
    }

    /// Stores a raw JSON value under `key`.
    pub fn set_raw(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    /// Adds `by` to the integer under `key` and returns the new value.
    ///
    /// A missing or non-integer value counts as zero.
    pub fn increment(&mut self, key: impl Into<String>, by: i64) -> i64 {
        let key = key.into();
        let next = self.0.get(&key).and_then(Value::as_i64).unwrap_or(0) + by;
        self.0.insert(key, Value::from(next));
        next
    }

    /// Removes `key`, returning its previous value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Iterates over all entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Wraps this state for sharing with handlers.
    pub fn into_shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }
}

impl From<Map<String, Value>> for BotState {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, Value)> for BotState {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
