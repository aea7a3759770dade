//! State store contract and key-value backends.
//!
//! The [`StateStore`] trait is what the runtime talks to. [`KvStateStore`]
//! implements it over any [`KvBackend`] by laying records out as
//!
//! | Key | Value |
//! |-----|-------|
//! | `state:{identity}`  | JSON object ([`BotState`]) |
//! | `status:{identity}` | JSON object ([`StatusRecord`]) |
//!
//! Backends are picked from a store URL with [`open_store`]:
//!
//! | URL | Backend |
//! |-----|---------|
//! | `memory://` | [`MemoryBackend`] |
//! | `file://<dir>` | [`FileBackend`] rooted at `<dir>` |
//!
//! No layer here retries; retry policy belongs to the caller.

mod file;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::error::{StoreError, StoreResult};
use crate::identity::BotIdentity;
use crate::state::BotState;
use crate::status::StatusRecord;

pub use file::FileBackend;
pub use memory::MemoryBackend;

/// Persistence contract for bot state and status records.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the state of `identity`.
    ///
    /// Returns an empty state when nothing has been saved yet.
    async fn load(&self, identity: &BotIdentity) -> StoreResult<BotState>;

    /// Overwrites the state of `identity`.
    async fn save(&self, identity: &BotIdentity, state: &BotState) -> StoreResult<()>;

    /// Loads the last persisted status record of `identity`, if any.
    async fn load_status(&self, identity: &BotIdentity) -> StoreResult<Option<StatusRecord>>;

    /// Overwrites the status record of `identity`.
    async fn save_status(&self, identity: &BotIdentity, record: &StatusRecord) -> StoreResult<()>;
}

/// A shared state store trait object.
pub type BoxedStore = Arc<dyn StateStore>;

/// Raw byte-oriented key-value storage.
///
/// Implementations must make each `set` atomic per key.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Short backend name for logging.
    fn name(&self) -> &'static str;

    /// Reads the value under `key`.
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Writes `value` under `key`.
    async fn set(&self, key: &str, value: Vec<u8>) -> StoreResult<()>;

    /// Removes `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;
}

/// [`StateStore`] over a [`KvBackend`], encoding records as JSON.
pub struct KvStateStore<B> {
    backend: B,
}

impl<B: KvBackend> KvStateStore<B> {
    /// Creates a store over `backend`.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Returns the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        let Some(bytes) = self.backend.get(key).await? else {
            trace!(key, "No record stored");
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::serialization(key, e.to_string()))
    }

    async fn write_json<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<()> {
        let bytes =
            serde_json::to_vec(value).map_err(|e| StoreError::serialization(key, e.to_string()))?;
        self.backend.set(key, bytes).await?;
        debug!(key, backend = self.backend.name(), "Record written");
        Ok(())
    }
}

#[async_trait]
impl<B: KvBackend> StateStore for KvStateStore<B> {
    async fn load(&self, identity: &BotIdentity) -> StoreResult<BotState> {
        Ok(self
            .read_json(&identity.state_key())
            .await?
            .unwrap_or_default())
    }

    async fn save(&self, identity: &BotIdentity, state: &BotState) -> StoreResult<()> {
        self.write_json(&identity.state_key(), state).await
    }

    async fn load_status(&self, identity: &BotIdentity) -> StoreResult<Option<StatusRecord>> {
        self.read_json(&identity.status_key()).await
    }

    async fn save_status(&self, identity: &BotIdentity, record: &StatusRecord) -> StoreResult<()> {
        self.write_json(&identity.status_key(), record).await
    }
}

/// Opens the state store named by `url`.
pub fn open_store(url: &str) -> StoreResult<BoxedStore> {
    let unsupported = |reason: &str| StoreError::UnsupportedUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| unsupported("expected <scheme>://..."))?;

    match scheme {
        "memory" => Ok(Arc::new(KvStateStore::new(MemoryBackend::new()))),
        "file" if rest.is_empty() => Err(unsupported("file:// needs a directory")),
        "file" => Ok(Arc::new(KvStateStore::new(FileBackend::new(rest)))),
        other => Err(unsupported(&format!("no backend for scheme '{other}'"))),
    }
}
