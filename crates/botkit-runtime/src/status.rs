//! Per-identity status ownership.
//!
//! A [`StatusController`] owns the authoritative in-memory [`StatusRecord`] of
//! one bot and mirrors every accepted update to the store. Transitions are
//! checked against [`BotStatus::can_transition`] before anything changes.

use std::sync::atomic::{AtomicU64, Ordering};

use botkit_core::{BotIdentity, BotStatus, BoxedStore, StatusRecord};
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::StatusPersistence;
use crate::error::{StatusError, StatusResult};

/// Owner of one bot's lifecycle status.
pub struct StatusController {
    identity: BotIdentity,
    store: BoxedStore,
    persistence: StatusPersistence,
    current: RwLock<Option<StatusRecord>>,
    /// Serializes writes so the store ends on the latest in-memory record.
    persist_lock: tokio::sync::Mutex<()>,
    persist_failures: AtomicU64,
}

impl StatusController {
    pub fn new(identity: BotIdentity, store: BoxedStore, persistence: StatusPersistence) -> Self {
        Self {
            identity,
            store,
            persistence,
            current: RwLock::new(None),
            persist_lock: tokio::sync::Mutex::new(()),
            persist_failures: AtomicU64::new(0),
        }
    }

    pub fn identity(&self) -> &BotIdentity {
        &self.identity
    }

    /// Records a new status and persists it.
    ///
    /// `webhook_url = None` keeps the URL of the previous record. The in-memory
    /// record is updated even when persisting fails; under
    /// [`StatusPersistence::Strict`] that failure is then returned.
    pub async fn update(
        &self,
        status: BotStatus,
        error: Option<String>,
        webhook_url: Option<String>,
    ) -> StatusResult<StatusRecord> {
        let (from, record) = {
            let mut current = self.current.write();
            let from = current.as_ref().map(|r| r.status);
            if !BotStatus::can_transition(from, status) {
                warn!(
                    identity = %self.identity,
                    from = from.map_or("created", |s| s.as_str()),
                    to = %status,
                    "Rejected status transition"
                );
                return Err(StatusError::InvalidTransition { from, to: status });
            }

            let webhook_url =
                webhook_url.or_else(|| current.as_ref().and_then(|r| r.webhook_url.clone()));
            let record = StatusRecord::new(status, error, webhook_url);
            *current = Some(record.clone());
            (from, record)
        };

        match &record.error {
            Some(reason) if status == BotStatus::Error => {
                error!(identity = %self.identity, error = %reason, "Bot entered error status");
            }
            _ => info!(
                identity = %self.identity,
                from = from.map_or("created", |s| s.as_str()),
                to = %status,
                "Bot status changed"
            ),
        }

        self.persist().await?;
        Ok(record)
    }

    /// Records `error` unless the bot is already stopping or stopped.
    ///
    /// The check and the write happen under one lock, so a late report can
    /// never replace the final record. Returns `None` when refused.
    pub async fn report_error(&self, error: String) -> StatusResult<Option<StatusRecord>> {
        let record = {
            let mut current = self.current.write();
            if let Some(status) = current
                .as_ref()
                .map(|r| r.status)
                .filter(|s| matches!(s, BotStatus::Stopping | BotStatus::Stopped))
            {
                debug!(
                    identity = %self.identity,
                    status = %status,
                    error = %error,
                    "Error report refused while shutting down"
                );
                return Ok(None);
            }

            let webhook_url = current.as_ref().and_then(|r| r.webhook_url.clone());
            let record = StatusRecord::new(BotStatus::Error, Some(error), webhook_url);
            *current = Some(record.clone());
            record
        };

        if let Some(reason) = &record.error {
            error!(identity = %self.identity, error = %reason, "Bot entered error status");
        }
        self.persist().await?;
        Ok(Some(record))
    }

    /// Writes the latest in-memory record to the store.
    async fn persist(&self) -> StatusResult<()> {
        let _guard = self.persist_lock.lock().await;
        let Some(latest) = self.snapshot() else {
            return Ok(());
        };

        match self.store.save_status(&self.identity, &latest).await {
            Ok(()) => {
                debug!(identity = %self.identity, status = %latest.status, "Status persisted");
                Ok(())
            }
            Err(e) => {
                self.persist_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    identity = %self.identity,
                    status = %latest.status,
                    error = %e,
                    "Failed to persist status"
                );
                match self.persistence {
                    StatusPersistence::BestEffort => Ok(()),
                    StatusPersistence::Strict => Err(StatusError::Persistence(e)),
                }
            }
        }
    }

    /// Returns the in-memory record of this process, if any.
    pub fn snapshot(&self) -> Option<StatusRecord> {
        self.current.read().clone()
    }

    /// Returns the in-memory record, falling back to the persisted one.
    ///
    /// The fallback is not adopted as the in-memory record, so a record left
    /// by a previous process does not constrain this process's transitions.
    pub async fn current(&self) -> StatusResult<Option<StatusRecord>> {
        if let Some(record) = self.snapshot() {
            return Ok(Some(record));
        }
        self.store
            .load_status(&self.identity)
            .await
            .map_err(StatusError::Persistence)
    }

    /// Number of status writes that failed since construction.
    pub fn persist_failures(&self) -> u64 {
        self.persist_failures.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for StatusController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusController")
            .field("identity", &self.identity)
            .field("current", &self.snapshot())
            .field("persistence", &self.persistence)
            .finish_non_exhaustive()
    }
}
