//! In-process dispatcher.
//!
//! [`LocalDispatcher`] routes updates pushed through [`LocalDispatcher::dispatch`]
//! to registered handlers. Routes are checked in registration order and the
//! first matching trigger handles the update. It backs tests and console bots
//! that have no platform connection.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{Instrument, Level, debug, info, span, trace};

use super::{Dispatcher, Reply, Trigger, Update, UpdateHandler};
use crate::error::{DispatchError, DispatchResult};

/// Dispatcher that delivers updates handed to it by the host program.
pub struct LocalDispatcher {
    name: String,
    routes: RwLock<Vec<(Trigger, UpdateHandler)>>,
    initialized: AtomicBool,
    running: AtomicBool,
    /// Held for reading by every in-flight update; `stop` takes it for writing to drain.
    in_flight: tokio::sync::RwLock<()>,
}

impl LocalDispatcher {
    /// Creates a dispatcher with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            routes: RwLock::new(Vec::new()),
            initialized: AtomicBool::new(false),
            running: AtomicBool::new(false),
            in_flight: tokio::sync::RwLock::new(()),
        }
    }

    /// Returns the number of registered handlers.
    pub fn route_count(&self) -> usize {
        self.routes.read().len()
    }

    /// Returns whether updates are currently accepted.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Delivers `update` to the first matching handler.
    ///
    /// Returns `Ok(None)` when no handler matched or the handler had nothing to
    /// say, and [`DispatchError::NotRunning`] outside `start`..`stop`.
    pub async fn dispatch(&self, update: Update) -> DispatchResult<Option<Reply>> {
        if !self.is_running() {
            return Err(DispatchError::NotRunning(self.name.clone()));
        }

        let _guard = self.in_flight.read().await;
        if !self.is_running() {
            return Err(DispatchError::NotRunning(self.name.clone()));
        }

        let span = span!(Level::DEBUG, "dispatch", update_id = update.update_id);
        let handler = self
            .routes
            .read()
            .iter()
            .find(|(trigger, _)| trigger.matches(&update))
            .map(|(trigger, handler)| {
                trace!(trigger = %trigger, "Route matched");
                handler.clone()
            });

        match handler {
            Some(handler) => Ok(handler(update).instrument(span).await),
            None => {
                debug!(update_id = update.update_id, "No handler matched update");
                Ok(None)
            }
        }
    }
}

impl Default for LocalDispatcher {
    fn default() -> Self {
        Self::new("local")
    }
}

#[async_trait]
impl Dispatcher for LocalDispatcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn register_handler(&self, trigger: Trigger, handler: UpdateHandler) -> DispatchResult<()> {
        debug!(dispatcher = %self.name, trigger = %trigger, "Handler registered");
        self.routes.write().push((trigger, handler));
        Ok(())
    }

    fn clear_handlers(&self) {
        self.routes.write().clear();
    }

    async fn initialize(&self) -> DispatchResult<()> {
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn start(&self) -> DispatchResult<()> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(DispatchError::Initialization(format!(
                "dispatcher '{}' started before initialize",
                self.name
            )));
        }
        self.running.store(true, Ordering::SeqCst);
        info!(dispatcher = %self.name, routes = self.route_count(), "Dispatcher started");
        Ok(())
    }

    async fn stop(&self) -> DispatchResult<()> {
        self.running.store(false, Ordering::SeqCst);
        let _drained = self.in_flight.write().await;
        info!(dispatcher = %self.name, "Dispatcher stopped");
        Ok(())
    }
}
