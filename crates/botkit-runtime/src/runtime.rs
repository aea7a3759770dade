//! Bot lifecycle orchestration.
//!
//! [`BotRuntime`] owns one bot instance: its identity, state, status and the
//! dispatcher that feeds it updates.
//!
//! ```text
//!            start()                   stop()
//! created ──────────▶ starting ──▶ running ──▶ stopping ──▶ stopped
//!                        │            │                       │
//!                        ▼            ▼ handler error         │ start()
//!                      error ◀────────┘                       ▼
//!                                                          starting
//! ```
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use botkit_runtime::{BotRuntime, HandlerContext};
//!
//! let runtime = BotRuntime::builder().build(dispatcher)?;
//! runtime.on_command("start", |_ctx: HandlerContext| async { Ok("Hello!") });
//! runtime.run().await?;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use botkit_core::{
    BotIdentity, BotState, BotStatus, BoxedDispatcher, BoxedStore, SharedState, StateStore,
    StatusRecord, Trigger, open_store,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{BotkitConfig, ConfigLoader, validate_config};
use crate::error::{RuntimeError, RuntimeResult, StatusError};
use crate::handler::{BoxedHandler, ErrorReporter, Handler, HandlerGuard, IntoReply, into_handler};
use crate::logging;
use crate::shutdown::{self, ShutdownHandle};
use crate::status::StatusController;

/// Where a [`BotRuntime`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    /// Startup failed, or a running bot reported an error.
    Error,
}

/// Outcome of a graceful stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReport {
    /// The final `stopped` status record.
    pub record: StatusRecord,
    /// `false` when the final state could not be persisted.
    pub state_saved: bool,
    /// `false` when in-flight updates were still running at the drain deadline.
    pub drained: bool,
}

struct CheckpointTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Lifecycle controller for a single bot instance.
pub struct BotRuntime {
    config: BotkitConfig,
    identity: BotIdentity,
    store: BoxedStore,
    dispatcher: BoxedDispatcher,
    status: Arc<StatusController>,
    state: SharedState,
    /// Values for keys missing from the loaded state.
    defaults: Mutex<BotState>,
    routes: RwLock<Vec<(Trigger, BoxedHandler)>>,
    /// Shared by every start, so a handler left running by an undrained stop
    /// still serializes with handlers of the next run.
    guard: Arc<HandlerGuard>,
    phase: RwLock<LifecycleState>,
    /// Serializes `start` and `stop`.
    lifecycle: tokio::sync::Mutex<()>,
    state_loaded: AtomicBool,
    /// Whether handler errors may still change the status.
    reporting: Arc<AtomicBool>,
    start_tickets: AtomicU64,
    /// Starts with a ticket at or below this value were superseded by a stop.
    cancelled_through: AtomicU64,
    shutdown: ShutdownHandle,
    checkpoints: Mutex<Option<CheckpointTask>>,
    last_stop: Mutex<Option<StopReport>>,
}

impl BotRuntime {
    /// Creates a runtime builder that loads configuration from files and the environment.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from a loaded configuration.
    ///
    /// Validates the configuration, initializes logging, resolves the identity
    /// and opens the configured store.
    pub fn from_config(config: BotkitConfig, dispatcher: BoxedDispatcher) -> RuntimeResult<Self> {
        validate_config(&config)?;
        logging::init_from_config(&config.logging);

        let identity = config.bot.identity()?;
        let store = open_store(&config.bot.store_url)?;

        info!(
            identity = %identity,
            store_url = %config.bot.store_url,
            dispatcher = dispatcher.name(),
            "Bot runtime created"
        );

        Ok(Self::with_store(config, identity, store, dispatcher))
    }

    /// Creates a runtime over an already opened store.
    pub fn with_store(
        config: BotkitConfig,
        identity: BotIdentity,
        store: BoxedStore,
        dispatcher: BoxedDispatcher,
    ) -> Self {
        let status = Arc::new(StatusController::new(
            identity.clone(),
            Arc::clone(&store),
            config.lifecycle.status_persistence,
        ));

        let state = BotState::new().into_shared();
        let shutdown = ShutdownHandle::new();
        let reporting = Arc::new(AtomicBool::new(false));
        let guard = Arc::new(HandlerGuard::new(
            identity.clone(),
            Arc::clone(&state),
            ErrorReporter::new(
                Arc::clone(&status),
                config.lifecycle.on_handler_error,
                shutdown.clone(),
                Arc::clone(&reporting),
            ),
            config.lifecycle.failure_reply.clone(),
        ));

        Self {
            config,
            identity,
            store,
            dispatcher,
            status,
            state,
            defaults: Mutex::new(BotState::new()),
            routes: RwLock::new(Vec::new()),
            guard,
            phase: RwLock::new(LifecycleState::Created),
            lifecycle: tokio::sync::Mutex::new(()),
            state_loaded: AtomicBool::new(false),
            reporting,
            start_tickets: AtomicU64::new(0),
            cancelled_through: AtomicU64::new(0),
            shutdown,
            checkpoints: Mutex::new(None),
            last_stop: Mutex::new(None),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn identity(&self) -> &BotIdentity {
        &self.identity
    }

    pub fn config(&self) -> &BotkitConfig {
        &self.config
    }

    /// Shared handle to the bot state.
    pub fn state(&self) -> SharedState {
        Arc::clone(&self.state)
    }

    /// The in-memory status record of this process.
    pub fn status(&self) -> Option<StatusRecord> {
        self.status.snapshot()
    }

    pub fn status_controller(&self) -> &Arc<StatusController> {
        &self.status
    }

    pub fn dispatcher(&self) -> &BoxedDispatcher {
        &self.dispatcher
    }

    /// Current lifecycle state.
    ///
    /// A running bot whose last status is `error` reports [`LifecycleState::Error`].
    pub fn lifecycle_state(&self) -> LifecycleState {
        let phase = self.phase();
        let errored = self
            .status
            .snapshot()
            .is_some_and(|r| r.status == BotStatus::Error);
        if phase == LifecycleState::Running && errored {
            LifecycleState::Error
        } else {
            phase
        }
    }

    /// Handle for reporting runtime errors from outside a handler.
    pub fn error_reporter(&self) -> ErrorReporter {
        ErrorReporter::new(
            Arc::clone(&self.status),
            self.config.lifecycle.on_handler_error,
            self.shutdown.clone(),
            Arc::clone(&self.reporting),
        )
    }

    /// Handle for requesting a graceful shutdown of [`run`](Self::run).
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    fn phase(&self) -> LifecycleState {
        *self.phase.read()
    }

    fn set_phase(&self, phase: LifecycleState) {
        *self.phase.write() = phase;
    }

    // =========================================================================
    // Handler registration
    // =========================================================================

    /// Registers `handler` for updates selected by `trigger`.
    ///
    /// Handlers are handed to the dispatcher on `start`; routes are tried in
    /// registration order.
    pub fn on<H, R>(&self, trigger: Trigger, handler: H) -> &Self
    where
        H: Handler<R>,
        R: IntoReply + 'static,
    {
        if self.phase() == LifecycleState::Running {
            warn!(
                trigger = %trigger,
                "Handler registered while running, it takes effect on the next start"
            );
        }
        debug!(identity = %self.identity, trigger = %trigger, "Handler added");
        self.routes.write().push((trigger, into_handler(handler)));
        self
    }

    /// Registers a `/name` command handler.
    pub fn on_command<H, R>(&self, name: &str, handler: H) -> &Self
    where
        H: Handler<R>,
        R: IntoReply + 'static,
    {
        self.on(Trigger::command(name), handler)
    }

    /// Registers a handler for plain text messages.
    pub fn on_message<H, R>(&self, handler: H) -> &Self
    where
        H: Handler<R>,
        R: IntoReply + 'static,
    {
        self.on(Trigger::Text, handler)
    }

    /// Registers a handler for callback queries.
    pub fn on_callback<H, R>(&self, handler: H) -> &Self
    where
        H: Handler<R>,
        R: IntoReply + 'static,
    {
        self.on(Trigger::Callback, handler)
    }

    pub fn handler_count(&self) -> usize {
        self.routes.read().len()
    }

    /// Sets values used for keys absent from the state loaded on start.
    pub fn set_state_defaults(&self, defaults: BotState) {
        *self.defaults.lock() = defaults;
    }

    fn register_routes(&self) -> RuntimeResult<()> {
        self.dispatcher.clear_handlers();

        let routes = self.routes.read();
        if routes.is_empty() {
            warn!(identity = %self.identity, "No handlers registered");
        }
        for (trigger, handler) in routes.iter() {
            let wrapped = self.guard.wrap(trigger.clone(), Arc::clone(handler));
            self.dispatcher.register_handler(trigger.clone(), wrapped)?;
        }
        debug!(identity = %self.identity, count = routes.len(), "Handlers registered");
        Ok(())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Loads state, registers handlers and starts the dispatcher.
    ///
    /// Starting a running bot is a no-op. On failure the status becomes
    /// `error`, the dispatcher is stopped with its handlers cleared, and the
    /// error is returned; there is no automatic retry.
    pub async fn start(&self) -> RuntimeResult<()> {
        let ticket = self.start_tickets.fetch_add(1, Ordering::SeqCst) + 1;
        let _lifecycle = self.lifecycle.lock().await;

        {
            let mut token = self.shutdown.lock();
            if ticket <= self.cancelled_through.load(Ordering::SeqCst) {
                info!(identity = %self.identity, "Start superseded by a concurrent stop");
                return Err(RuntimeError::StartCancelled);
            }
            if self.phase() == LifecycleState::Running {
                warn!(identity = %self.identity, "Bot is already running");
                return Ok(());
            }
            ShutdownHandle::rearm(&mut token);
        }

        info!(
            identity = %self.identity,
            dispatcher = self.dispatcher.name(),
            "Starting bot"
        );
        self.set_phase(LifecycleState::Starting);
        self.last_stop.lock().take();

        let result = match self.status.update(BotStatus::Starting, None, None).await {
            Ok(_) => self.bring_up().await,
            Err(e) => Err(e.into()),
        };
        let result = match result {
            Ok(()) => self
                .status
                .update(
                    BotStatus::Running,
                    None,
                    self.config.bot.webhook_url.clone(),
                )
                .await
                .map(|_| ())
                .map_err(RuntimeError::from),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.reporting.store(true, Ordering::SeqCst);
                self.spawn_checkpoints();
                self.set_phase(LifecycleState::Running);
                info!(
                    identity = %self.identity,
                    handlers = self.handler_count(),
                    "Bot is running"
                );
                Ok(())
            }
            Err(e) => {
                self.abort_start(&e).await;
                Err(e)
            }
        }
    }

    async fn bring_up(&self) -> RuntimeResult<()> {
        let mut loaded = match self.store.load(&self.identity).await {
            Ok(state) => {
                debug!(identity = %self.identity, keys = state.len(), "State loaded");
                state
            }
            Err(e) => {
                warn!(
                    identity = %self.identity,
                    error = %e,
                    "Failed to load state, starting with empty state"
                );
                BotState::new()
            }
        };
        for (key, value) in self.defaults.lock().iter() {
            if !loaded.contains_key(key) {
                loaded.set_raw(key.clone(), value.clone());
            }
        }
        *self.state.lock().await = loaded;
        self.state_loaded.store(true, Ordering::SeqCst);

        self.register_routes()?;

        let timeout = self.config.lifecycle.startup_timeout();
        tokio::time::timeout(timeout, async {
            self.dispatcher.initialize().await?;
            self.dispatcher.start().await
        })
        .await
        .map_err(|_| RuntimeError::StartupTimeout(timeout))??;

        Ok(())
    }

    async fn abort_start(&self, cause: &RuntimeError) {
        error!(identity = %self.identity, error = %cause, "Bot failed to start");

        if let Err(e) = self
            .status
            .update(BotStatus::Error, Some(cause.to_string()), None)
            .await
        {
            warn!(identity = %self.identity, error = %e, "Failed to record startup error");
        }

        self.dispatcher.clear_handlers();
        let timeout = self.config.lifecycle.drain_timeout();
        match tokio::time::timeout(timeout, self.dispatcher.stop()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Dispatcher cleanup after failed start errored"),
            Err(_) => warn!(?timeout, "Dispatcher cleanup after failed start timed out"),
        }

        self.set_phase(LifecycleState::Error);
    }

    /// Gracefully stops the bot.
    ///
    /// Drains the dispatcher, cancels checkpoints and persists the final
    /// state, each within its configured bound, then records `stopped`.
    /// Repeated calls return the report of the first stop.
    pub async fn stop(&self) -> RuntimeResult<StopReport> {
        self.shutdown_with(None).await
    }

    /// Reports a fatal error and stops the bot.
    ///
    /// The `stopped` record keeps `reason` in its error field.
    pub async fn fail(&self, reason: impl Into<String>) -> RuntimeResult<StopReport> {
        self.shutdown_with(Some(reason.into())).await
    }

    async fn shutdown_with(&self, reason: Option<String>) -> RuntimeResult<StopReport> {
        {
            let token = self.shutdown.lock();
            self.cancelled_through
                .fetch_max(self.start_tickets.load(Ordering::SeqCst), Ordering::SeqCst);
            token.cancel();
        }
        let _lifecycle = self.lifecycle.lock().await;

        let prior = self.phase();
        let cached = match prior {
            LifecycleState::Stopped => self.last_stop.lock().clone(),
            _ => None,
        };
        if let Some(report) = cached {
            debug!(identity = %self.identity, "Bot already stopped");
            return Ok(report);
        }

        if let Some(reason) = &reason {
            error!(identity = %self.identity, error = %reason, "Fatal error, stopping bot");
            if let Err(e) = self
                .status
                .update(BotStatus::Error, Some(reason.clone()), None)
                .await
            {
                warn!(identity = %self.identity, error = %e, "Failed to record fatal error");
            }
        }

        info!(identity = %self.identity, "Stopping bot");
        self.set_phase(LifecycleState::Stopping);
        self.enter_stopping().await?;

        let mut drained = true;
        let mut save_error = None;
        if prior == LifecycleState::Running {
            drained = self.drain().await;
            self.reporting.store(false, Ordering::SeqCst);
            self.stop_checkpoints().await;
            if let Err(e) = self.save_state().await {
                error!(identity = %self.identity, error = %e, "Failed to save final state");
                save_error = Some(e.to_string());
            }
        }
        self.reporting.store(false, Ordering::SeqCst);

        let state_saved = save_error.is_none();
        let error = match (reason, save_error) {
            (Some(reason), Some(save)) => Some(format!("{reason}; {save}")),
            (reason, save) => reason.or(save),
        };
        let record = match self.status.update(BotStatus::Stopped, error, None).await {
            Ok(record) => record,
            Err(err @ StatusError::Persistence(_)) => {
                warn!(identity = %self.identity, error = %err, "Final status was not persisted");
                self.status.snapshot().ok_or(RuntimeError::Status(err))?
            }
            Err(err) => return Err(err.into()),
        };

        self.set_phase(LifecycleState::Stopped);
        let report = StopReport {
            record,
            state_saved,
            drained,
        };
        *self.last_stop.lock() = Some(report.clone());

        info!(
            identity = %self.identity,
            state_saved,
            drained,
            "Bot stopped"
        );
        Ok(report)
    }

    async fn enter_stopping(&self) -> RuntimeResult<()> {
        if self
            .status
            .snapshot()
            .is_some_and(|r| r.status == BotStatus::Stopping)
        {
            return Ok(());
        }
        match self.status.update(BotStatus::Stopping, None, None).await {
            Ok(_) => Ok(()),
            Err(StatusError::Persistence(e)) => {
                warn!(identity = %self.identity, error = %e, "Stopping status was not persisted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Stops the dispatcher, returning whether it finished within the drain timeout.
    async fn drain(&self) -> bool {
        let timeout = self.config.lifecycle.drain_timeout();
        match tokio::time::timeout(timeout, self.dispatcher.stop()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(identity = %self.identity, error = %e, "Dispatcher failed to stop cleanly");
                false
            }
            Err(_) => {
                warn!(identity = %self.identity, ?timeout, "Dispatcher did not drain in time");
                false
            }
        }
    }

    /// Persists the current state on demand.
    pub async fn checkpoint(&self) -> RuntimeResult<()> {
        if !self.state_loaded.load(Ordering::SeqCst) {
            return Err(RuntimeError::StateNotLoaded);
        }
        self.save_state().await
    }

    async fn save_state(&self) -> RuntimeResult<()> {
        save_snapshot(
            self.store.as_ref(),
            &self.identity,
            &self.state,
            self.config.lifecycle.save_timeout(),
        )
        .await
    }

    fn spawn_checkpoints(&self) {
        let Some(interval) = self.config.lifecycle.checkpoint_interval() else {
            return;
        };

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(checkpoint_loop(
            Arc::clone(&self.store),
            self.identity.clone(),
            Arc::clone(&self.state),
            interval,
            self.config.lifecycle.save_timeout(),
            cancel.clone(),
        ));
        debug!(identity = %self.identity, ?interval, "Checkpoint task started");

        if let Some(previous) = self.checkpoints.lock().replace(CheckpointTask { cancel, handle }) {
            previous.cancel.cancel();
            previous.handle.abort();
        }
    }

    /// Cancels the checkpoint task and lets an in-progress save finish first.
    async fn stop_checkpoints(&self) {
        let task = self.checkpoints.lock().take();
        let Some(CheckpointTask { cancel, mut handle }) = task else {
            return;
        };

        cancel.cancel();
        let timeout = self.config.lifecycle.save_timeout();
        if tokio::time::timeout(timeout, &mut handle).await.is_err() {
            warn!(identity = %self.identity, "Checkpoint task did not finish, aborting it");
            handle.abort();
        }
    }

    // =========================================================================
    // Run
    // =========================================================================

    /// Starts the bot and runs it until Ctrl+C, SIGTERM or a requested shutdown.
    ///
    /// The signal listeners are installed before starting, so a signal that
    /// arrives while the bot is still starting stops it gracefully.
    pub async fn run(&self) -> RuntimeResult<StopReport> {
        self.run_until(shutdown::shutdown_signal()).await
    }

    /// Starts the bot and runs it until `signal` completes or a shutdown is requested.
    ///
    /// If `signal` completes during startup, startup is allowed to finish and
    /// the bot is then stopped. The result is always the stop report, unless
    /// startup failed before any signal.
    pub async fn run_until<F>(&self, signal: F) -> RuntimeResult<StopReport>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(signal);

        let start = self.start();
        tokio::pin!(start);
        // Polling start first takes its ticket, so a stop from the signal
        // branch always supersedes or follows it.
        tokio::select! {
            biased;
            result = &mut start => result?,
            _ = &mut signal => {
                info!(identity = %self.identity, "Shutdown signal received while starting");
                let (started, report) = tokio::join!(start, self.stop());
                if let Err(e) = started {
                    debug!(identity = %self.identity, error = %e, "Interrupted start did not complete");
                }
                return report;
            }
        }
        info!(identity = %self.identity, "Bot is now running. Press Ctrl+C to stop.");

        let requested = self.shutdown.token();
        tokio::select! {
            _ = &mut signal => {}
            _ = requested.cancelled() => {
                info!(identity = %self.identity, "Shutdown requested");
            }
        }

        self.stop().await
    }
}

impl Drop for BotRuntime {
    fn drop(&mut self) {
        if let Some(task) = self.checkpoints.get_mut().take() {
            task.cancel.cancel();
            task.handle.abort();
        }
    }
}

impl std::fmt::Debug for BotRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotRuntime")
            .field("identity", &self.identity)
            .field("dispatcher", &self.dispatcher.name())
            .field("lifecycle", &self.lifecycle_state())
            .field("handlers", &self.handler_count())
            .finish_non_exhaustive()
    }
}

async fn save_snapshot(
    store: &dyn StateStore,
    identity: &BotIdentity,
    state: &SharedState,
    timeout: Duration,
) -> RuntimeResult<()> {
    tokio::time::timeout(timeout, async {
        let snapshot = state.lock().await.clone();
        store.save(identity, &snapshot).await
    })
    .await
    .map_err(|_| RuntimeError::SaveTimeout(timeout))??;

    debug!(identity = %identity, "State saved");
    Ok(())
}

async fn checkpoint_loop(
    store: BoxedStore,
    identity: BotIdentity,
    state: SharedState,
    interval: Duration,
    save_timeout: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = save_snapshot(store.as_ref(), &identity, &state, save_timeout).await {
                    warn!(identity = %identity, error = %e, "Checkpoint failed");
                }
            }
        }
    }
    debug!(identity = %identity, "Checkpoint task stopped");
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for creating a [`BotRuntime`] from layered configuration.
///
/// ```rust,ignore
/// let runtime = BotRuntime::builder()
///     .config_file("config/botkit.toml")
///     .profile("production")
///     .build_with(|config| Ok(make_dispatcher(config)))?;
/// ```
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new(),
        }
    }

    /// Sets a specific configuration file to load.
    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g. "development", "production").
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges configuration programmatically, below files and environment.
    pub fn merge(mut self, config: BotkitConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Loads the configuration without building a runtime.
    pub fn load_config(self) -> RuntimeResult<BotkitConfig> {
        Ok(self.config_loader.load()?)
    }

    /// Builds the runtime around `dispatcher`.
    pub fn build(self, dispatcher: BoxedDispatcher) -> RuntimeResult<BotRuntime> {
        self.build_with(|_| Ok(dispatcher))
    }

    /// Builds the runtime, creating the dispatcher from the loaded configuration.
    pub fn build_with<F>(self, make_dispatcher: F) -> RuntimeResult<BotRuntime>
    where
        F: FnOnce(&BotkitConfig) -> RuntimeResult<BoxedDispatcher>,
    {
        let config = self.config_loader.load()?;
        let dispatcher = make_dispatcher(&config)?;
        BotRuntime::from_config(config, dispatcher)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use botkit_core::{
        HandlerError, HandlerResult, KvBackend, Reply, StoreError, Update,
    };

    use super::*;
    use crate::config::{ConfigError, ErrorPolicy, StatusPersistence};
    use crate::handler::HandlerContext;
    use crate::test_support::{FlakyStore, TestDispatcher};

    struct Harness {
        runtime: Arc<BotRuntime>,
        dispatcher: Arc<TestDispatcher>,
        store: Arc<FlakyStore>,
    }

    impl Harness {
        fn new(config: BotkitConfig) -> Self {
            let store = Arc::new(FlakyStore::new());
            let dispatcher = Arc::new(TestDispatcher::new());
            let runtime = BotRuntime::with_store(
                config,
                bot1(),
                store.clone(),
                dispatcher.clone(),
            );
            Self {
                runtime: Arc::new(runtime),
                dispatcher,
                store,
            }
        }

        async fn send(&self, text: &str) -> Option<Reply> {
            self.dispatcher
                .inner
                .dispatch(Update::message(1, 7, text))
                .await
                .unwrap()
        }

        async fn persisted(&self) -> BotState {
            self.store.inner.load(&bot1()).await.unwrap()
        }

        async fn persisted_status(&self) -> Option<StatusRecord> {
            self.store.inner.load_status(&bot1()).await.unwrap()
        }
    }

    fn bot1() -> BotIdentity {
        BotIdentity::new("bot1").unwrap()
    }

    fn config() -> BotkitConfig {
        let mut config = BotkitConfig::default();
        config.bot.name = Some("bot1".into());
        config
    }

    async fn bump(ctx: HandlerContext) -> HandlerResult<String> {
        let n = ctx.with_state(|s| s.increment("counter", 1)).await;
        Ok(format!("counter={n}"))
    }

    async fn broken(_ctx: HandlerContext) -> HandlerResult<()> {
        Err(HandlerError::msg("boom"))
    }

    async fn slow(_ctx: HandlerContext) -> HandlerResult<()> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    }

    #[tokio::test]
    async fn test_counter_survives_stop() {
        let h = Harness::new(config());
        h.runtime.on_message(bump);

        h.runtime.start().await.unwrap();
        assert_eq!(h.runtime.lifecycle_state(), LifecycleState::Running);
        assert_eq!(h.runtime.status().unwrap().status, BotStatus::Running);

        assert_eq!(h.send("hello").await, Some(Reply::text("counter=1")));

        let report = h.runtime.stop().await.unwrap();
        assert!(report.state_saved);
        assert!(report.drained);
        assert_eq!(report.record.status, BotStatus::Stopped);
        assert_eq!(report.record.error, None);

        let persisted = h.persisted().await;
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted.get::<i64>("counter"), Some(1));
        assert_eq!(
            h.persisted_status().await.unwrap().status,
            BotStatus::Stopped
        );
        assert_eq!(h.runtime.lifecycle_state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_restart_reloads_state() {
        let h = Harness::new(config());
        h.runtime.on_message(bump);

        h.runtime.start().await.unwrap();
        h.send("one").await;
        h.runtime.stop().await.unwrap();

        h.runtime.start().await.unwrap();
        assert_eq!(h.send("two").await, Some(Reply::text("counter=2")));
        assert_eq!(h.dispatcher.inner.route_count(), 1);
        h.runtime.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_double_stop_is_idempotent() {
        let h = Harness::new(config());
        h.runtime.start().await.unwrap();

        let first = h.runtime.stop().await.unwrap();
        let second = h.runtime.stop().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(h.runtime.status().unwrap(), first.record);
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let h = Harness::new(config());

        let report = h.runtime.stop().await.unwrap();
        assert_eq!(report.record.status, BotStatus::Stopped);
        assert!(report.state_saved);
        assert_eq!(h.store.inner.backend().keys(), vec!["status:bot1"]);
    }

    #[tokio::test]
    async fn test_start_while_running_is_noop() {
        let h = Harness::new(config());
        h.runtime.start().await.unwrap();
        h.runtime.start().await.unwrap();

        assert_eq!(h.dispatcher.starts.load(Ordering::SeqCst), 1);
        assert_eq!(h.runtime.lifecycle_state(), LifecycleState::Running);
    }

    #[tokio::test]
    async fn test_store_outage_during_load() {
        let h = Harness::new(config());
        h.store.fail_load.store(true, Ordering::SeqCst);
        h.runtime.on_message(bump);

        h.runtime.start().await.unwrap();
        assert_eq!(h.runtime.lifecycle_state(), LifecycleState::Running);
        assert!(h.runtime.state().lock().await.is_empty());
        assert_eq!(h.send("hi").await, Some(Reply::text("counter=1")));
    }

    #[tokio::test]
    async fn test_corrupt_state_starts_empty() {
        let h = Harness::new(config());
        h.store
            .inner
            .backend()
            .set("state:bot1", b"not json".to_vec())
            .await
            .unwrap();

        h.runtime.start().await.unwrap();
        assert!(h.runtime.state().lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_state_defaults_fill_missing_keys() {
        let h = Harness::new(config());
        let mut saved = BotState::new();
        saved.set("messages_echoed", 4).unwrap();
        h.store.inner.save(&bot1(), &saved).await.unwrap();

        let mut defaults = BotState::new();
        defaults.set("messages_echoed", 0).unwrap();
        defaults.set("users", Vec::<i64>::new()).unwrap();
        h.runtime.set_state_defaults(defaults);

        h.runtime.start().await.unwrap();
        let state = h.runtime.state();
        let state = state.lock().await;
        assert_eq!(state.get::<i64>("messages_echoed"), Some(4));
        assert_eq!(state.get::<Vec<i64>>("users"), Some(vec![]));
    }

    #[tokio::test]
    async fn test_dispatcher_failure_during_start() {
        let h = Harness::new(config());
        h.dispatcher.fail_start.store(true, Ordering::SeqCst);
        h.runtime.on_message(bump);

        let err = h.runtime.start().await.unwrap_err();
        assert!(matches!(err, RuntimeError::Dispatcher(_)));
        assert_eq!(h.runtime.lifecycle_state(), LifecycleState::Error);

        let record = h.runtime.status().unwrap();
        assert_eq!(record.status, BotStatus::Error);
        assert!(record.error.unwrap().contains("invalid token"));
        assert_eq!(h.dispatcher.inner.route_count(), 0);
        assert!(!h.dispatcher.inner.is_running());

        let report = h.runtime.stop().await.unwrap();
        assert_eq!(report.record.status, BotStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_timeout() {
        let h = Harness::new(config());
        h.dispatcher.hang_start.store(true, Ordering::SeqCst);

        let err = h.runtime.start().await.unwrap_err();
        assert!(matches!(err, RuntimeError::StartupTimeout(_)));
        assert_eq!(h.runtime.status().unwrap().status, BotStatus::Error);
    }

    #[tokio::test]
    async fn test_strict_status_persistence_fails_start() {
        let mut config = config();
        config.lifecycle.status_persistence = StatusPersistence::Strict;
        let h = Harness::new(config);
        h.store.fail_status.store(true, Ordering::SeqCst);

        let err = h.runtime.start().await.unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Status(StatusError::Persistence(StoreError::Unavailable { .. }))
        ));
        assert_eq!(h.runtime.lifecycle_state(), LifecycleState::Error);
    }

    #[tokio::test]
    async fn test_handler_error_keeps_processing() {
        let h = Harness::new(config());
        h.runtime.on_command("fail", broken).on_message(bump);
        h.runtime.start().await.unwrap();

        let reply = h.send("/fail").await.unwrap();
        assert_eq!(reply.text, h.runtime.config().lifecycle.failure_reply);
        assert_eq!(h.runtime.lifecycle_state(), LifecycleState::Error);
        let record = h.runtime.status().unwrap();
        assert_eq!(record.status, BotStatus::Error);
        assert_eq!(record.error.as_deref(), Some("boom"));

        assert_eq!(h.send("next").await, Some(Reply::text("counter=1")));

        let report = h.runtime.stop().await.unwrap();
        assert_eq!(report.record.status, BotStatus::Stopped);
        assert_eq!(h.persisted().await.get::<i64>("counter"), Some(1));
    }

    #[tokio::test]
    async fn test_stop_policy_shuts_down_run() {
        let mut config = config();
        config.lifecycle.on_handler_error = ErrorPolicy::Stop;
        let h = Harness::new(config);
        h.runtime.on_command("fail", broken);

        let run = {
            let runtime = Arc::clone(&h.runtime);
            tokio::spawn(async move { runtime.run_until(std::future::pending()).await })
        };
        while !h.dispatcher.inner.is_running() {
            tokio::task::yield_now().await;
        }

        h.send("/fail").await;
        let report = run.await.unwrap().unwrap();
        assert_eq!(report.record.status, BotStatus::Stopped);
        assert_eq!(h.runtime.lifecycle_state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_run_until_signal() {
        let h = Harness::new(config());
        let report = h.runtime.run_until(async {}).await.unwrap();
        assert_eq!(report.record.status, BotStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_while_starting_stops_bot() {
        let h = Harness::new(config());
        h.dispatcher.start_delay_ms.store(1_000, Ordering::SeqCst);

        let report = h
            .runtime
            .run_until(tokio::time::sleep(Duration::from_millis(10)))
            .await
            .unwrap();

        assert_eq!(report.record.status, BotStatus::Stopped);
        assert_eq!(h.runtime.lifecycle_state(), LifecycleState::Stopped);
        assert!(!h.dispatcher.inner.is_running());
        assert_eq!(
            h.persisted_status().await.unwrap().status,
            BotStatus::Stopped
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_request_while_starting_stops_bot() {
        let h = Harness::new(config());
        h.dispatcher.start_delay_ms.store(1_000, Ordering::SeqCst);

        let runtime = h.runtime.clone();
        let run = tokio::spawn(async move { runtime.run_until(std::future::pending()).await });
        while h.runtime.lifecycle_state() != LifecycleState::Starting {
            tokio::task::yield_now().await;
        }
        h.runtime.shutdown_handle().request();

        let report = run.await.unwrap().unwrap();
        assert_eq!(report.record.status, BotStatus::Stopped);
        assert!(!h.dispatcher.inner.is_running());
        assert_eq!(
            h.persisted_status().await.unwrap().status,
            BotStatus::Stopped
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_store_on_stop() {
        let h = Harness::new(config());
        h.runtime.on_message(bump);
        h.runtime.start().await.unwrap();
        h.send("hi").await;

        h.store.stall_save.store(true, Ordering::SeqCst);
        let report = h.runtime.stop().await.unwrap();

        assert!(!report.state_saved);
        assert_eq!(report.record.status, BotStatus::Stopped);
        assert!(report.record.error.unwrap().contains("did not finish"));
    }

    #[tokio::test]
    async fn test_failed_final_save_still_stops() {
        let h = Harness::new(config());
        h.runtime.start().await.unwrap();
        h.store.fail_save.store(true, Ordering::SeqCst);

        let report = h.runtime.stop().await.unwrap();
        assert!(!report.state_saved);
        assert_eq!(report.record.status, BotStatus::Stopped);
        assert!(report.record.error.unwrap().contains("connection refused"));
        assert_eq!(
            h.persisted_status().await.unwrap().status,
            BotStatus::Stopped
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_drain_is_bounded() {
        let mut config = config();
        config.lifecycle.drain_timeout_ms = 100;
        let h = Harness::new(config);
        h.runtime.on_command("slow", slow);
        h.runtime.start().await.unwrap();

        let dispatcher = Arc::clone(&h.dispatcher);
        tokio::spawn(async move { dispatcher.inner.dispatch(Update::message(1, 7, "/slow")).await });
        tokio::time::sleep(Duration::from_millis(1)).await;

        let report = h.runtime.stop().await.unwrap();
        assert!(!report.drained);
        assert!(report.state_saved);
        assert_eq!(report.record.status, BotStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_undrained_handler_serializes_with_next_run() {
        let mut config = config();
        config.lifecycle.drain_timeout_ms = 100;
        let h = Harness::new(config);
        h.runtime.on_command("slow", slow);
        h.runtime.on_message(bump);
        h.runtime.start().await.unwrap();

        let dispatcher = Arc::clone(&h.dispatcher);
        tokio::spawn(async move { dispatcher.inner.dispatch(Update::message(1, 7, "/slow")).await });
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(!h.runtime.stop().await.unwrap().drained);

        h.runtime.start().await.unwrap();
        let dispatcher = Arc::clone(&h.dispatcher);
        let next = tokio::spawn(async move { dispatcher.inner.dispatch(Update::message(1, 7, "hi")).await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!next.is_finished());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(next.await.unwrap().unwrap(), Some(Reply::text("counter=1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_supersedes_pending_start() {
        let h = Harness::new(config());
        h.dispatcher.start_delay_ms.store(50, Ordering::SeqCst);

        let (first, second, stopped) =
            tokio::join!(h.runtime.start(), h.runtime.start(), h.runtime.stop());

        assert!(first.is_ok());
        assert!(matches!(second, Err(RuntimeError::StartCancelled)));
        assert_eq!(stopped.unwrap().record.status, BotStatus::Stopped);
        assert_eq!(h.runtime.lifecycle_state(), LifecycleState::Stopped);
        assert_eq!(h.dispatcher.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fail_keeps_reason() {
        let h = Harness::new(config());
        h.runtime.start().await.unwrap();

        let report = h.runtime.fail("store connection lost").await.unwrap();
        assert_eq!(report.record.status, BotStatus::Stopped);
        assert_eq!(report.record.error.as_deref(), Some("store connection lost"));
    }

    #[tokio::test]
    async fn test_webhook_reported_when_running() {
        let mut config = config();
        config.bot.webhook_url = Some("https://bots.example.com/bot1".into());
        let h = Harness::new(config);

        h.runtime.start().await.unwrap();
        assert_eq!(
            h.persisted_status().await.unwrap().webhook_url.as_deref(),
            Some("https://bots.example.com/bot1")
        );
    }

    #[tokio::test]
    async fn test_checkpoint_requires_loaded_state() {
        let h = Harness::new(config());
        assert!(matches!(
            h.runtime.checkpoint().await,
            Err(RuntimeError::StateNotLoaded)
        ));

        h.runtime.start().await.unwrap();
        h.runtime.state().lock().await.increment("counter", 3);
        h.runtime.checkpoint().await.unwrap();
        assert_eq!(h.persisted().await.get::<i64>("counter"), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_checkpoint() {
        let mut config = config();
        config.lifecycle.checkpoint_interval_ms = Some(1_000);
        let h = Harness::new(config);
        h.runtime.start().await.unwrap();

        h.runtime.state().lock().await.increment("counter", 5);
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(h.persisted().await.get::<i64>("counter"), Some(5));

        h.runtime.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_from_config_validates() {
        let dispatcher: BoxedDispatcher = Arc::new(TestDispatcher::new());
        let err = BotRuntime::from_config(BotkitConfig::default(), Arc::clone(&dispatcher))
            .unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Config(ConfigError::MissingField { .. })
        ));

        let dir = tempfile::tempdir().unwrap();
        let mut config = BotkitConfig::default();
        config.bot.token = Some("4242:secret".into());
        config.bot.store_url = format!("file://{}", dir.path().display());

        let runtime = BotRuntime::from_config(config, dispatcher).unwrap();
        assert_eq!(runtime.identity().as_str(), "4242");
        runtime.start().await.unwrap();
        runtime.stop().await.unwrap();
        assert!(dir.path().join("status").join("4242.json").exists());
    }
}
