//! Update handlers and their isolation.
//!
//! Bot authors write plain async functions:
//!
//! ```rust,ignore
//! async fn stats(ctx: HandlerContext) -> HandlerResult<String> {
//!     let echoed = ctx.with_state(|s| s.get::<i64>("messages_echoed")).await;
//!     Ok(format!("Echoed {} messages", echoed.unwrap_or(0)))
//! }
//! ```
//!
//! Before reaching the dispatcher every handler is wrapped by a
//! [`HandlerGuard`]: invocations are serialized per bot, `Err` returns and
//! panics become an `error` status update, and the user gets the configured
//! failure reply instead of silence.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use botkit_core::{
    BotIdentity, BotState, BoxFuture, HandlerError, HandlerResult, Reply,
    SharedState, Trigger, Update, UpdateHandler, into_update_handler,
};
use futures::FutureExt;
use tracing::{Instrument, debug, error, info_span, trace, warn};

use crate::config::ErrorPolicy;
use crate::error::StatusError;
use crate::shutdown::ShutdownHandle;
use crate::status::StatusController;

// ============================================================================
// HandlerContext
// ============================================================================

/// Everything a handler gets to see for one update.
#[derive(Clone)]
pub struct HandlerContext {
    update: Update,
    identity: BotIdentity,
    state: SharedState,
}

impl HandlerContext {
    pub fn new(update: Update, identity: BotIdentity, state: SharedState) -> Self {
        Self {
            update,
            identity,
            state,
        }
    }

    pub fn update(&self) -> &Update {
        &self.update
    }

    pub fn identity(&self) -> &BotIdentity {
        &self.identity
    }

    /// Message text, if the update carries any.
    pub fn text(&self) -> Option<&str> {
        self.update.text.as_deref()
    }

    /// Arguments following a `/command`, empty for other updates.
    pub fn args(&self) -> &str {
        self.update.command().map_or("", |(_, args)| args)
    }

    /// Shared state handle.
    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Runs `f` with exclusive access to the bot state.
    pub async fn with_state<R>(&self, f: impl FnOnce(&mut BotState) -> R) -> R {
        let mut state = self.state.lock().await;
        f(&mut state)
    }
}

impl fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("update", &self.update)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// IntoReply - Handle handler return values
// ============================================================================

/// Types a handler may return on success.
pub trait IntoReply: Send {
    fn into_reply(self) -> Option<Reply>;
}

impl IntoReply for () {
    fn into_reply(self) -> Option<Reply> {
        None
    }
}

impl IntoReply for Reply {
    fn into_reply(self) -> Option<Reply> {
        Some(self)
    }
}

impl IntoReply for String {
    fn into_reply(self) -> Option<Reply> {
        Some(Reply::text(self))
    }
}

impl IntoReply for &'static str {
    fn into_reply(self) -> Option<Reply> {
        Some(Reply::text(self))
    }
}

impl<T: IntoReply> IntoReply for Option<T> {
    fn into_reply(self) -> Option<Reply> {
        self.and_then(IntoReply::into_reply)
    }
}

// ============================================================================
// Handler
// ============================================================================

/// An async function handling one update.
///
/// Implemented for every `Fn(HandlerContext) -> impl Future<Output =
/// HandlerResult<R>>` where `R` is [`IntoReply`].
pub trait Handler<R>: Send + Sync + 'static {
    fn call(&self, ctx: HandlerContext) -> BoxFuture<'static, HandlerResult<R>>;
}

impl<F, Fut, R> Handler<R> for F
where
    F: Fn(HandlerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<R>> + Send + 'static,
    R: IntoReply + 'static,
{
    fn call(&self, ctx: HandlerContext) -> BoxFuture<'static, HandlerResult<R>> {
        Box::pin((self)(ctx))
    }
}

/// Type-erased handler trait for dynamic dispatch.
pub trait ErasedHandler: Send + Sync {
    fn call(&self, ctx: HandlerContext) -> BoxFuture<'static, HandlerResult<Option<Reply>>>;
}

/// A type-erased handler that can be stored in collections.
pub type BoxedHandler = Arc<dyn ErasedHandler>;

struct HandlerFn<H, R> {
    handler: H,
    _marker: PhantomData<fn() -> R>,
}

impl<H, R> ErasedHandler for HandlerFn<H, R>
where
    H: Handler<R>,
    R: IntoReply + 'static,
{
    fn call(&self, ctx: HandlerContext) -> BoxFuture<'static, HandlerResult<Option<Reply>>> {
        let fut = self.handler.call(ctx);
        Box::pin(async move { fut.await.map(IntoReply::into_reply) })
    }
}

/// Convert a handler function into a boxed handler.
pub fn into_handler<H, R>(handler: H) -> BoxedHandler
where
    H: Handler<R>,
    R: IntoReply + 'static,
{
    Arc::new(HandlerFn {
        handler,
        _marker: PhantomData,
    })
}

// ============================================================================
// ErrorReporter
// ============================================================================

/// Reports runtime errors of a running bot.
///
/// Reports move the status to `error` and, under [`ErrorPolicy::Stop`],
/// request a graceful shutdown. Once the bot has drained on stop, reports
/// are only logged so they cannot overwrite the final `stopped` record.
#[derive(Clone)]
pub struct ErrorReporter {
    status: Arc<StatusController>,
    policy: ErrorPolicy,
    shutdown: ShutdownHandle,
    active: Arc<AtomicBool>,
}

impl ErrorReporter {
    pub(crate) fn new(
        status: Arc<StatusController>,
        policy: ErrorPolicy,
        shutdown: ShutdownHandle,
        active: Arc<AtomicBool>,
    ) -> Self {
        Self {
            status,
            policy,
            shutdown,
            active,
        }
    }

    pub async fn report(&self, error: impl fmt::Display) {
        let message = error.to_string();
        if !self.active.load(Ordering::SeqCst) {
            warn!(
                identity = %self.status.identity(),
                error = %message,
                "Error reported while the bot is not running"
            );
            return;
        }

        match self.status.report_error(message).await {
            Ok(Some(_)) => {}
            Ok(None) => return,
            Err(StatusError::Persistence(e)) => {
                error!(error = %e, "Status could not be persisted, requesting shutdown");
                self.shutdown.request();
            }
            Err(e) => warn!(error = %e, "Failed to record error status"),
        }

        if self.policy == ErrorPolicy::Stop {
            warn!(
                identity = %self.status.identity(),
                "Handler error policy is 'stop', requesting shutdown"
            );
            self.shutdown.request();
        }
    }
}

impl fmt::Debug for ErrorReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorReporter")
            .field("identity", self.status.identity())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// HandlerGuard
// ============================================================================

/// Wraps user handlers into infallible, serialized [`UpdateHandler`]s.
pub(crate) struct HandlerGuard {
    identity: BotIdentity,
    state: SharedState,
    serial: tokio::sync::Mutex<()>,
    reporter: ErrorReporter,
    failure_reply: String,
}

impl HandlerGuard {
    pub(crate) fn new(
        identity: BotIdentity,
        state: SharedState,
        reporter: ErrorReporter,
        failure_reply: String,
    ) -> Self {
        Self {
            identity,
            state,
            serial: tokio::sync::Mutex::new(()),
            reporter,
            failure_reply,
        }
    }

    pub(crate) fn wrap(self: &Arc<Self>, trigger: Trigger, handler: BoxedHandler) -> UpdateHandler {
        let guard = Arc::clone(self);
        into_update_handler(move |update: Update| {
            let guard = Arc::clone(&guard);
            let handler = Arc::clone(&handler);
            let trigger = trigger.clone();
            async move { guard.invoke(&trigger, handler, update).await }
        })
    }

    async fn invoke(&self, trigger: &Trigger, handler: BoxedHandler, update: Update) -> Option<Reply> {
        let span = info_span!(
            "handler",
            identity = %self.identity,
            trigger = %trigger,
            update_id = update.update_id,
        );

        async move {
            let _serial = self.serial.lock().await;
            let ctx = HandlerContext::new(update, self.identity.clone(), Arc::clone(&self.state));

            let outcome = AssertUnwindSafe(async move { handler.call(ctx).await })
                .catch_unwind()
                .await;
            let result = outcome
                .unwrap_or_else(|panic| Err(HandlerError::Panicked(panic_message(panic.as_ref()))));

            match result {
                Ok(reply) => {
                    trace!(replied = reply.is_some(), "Handler completed");
                    reply
                }
                Err(err) => {
                    warn!(error = %err, "Handler failed");
                    self.reporter.report(&err).await;
                    debug!("Sending failure reply");
                    Some(Reply::text(self.failure_reply.clone()))
                }
            }
        }
        .instrument(span)
        .await
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use botkit_core::{BotStatus, KvStateStore, MemoryBackend};

    use super::*;
    use crate::config::StatusPersistence;

    fn status() -> Arc<StatusController> {
        Arc::new(StatusController::new(
            BotIdentity::new("bot1").unwrap(),
            Arc::new(KvStateStore::new(MemoryBackend::new())),
            StatusPersistence::BestEffort,
        ))
    }

    fn guard(status: Arc<StatusController>, policy: ErrorPolicy) -> (Arc<HandlerGuard>, ShutdownHandle) {
        let shutdown = ShutdownHandle::new();
        let reporter = ErrorReporter::new(
            status,
            policy,
            shutdown.clone(),
            Arc::new(AtomicBool::new(true)),
        );
        let guard = HandlerGuard::new(
            BotIdentity::new("bot1").unwrap(),
            BotState::new().into_shared(),
            reporter,
            "oops".to_string(),
        );
        (Arc::new(guard), shutdown)
    }

    async fn count(ctx: HandlerContext) -> HandlerResult<String> {
        let n = ctx.with_state(|s| s.increment("count", 1)).await;
        Ok(format!("count={n}"))
    }

    async fn fail(_ctx: HandlerContext) -> HandlerResult<()> {
        Err(HandlerError::msg("database exploded"))
    }

    async fn panics(_ctx: HandlerContext) -> HandlerResult<()> {
        panic!("kaboom")
    }

    #[test]
    fn test_into_reply() {
        assert_eq!(().into_reply(), None);
        assert_eq!("hi".into_reply(), Some(Reply::text("hi")));
        assert_eq!(Some(String::from("x")).into_reply(), Some(Reply::text("x")));
        assert_eq!(None::<Reply>.into_reply(), None);
    }

    #[tokio::test]
    async fn test_successful_handler_replies() {
        let (guard, _) = guard(status(), ErrorPolicy::Continue);
        let handler = guard.wrap(Trigger::Any, into_handler(count));

        assert_eq!(
            handler(Update::message(1, 1, "a")).await,
            Some(Reply::text("count=1"))
        );
        assert_eq!(
            handler(Update::message(1, 1, "b")).await,
            Some(Reply::text("count=2"))
        );
    }

    #[tokio::test]
    async fn test_error_maps_to_status_and_failure_reply() {
        let status = status();
        let (guard, shutdown) = guard(Arc::clone(&status), ErrorPolicy::Continue);
        let failing = guard.wrap(Trigger::Any, into_handler(fail));
        let working = guard.wrap(Trigger::Any, into_handler(count));

        assert_eq!(
            failing(Update::message(1, 1, "x")).await,
            Some(Reply::text("oops"))
        );
        let record = status.snapshot().unwrap();
        assert_eq!(record.status, BotStatus::Error);
        assert_eq!(record.error.as_deref(), Some("database exploded"));
        assert!(!shutdown.is_requested());

        // The next update is still handled.
        assert_eq!(
            working(Update::message(1, 1, "y")).await,
            Some(Reply::text("count=1"))
        );
    }

    #[tokio::test]
    async fn test_panic_is_caught() {
        let status = status();
        let (guard, _) = guard(Arc::clone(&status), ErrorPolicy::Continue);
        let handler = guard.wrap(Trigger::Any, into_handler(panics));

        assert_eq!(
            handler(Update::message(1, 1, "x")).await,
            Some(Reply::text("oops"))
        );
        let record = status.snapshot().unwrap();
        assert_eq!(record.status, BotStatus::Error);
        assert_eq!(record.error.as_deref(), Some("handler panicked: kaboom"));
    }

    #[tokio::test]
    async fn test_stop_policy_requests_shutdown() {
        let (guard, shutdown) = guard(status(), ErrorPolicy::Stop);
        let handler = guard.wrap(Trigger::Any, into_handler(fail));

        handler(Update::message(1, 1, "x")).await;
        assert!(shutdown.is_requested());
    }

    #[tokio::test]
    async fn test_inactive_reporter_only_logs() {
        let status = status();
        let reporter = ErrorReporter::new(
            Arc::clone(&status),
            ErrorPolicy::Stop,
            ShutdownHandle::new(),
            Arc::new(AtomicBool::new(false)),
        );
        reporter.report("late failure").await;
        assert!(status.snapshot().is_none());
    }

    #[tokio::test]
    async fn test_report_after_stop_keeps_stopped_record() {
        let status = status();
        status.update(BotStatus::Stopping, None, None).await.unwrap();
        let stopped = status.update(BotStatus::Stopped, None, None).await.unwrap();

        // Still flagged active, as when the flag is cleared after this report began.
        let shutdown = ShutdownHandle::new();
        let reporter = ErrorReporter::new(
            Arc::clone(&status),
            ErrorPolicy::Stop,
            shutdown.clone(),
            Arc::new(AtomicBool::new(true)),
        );
        reporter.report("late failure").await;

        assert_eq!(status.snapshot(), Some(stopped));
        assert!(!shutdown.is_requested());
    }

    #[tokio::test]
    async fn test_invocations_are_serialized() {
        let (guard, _) = guard(status(), ErrorPolicy::Continue);
        let handler = guard.wrap(
            Trigger::Any,
            into_handler(|ctx: HandlerContext| async move {
                let before = ctx.with_state(|s| s.increment("active", 1)).await;
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                ctx.with_state(|s| s.increment("active", -1)).await;
                Ok::<_, HandlerError>(before.to_string())
            }),
        );

        let replies = futures::future::join_all(
            (0..5).map(|i| handler(Update::message(1, 1, format!("m{i}")))),
        )
        .await;
        assert!(replies.iter().all(|r| r == &Some(Reply::text("1"))));
    }
}
