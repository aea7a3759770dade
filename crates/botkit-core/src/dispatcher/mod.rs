//! Contract with the chat-platform SDK.
//!
//! The runtime never parses platform traffic itself. It hands handlers to a
//! [`Dispatcher`] (the SDK side) and drives its lifecycle:
//!
//! ```text
//! ┌────────────┐ register_handler ┌────────────┐  Update   ┌──────────────┐
//! │ BotRuntime │─────────────────▶│ Dispatcher │──────────▶│ UpdateHandler│
//! │            │ initialize/start │   (SDK)    │◀──────────│  (guarded)   │
//! └────────────┘      stop        └────────────┘   Reply   └──────────────┘
//! ```
//!
//! Handlers given to a dispatcher are infallible: errors have already been
//! mapped to a status update and a failure reply by the runtime.

mod local;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DispatchResult;

pub use local::LocalDispatcher;

/// A pinned, boxed, `Send` future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A handler as seen by the dispatcher.
pub type UpdateHandler = Arc<dyn Fn(Update) -> BoxFuture<'static, Option<Reply>> + Send + Sync>;

/// Boxes an async function into an [`UpdateHandler`].
///
/// ```rust
/// use botkit_core::dispatcher::{Reply, into_update_handler};
///
/// let handler = into_update_handler(|update| async move {
///     update.text.map(Reply::text)
/// });
/// ```
pub fn into_update_handler<F, Fut>(f: F) -> UpdateHandler
where
    F: Fn(Update) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<Reply>> + Send + 'static,
{
    Arc::new(move |update: Update| -> BoxFuture<'static, Option<Reply>> { Box::pin(f(update)) })
}

/// A platform-neutral incoming update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    /// Platform update id.
    pub update_id: u64,
    /// Chat the update belongs to.
    pub chat_id: i64,
    /// Sender, when the platform reports one.
    #[serde(default)]
    pub user_id: Option<i64>,
    /// Message text.
    #[serde(default)]
    pub text: Option<String>,
    /// Payload of a pressed inline button.
    #[serde(default)]
    pub callback_data: Option<String>,
}

impl Update {
    /// Creates a text message update.
    pub fn message(chat_id: i64, user_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            user_id: Some(user_id),
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// Creates a callback-query update.
    pub fn callback(chat_id: i64, user_id: i64, data: impl Into<String>) -> Self {
        Self {
            chat_id,
            user_id: Some(user_id),
            callback_data: Some(data.into()),
            ..Default::default()
        }
    }

    /// Sets the update id.
    pub fn with_id(mut self, update_id: u64) -> Self {
        self.update_id = update_id;
        self
    }

    /// Parses `/name@botname args` into `(name, args)`.
    ///
    /// Returns `None` for plain text and callback updates.
    pub fn command(&self) -> Option<(&str, &str)> {
        let text = self.text.as_deref()?.trim_start();
        let body = text.strip_prefix('/')?;
        let (head, args) = match body.split_once(char::is_whitespace) {
            Some((head, args)) => (head, args.trim()),
            None => (body, ""),
        };
        let name = head.split('@').next().unwrap_or(head);
        if name.is_empty() {
            return None;
        }
        Some((name, args))
    }
}

/// What a registered handler responds to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum Trigger {
    /// A `/name` command.
    Command(String),
    /// Any text message that is not a command.
    Text,
    /// Any callback query.
    Callback,
    /// Every update.
    Any,
}

impl Trigger {
    /// Creates a command trigger, tolerating a leading `/`.
    pub fn command(name: impl Into<String>) -> Self {
        let name = name.into();
        match name.strip_prefix('/') {
            Some(stripped) => Self::Command(stripped.to_string()),
            None => Self::Command(name),
        }
    }

    /// Returns whether this trigger selects `update`.
    pub fn matches(&self, update: &Update) -> bool {
        match self {
            Self::Command(name) => update
                .command()
                .is_some_and(|(cmd, _)| cmd.eq_ignore_ascii_case(name)),
            Self::Text => update.text.is_some() && update.command().is_none(),
            Self::Callback => update.callback_data.is_some(),
            Self::Any => true,
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Command(name) => write!(f, "/{name}"),
            Self::Text => write!(f, "text"),
            Self::Callback => write!(f, "callback"),
            Self::Any => write!(f, "any"),
        }
    }
}

/// A response the dispatcher sends back to the update's chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    /// Text to send.
    pub text: String,
}

impl Reply {
    /// Creates a text reply.
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// The chat-platform SDK as seen by the runtime.
///
/// Implementations wrap a concrete SDK and must make `stop` safe to call
/// whether or not `start` succeeded.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Short dispatcher name for logging.
    fn name(&self) -> &str;

    /// Registers `handler` for updates selected by `trigger`.
    fn register_handler(&self, trigger: Trigger, handler: UpdateHandler) -> DispatchResult<()>;

    /// Drops all registered handlers.
    fn clear_handlers(&self);

    /// Prepares the SDK (credentials, webhook setup, ...).
    async fn initialize(&self) -> DispatchResult<()>;

    /// Begins delivering updates to handlers.
    async fn start(&self) -> DispatchResult<()>;

    /// Stops delivering updates and waits for in-flight handlers.
    async fn stop(&self) -> DispatchResult<()>;
}

/// A shared dispatcher trait object.
pub type BoxedDispatcher = Arc<dyn Dispatcher>;
