//! botkit Runtime - lifecycle layer for the botkit bot runtime.
//!
//! This crate provides:
//! - Bot lifecycle control (`BotRuntime`): start, graceful stop, restart
//! - Persisted status records (`StatusController`)
//! - Handler registration with error capture (`HandlerContext`, `Handler`)
//! - Layered configuration and logging setup
//!
//! ```ignore
//! use botkit_core::LocalDispatcher;
//! use botkit_runtime::{BotRuntime, HandlerContext};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = BotRuntime::builder().build(Arc::new(LocalDispatcher::default()))?;
//!
//!     runtime.on_command("start", |_ctx: HandlerContext| async { Ok("Hello!") });
//!
//!     // Run until Ctrl+C or SIGTERM
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Failure Handling
//!
//! A failing or panicking handler never takes the process down. The user gets
//! the configured failure reply, the status record moves to `error`, and the
//! bot keeps serving updates unless `lifecycle.on_handler_error` is `stop`.

pub mod config;
pub mod error;
pub mod handler;
pub mod logging;
pub mod runtime;
pub mod shutdown;
pub mod status;

#[cfg(test)]
mod test_support;

// Re-exports
pub use config::{
    BotConfig, BotkitConfig, ConfigError, ConfigLoader, ConfigResult, ErrorPolicy,
    LifecycleConfig, LoggingConfig, Profile, StatusPersistence,
};
pub use error::{RuntimeError, RuntimeResult, StatusError, StatusResult};
pub use handler::{BoxedHandler, ErrorReporter, Handler, HandlerContext, IntoReply, into_handler};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{BotRuntime, LifecycleState, RuntimeBuilder, StopReport};
pub use shutdown::{ShutdownHandle, shutdown_signal};
pub use status::StatusController;

// Re-export tracing for use by bot code
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// This provides the commonly used logging macros:
/// - `trace!`, `debug!`, `info!`, `warn!`, `error!`
/// - `span`, `event`
/// - `instrument` attribute
/// - `Level` for span creation
pub mod prelude {
    pub use tracing::{Level, debug, error, event, info, instrument, span, trace, warn};
}
