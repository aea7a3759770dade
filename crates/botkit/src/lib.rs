//! # botkit
//!
//! Lifecycle control, persisted state and status tracking for chat bots.
//!
//! ## Overview
//!
//! botkit sits between a chat-platform SDK and a key-value store. It starts
//! and stops one bot instance, keeps the bot's state across restarts and
//! publishes a status record that other processes can read.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐ updates ┌────────────┐ load/save ┌────────────┐
//! │ Dispatcher │────────▶│ BotRuntime │──────────▶│ StateStore │
//! │   (SDK)    │◀────────│            │──────────▶│ (memory,   │
//! └────────────┘ replies └────────────┘  status   │  file)     │
//!                               │                 └────────────┘
//!                               ▼
//!                         handlers (user code)
//! ```
//!
//! - **Dispatcher**: the platform SDK, delivering updates to handlers
//! - **BotRuntime**: start/stop, state loading, final save, error capture
//! - **StateStore**: persisted `state:<id>` and `status:<id>` records
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use botkit::prelude::*;
//!
//! async fn count(ctx: HandlerContext) -> HandlerResult<String> {
//!     let n = ctx.with_state(|s| s.increment("messages", 1)).await;
//!     Ok(format!("message #{n}"))
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = BotRuntime::builder().build(Arc::new(LocalDispatcher::default()))?;
//!     runtime.on_message(count);
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: TOML configuration files (default)
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use botkit_core as core;
pub use botkit_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use botkit::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use botkit_runtime::{BotRuntime, LifecycleState, RuntimeBuilder, StopReport};

    // Handlers
    pub use botkit_runtime::{ErrorReporter, HandlerContext, IntoReply};

    // Configuration
    pub use botkit_runtime::{BotkitConfig, ErrorPolicy, StatusPersistence};

    // Data model and contracts
    pub use botkit_core::{
        BotIdentity, BotState, BotStatus, Dispatcher, HandlerError, HandlerResult,
        LocalDispatcher, Reply, StateStore, StatusRecord, Trigger, Update,
    };
}
