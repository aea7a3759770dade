//! # botkit Core
//!
//! Data model and contracts shared by the botkit runtime and the SDK
//! integrations that plug into it.
//!
//! ## Data Model
//!
//! - [`BotIdentity`]: opaque key namespacing one bot's records in a store
//! - [`BotState`]: schema-less JSON state owned by one bot instance
//! - [`StatusRecord`] / [`BotStatus`]: lifecycle status, last error, webhook URL
//!
//! ## Contracts
//!
//! - [`StateStore`]: load/save of state and status records, with
//!   [`KvStateStore`] over the [`MemoryBackend`] and [`FileBackend`] backends
//! - [`Dispatcher`]: the chat-platform SDK, driven by the runtime
//!
//! ```text
//! ┌─────────────┐      ┌────────────┐      ┌───────────┐
//! │  Dispatcher │◀────▶│ BotRuntime │◀────▶│ StateStore│
//! │    (SDK)    │      │ (runtime)  │      │ (backend) │
//! └─────────────┘      └────────────┘      └───────────┘
//! ```

pub mod dispatcher;
pub mod error;
pub mod identity;
pub mod state;
pub mod status;
pub mod store;

pub use dispatcher::{
    BoxFuture, BoxedDispatcher, Dispatcher, LocalDispatcher, Reply, Trigger, Update,
    UpdateHandler, into_update_handler,
};
pub use error::{
    DispatchError, DispatchResult, HandlerError, HandlerResult, IdentityError, StoreError,
    StoreResult,
};
pub use identity::BotIdentity;
pub use state::{BotState, SharedState};
pub use status::{BotStatus, StatusRecord};
pub use store::{
    BoxedStore, FileBackend, KvBackend, KvStateStore, MemoryBackend, StateStore, open_store,
};

/// Prelude for common imports.
pub mod prelude {
    pub use super::{
        BotIdentity, BotState, BotStatus, Dispatcher, HandlerError, HandlerResult, Reply,
        StateStore, StatusRecord, Trigger, Update,
    };
}
