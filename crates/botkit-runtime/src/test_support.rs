//! Shared fixtures for runtime tests.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use botkit_core::{
    BotIdentity, BotState, DispatchError, DispatchResult, Dispatcher, KvStateStore,
    LocalDispatcher, MemoryBackend, StateStore, StatusRecord, StoreError, StoreResult, Trigger,
    UpdateHandler,
};

/// Store wrapper whose operations can be made to fail or stall.
pub struct FlakyStore {
    pub inner: KvStateStore<MemoryBackend>,
    pub fail_load: AtomicBool,
    pub fail_save: AtomicBool,
    pub fail_status: AtomicBool,
    pub stall_save: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: KvStateStore::new(MemoryBackend::new()),
            fail_load: AtomicBool::new(false),
            fail_save: AtomicBool::new(false),
            fail_status: AtomicBool::new(false),
            stall_save: AtomicBool::new(false),
        }
    }

    fn check(flag: &AtomicBool) -> StoreResult<()> {
        if flag.load(Ordering::SeqCst) {
            Err(StoreError::unavailable("connection refused"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StateStore for FlakyStore {
    async fn load(&self, identity: &BotIdentity) -> StoreResult<BotState> {
        Self::check(&self.fail_load)?;
        self.inner.load(identity).await
    }

    async fn save(&self, identity: &BotIdentity, state: &BotState) -> StoreResult<()> {
        if self.stall_save.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Self::check(&self.fail_save)?;
        self.inner.save(identity, state).await
    }

    async fn load_status(&self, identity: &BotIdentity) -> StoreResult<Option<StatusRecord>> {
        self.inner.load_status(identity).await
    }

    async fn save_status(&self, identity: &BotIdentity, record: &StatusRecord) -> StoreResult<()> {
        Self::check(&self.fail_status)?;
        self.inner.save_status(identity, record).await
    }
}

/// [`LocalDispatcher`] whose startup can be made to fail, hang or lag.
pub struct TestDispatcher {
    pub inner: LocalDispatcher,
    pub fail_start: AtomicBool,
    pub hang_start: AtomicBool,
    pub start_delay_ms: AtomicU64,
    pub starts: AtomicUsize,
}

impl TestDispatcher {
    pub fn new() -> Self {
        Self {
            inner: LocalDispatcher::new("test"),
            fail_start: AtomicBool::new(false),
            hang_start: AtomicBool::new(false),
            start_delay_ms: AtomicU64::new(0),
            starts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Dispatcher for TestDispatcher {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn register_handler(&self, trigger: Trigger, handler: UpdateHandler) -> DispatchResult<()> {
        self.inner.register_handler(trigger, handler)
    }

    fn clear_handlers(&self) {
        self.inner.clear_handlers();
    }

    async fn initialize(&self) -> DispatchResult<()> {
        self.inner.initialize().await
    }

    async fn start(&self) -> DispatchResult<()> {
        let delay = self.start_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.hang_start.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(DispatchError::Initialization("invalid token".into()));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.inner.start().await
    }

    async fn stop(&self) -> DispatchResult<()> {
        self.inner.stop().await
    }
}
