//! Store and cache wrappers that count calls and fail on demand
#![allow(dead_code)]

use async_trait::async_trait;
use query_orchestrator::history::{CacheDegraded, ConversationKey, StoreError, Turn};
use query_orchestrator::storage::{
    AppendMode, AppendOutcome, CacheRead, HistoryCache, HistoryStore, InMemoryHistoryCache,
    SqliteHistoryStore,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
pub struct Switch(AtomicBool);

impl Switch {
    pub fn set(&self, on: bool) {
        self.0.store(on, Ordering::SeqCst);
    }

    pub fn on(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct FaultyStore {
    inner: SqliteHistoryStore,
    pub fail_appends: Switch,
    pub fail_reads: Switch,
    pub delay: std::sync::Mutex<Option<Duration>>,
    pub reads: AtomicUsize,
}

impl FaultyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: SqliteHistoryStore::in_memory().unwrap(),
            fail_appends: Switch::default(),
            fail_reads: Switch::default(),
            delay: std::sync::Mutex::new(None),
            reads: AtomicUsize::new(0),
        })
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    async fn maybe_sleep(&self) {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl HistoryStore for FaultyStore {
    async fn append_turn(&self, key: &ConversationKey, turn: &Turn) -> Result<(), StoreError> {
        self.maybe_sleep().await;
        if self.fail_appends.on() {
            return Err(StoreError::Task("simulated commit failure".to_string()));
        }
        self.inner.append_turn(key, turn).await
    }

    async fn read_recent_turns(
        &self,
        key: &ConversationKey,
        limit: usize,
    ) -> Result<Vec<Turn>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.maybe_sleep().await;
        if self.fail_reads.on() {
            return Err(StoreError::Task("simulated connection loss".to_string()));
        }
        self.inner.read_recent_turns(key, limit).await
    }
}

pub struct FaultyCache {
    pub inner: InMemoryHistoryCache,
    pub fail_reads: Switch,
    pub fail_writes: Switch,
    pub corrupt_reads: Switch,
    pub hang: Switch,
}

impl FaultyCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryHistoryCache::default(),
            fail_reads: Switch::default(),
            fail_writes: Switch::default(),
            corrupt_reads: Switch::default(),
            hang: Switch::default(),
        })
    }

    /// Raw view of the cached list, bypassing the fault switches
    pub async fn peek(&self, key: &ConversationKey) -> CacheRead {
        self.inner.read_ordered(key, usize::MAX).await.unwrap()
    }

    async fn maybe_hang(&self) {
        if self.hang.on() {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }

    fn write_gate(&self) -> Result<(), CacheDegraded> {
        if self.fail_writes.on() {
            Err(CacheDegraded::Unreachable("simulated connection reset".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl HistoryCache for FaultyCache {
    async fn read_ordered(
        &self,
        key: &ConversationKey,
        limit: usize,
    ) -> Result<CacheRead, CacheDegraded> {
        self.maybe_hang().await;
        if self.fail_reads.on() {
            return Err(CacheDegraded::Unreachable("simulated connection reset".to_string()));
        }
        if self.corrupt_reads.on() {
            return Err(CacheDegraded::Corrupt("simulated bad payload".to_string()));
        }
        self.inner.read_ordered(key, limit).await
    }

    async fn replace(
        &self,
        key: &ConversationKey,
        turns: &[Turn],
        ttl: Duration,
    ) -> Result<(), CacheDegraded> {
        self.maybe_hang().await;
        self.write_gate()?;
        self.inner.replace(key, turns, ttl).await
    }

    async fn append_bounded(
        &self,
        key: &ConversationKey,
        turn: &Turn,
        max_len: usize,
        ttl: Duration,
        mode: AppendMode,
    ) -> Result<AppendOutcome, CacheDegraded> {
        self.maybe_hang().await;
        self.write_gate()?;
        self.inner.append_bounded(key, turn, max_len, ttl, mode).await
    }

    async fn invalidate(&self, key: &ConversationKey) -> Result<(), CacheDegraded> {
        self.maybe_hang().await;
        // Invalidation always reaches the inner cache so tests can observe it.
        self.inner.invalidate(key).await
    }
}
