//! History Coordinator
//!
//! Cache-aside over a durable log:
//! - read: cache hit returns immediately; a miss (or a degraded cache) falls
//!   back to the store and repopulates the cache
//! - append: store first, then a bounded cache append; only the store decides
//!   whether the append succeeded
//!
//! The miss path and the append path hold a per-conversation lock, so a
//! repopulation can never overwrite a turn appended concurrently. An append
//! keeps the lock until its store write has settled, even past a timeout.

use super::locks::KeyLocks;
use super::{CacheDegraded, ConversationKey, HistoryError, Role, StoreError, Turn};
use crate::config::HistoryConfig;
use crate::storage::{AppendMode, CacheRead, HistoryCache, HistoryStore};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;

/// Immutable limits applied by the coordinator
#[derive(Debug, Clone, Copy)]
pub struct HistoryPolicy {
    pub max_turns: usize,
    pub cache_ttl: Duration,
    pub operation_timeout: Duration,
}

impl From<&HistoryConfig> for HistoryPolicy {
    fn from(config: &HistoryConfig) -> Self {
        Self {
            max_turns: config.max_turns.max(1),
            cache_ttl: config.cache_ttl(),
            operation_timeout: config.operation_timeout(),
        }
    }
}

impl Default for HistoryPolicy {
    fn default() -> Self {
        Self {
            max_turns: 10,
            cache_ttl: Duration::from_secs(3600),
            operation_timeout: Duration::from_secs(2),
        }
    }
}

/// Counters for how reads were served
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HistoryStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub store_reads: u64,
    pub cache_degraded: u64,
}

#[derive(Default)]
struct Counters {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    store_reads: AtomicU64,
    cache_degraded: AtomicU64,
}

pub struct HistoryCoordinator {
    store: Arc<dyn HistoryStore>,
    cache: CacheHandle,
    policy: HistoryPolicy,
    locks: KeyLocks,
    counters: Arc<Counters>,
}

/// Cache access shared with detached append tasks
#[derive(Clone)]
struct CacheHandle {
    backend: Arc<dyn HistoryCache>,
    counters: Arc<Counters>,
    timeout: Duration,
}

impl HistoryCoordinator {
    pub fn new(
        store: Arc<dyn HistoryStore>,
        cache: Arc<dyn HistoryCache>,
        policy: HistoryPolicy,
    ) -> Self {
        let counters = Arc::new(Counters::default());
        Self {
            store,
            cache: CacheHandle {
                backend: cache,
                counters: Arc::clone(&counters),
                timeout: policy.operation_timeout,
            },
            policy,
            locks: KeyLocks::default(),
            counters,
        }
    }

    pub fn policy(&self) -> HistoryPolicy {
        self.policy
    }

    /// Most recent turns of a conversation, oldest first.
    ///
    /// `limit` defaults to, and is capped at, the configured `max_turns`.
    /// A conversation with no turns yields an empty vector.
    pub async fn get_history(
        &self,
        key: &ConversationKey,
        limit: Option<usize>,
    ) -> Result<Vec<Turn>, HistoryError> {
        let limit = limit
            .unwrap_or(self.policy.max_turns)
            .min(self.policy.max_turns);
        if limit == 0 {
            return Ok(Vec::new());
        }

        if let Some(turns) = self.read_cache(key, limit).await {
            return Ok(turns);
        }

        let _guard = self.locks.acquire(&key.to_string()).await;

        // Always load the full window so the repopulated entry serves any limit.
        self.counters.store_reads.fetch_add(1, Ordering::Relaxed);
        let turns = self
            .store_call(self.store.read_recent_turns(key, self.policy.max_turns))
            .await
            .inspect_err(|e| {
                tracing::error!(conversation = %key, error = %e, "History read failed")
            })?;

        if !turns.is_empty() {
            let repopulated = self
                .cache
                .call(self.cache.backend.replace(key, &turns, self.policy.cache_ttl))
                .await;
            if let Err(e) = repopulated {
                self.cache.degraded(key, "replace", &e);
            }
        }

        tracing::debug!(
            conversation = %key,
            loaded = turns.len(),
            "History served from store"
        );
        Ok(tail(turns, limit))
    }

    /// Record one turn. Succeeds once the store has committed it; cache
    /// trouble afterwards is logged and otherwise ignored.
    ///
    /// The write runs on its own task holding the conversation lock. If the
    /// caller gives up (timeout or drop) a late commit still updates the
    /// cache, and later appends for the same conversation wait for it.
    pub async fn append_history(
        &self,
        key: &ConversationKey,
        role: Role,
        content: impl Into<String>,
    ) -> Result<(), HistoryError> {
        let turn = Turn::new(role, content);
        let guard = self.locks.acquire(&key.to_string()).await;

        let (committed_tx, committed_rx) = oneshot::channel();
        let write = {
            let store = Arc::clone(&self.store);
            let cache = self.cache.clone();
            let policy = self.policy;
            let key = key.clone();
            tokio::spawn(async move {
                let result = store.append_turn(&key, &turn).await;
                let committed = result.is_ok();
                let _ = committed_tx.send(result);
                if committed {
                    cache.append_committed(&key, &turn, policy).await;
                }
                drop(guard);
            })
        };

        let committed = match timeout(self.policy.operation_timeout, committed_rx).await {
            Ok(Ok(result)) => result.map_err(HistoryError::from),
            Ok(Err(_)) => Err(HistoryError::StoreUnavailable(
                "append task ended before committing".to_string(),
            )),
            Err(_) => Err(self.timed_out()),
        };
        committed.inspect_err(|e| {
            tracing::error!(conversation = %key, role = %role, error = %e, "History append failed")
        })?;

        // Committed; wait for the cache step so a following read sees this turn.
        if let Err(e) = write.await {
            tracing::warn!(conversation = %key, error = %e, "History cache update task failed");
        }
        Ok(())
    }

    pub fn stats(&self) -> HistoryStats {
        HistoryStats {
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.counters.cache_misses.load(Ordering::Relaxed),
            store_reads: self.counters.store_reads.load(Ordering::Relaxed),
            cache_degraded: self.counters.cache_degraded.load(Ordering::Relaxed),
        }
    }

    async fn read_cache(&self, key: &ConversationKey, limit: usize) -> Option<Vec<Turn>> {
        match self.cache.call(self.cache.backend.read_ordered(key, limit)).await {
            Ok(CacheRead::Hit(turns)) => {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(conversation = %key, loaded = turns.len(), "History cache hit");
                Some(tail(turns, limit))
            }
            Ok(CacheRead::Miss) => {
                self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
                self.cache.degraded(key, "read_ordered", &e);
                if matches!(e, CacheDegraded::Corrupt(_)) {
                    self.cache.invalidate(key).await;
                }
                None
            }
        }
    }

    async fn store_call<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, HistoryError> {
        match timeout(self.policy.operation_timeout, call).await {
            Ok(result) => result.map_err(HistoryError::from),
            Err(_) => Err(self.timed_out()),
        }
    }

    fn timed_out(&self) -> HistoryError {
        HistoryError::StoreUnavailable(format!(
            "timed out after {}ms",
            self.policy.operation_timeout.as_millis()
        ))
    }
}

impl CacheHandle {
    async fn call<T>(
        &self,
        call: impl Future<Output = Result<T, CacheDegraded>>,
    ) -> Result<T, CacheDegraded> {
        timeout(self.timeout, call)
            .await
            .unwrap_or_else(|_| Err(CacheDegraded::TimedOut(self.timeout.as_millis())))
    }

    /// Mirror a committed turn into the cached list, if one is live.
    async fn append_committed(&self, key: &ConversationKey, turn: &Turn, policy: HistoryPolicy) {
        let cached = self
            .call(self.backend.append_bounded(
                key,
                turn,
                policy.max_turns,
                policy.cache_ttl,
                AppendMode::IfCached,
            ))
            .await;

        match cached {
            Ok(outcome) => {
                tracing::debug!(conversation = %key, role = %turn.role, ?outcome, "History appended");
            }
            Err(e) => {
                self.degraded(key, "append_bounded", &e);
                // The cached list may now lack this turn; drop it so the next
                // read goes to the store.
                self.invalidate(key).await;
            }
        }
    }

    async fn invalidate(&self, key: &ConversationKey) {
        if let Err(e) = self.call(self.backend.invalidate(key)).await {
            self.degraded(key, "invalidate", &e);
        }
    }

    fn degraded(&self, key: &ConversationKey, operation: &'static str, error: &CacheDegraded) {
        self.counters.cache_degraded.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            conversation = %key,
            operation,
            error = %error,
            "History cache degraded"
        );
    }
}

fn tail(mut turns: Vec<Turn>, limit: usize) -> Vec<Turn> {
    if turns.len() > limit {
        turns.drain(..turns.len() - limit);
    }
    turns
}
