//! In-Memory History Cache
//!
//! Information Hiding:
//! - HashMap of bounded lists hidden behind `HistoryCache`
//! - Each operation runs under one write lock, so push/trim/expire is atomic
//! - Expiry is checked lazily on access using tokio's clock; expired lists
//!   are dropped when read and swept whenever a list is repopulated
//!
//! Used when no Redis is configured, and by tests. Data is lost when the
//! process terminates, which is fine for a cache.

use super::{AppendMode, AppendOutcome, CacheRead, HistoryCache};
use crate::history::{CacheDegraded, ConversationKey, Turn};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

struct CachedList {
    turns: VecDeque<Turn>,
    expires_at: Instant,
}

impl CachedList {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// In-process cache keyed by the conversation's cache key
pub struct InMemoryHistoryCache {
    prefix: String,
    entries: Arc<RwLock<HashMap<String, CachedList>>>,
}

impl InMemoryHistoryCache {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of live cached conversations
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.read().await;
        entries.values().filter(|e| e.is_live(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryHistoryCache {
    fn default() -> Self {
        Self::new("chat-history")
    }
}

#[async_trait]
impl HistoryCache for InMemoryHistoryCache {
    async fn read_ordered(
        &self,
        key: &ConversationKey,
        limit: usize,
    ) -> Result<CacheRead, CacheDegraded> {
        let cache_key = key.cache_key(&self.prefix);
        let now = Instant::now();
        let (result, expired) = {
            let entries = self.entries.read().await;
            match entries.get(&cache_key) {
                Some(list) if list.is_live(now) && !list.turns.is_empty() => {
                    let skip = list.turns.len().saturating_sub(limit);
                    (CacheRead::Hit(list.turns.iter().skip(skip).cloned().collect()), false)
                }
                Some(_) => (CacheRead::Miss, true),
                None => (CacheRead::Miss, false),
            }
        };

        if expired {
            let mut entries = self.entries.write().await;
            // Re-check: a replace may have landed between the two locks.
            if entries.get(&cache_key).is_some_and(|e| !e.is_live(now)) {
                entries.remove(&cache_key);
            }
        }

        tracing::debug!(
            key = %cache_key,
            hit = matches!(result, CacheRead::Hit(_)),
            "[InMemoryHistoryCache] Read"
        );
        Ok(result)
    }

    async fn replace(
        &self,
        key: &ConversationKey,
        turns: &[Turn],
        ttl: Duration,
    ) -> Result<(), CacheDegraded> {
        let cache_key = key.cache_key(&self.prefix);
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, e| e.is_live(now));

        if turns.is_empty() {
            entries.remove(&cache_key);
        } else {
            entries.insert(
                cache_key.clone(),
                CachedList {
                    turns: turns.iter().cloned().collect(),
                    expires_at: now + ttl,
                },
            );
        }

        tracing::debug!(
            key = %cache_key,
            turns = turns.len(),
            "[InMemoryHistoryCache] Replaced"
        );
        Ok(())
    }

    async fn append_bounded(
        &self,
        key: &ConversationKey,
        turn: &Turn,
        max_len: usize,
        ttl: Duration,
        mode: AppendMode,
    ) -> Result<AppendOutcome, CacheDegraded> {
        let cache_key = key.cache_key(&self.prefix);
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        let live = entries.get(&cache_key).is_some_and(|e| e.is_live(now));
        if !live {
            entries.remove(&cache_key);
            if mode == AppendMode::IfCached {
                tracing::debug!(key = %cache_key, "[InMemoryHistoryCache] Append skipped, not cached");
                return Ok(AppendOutcome::Skipped);
            }
        }

        let list = entries
            .entry(cache_key.clone())
            .or_insert_with(|| CachedList {
                turns: VecDeque::new(),
                expires_at: now,
            });
        list.turns.push_back(turn.clone());
        while list.turns.len() > max_len {
            list.turns.pop_front();
        }
        list.expires_at = now + ttl;

        tracing::debug!(
            key = %cache_key,
            len = list.turns.len(),
            "[InMemoryHistoryCache] Appended"
        );
        Ok(AppendOutcome::Appended)
    }

    async fn invalidate(&self, key: &ConversationKey) -> Result<(), CacheDegraded> {
        let cache_key = key.cache_key(&self.prefix);
        let mut entries = self.entries.write().await;
        entries.remove(&cache_key);
        tracing::debug!(key = %cache_key, "[InMemoryHistoryCache] Invalidated");
        Ok(())
    }
}
