//! History Storage Abstraction
//!
//! Information Hiding:
//! - Durable log and fast cache are separate traits with separate failure types
//! - Backends (SQLite, Redis, in-process) hide their data layout and protocols
//! - The coordinator in `crate::history` is the only component combining them

use crate::history::{CacheDegraded, ConversationKey, StoreError, Turn};
use async_trait::async_trait;
use std::time::Duration;

pub mod memory;
pub mod redis;
pub mod sqlite;

pub use memory::InMemoryHistoryCache;
pub use self::redis::RedisHistoryCache;
pub use sqlite::SqliteHistoryStore;

/// Authoritative, append-only conversation log
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Record one turn. Returns only once the row is committed.
    async fn append_turn(&self, key: &ConversationKey, turn: &Turn) -> Result<(), StoreError>;

    /// Up to `limit` most recent turns, oldest first
    async fn read_recent_turns(
        &self,
        key: &ConversationKey,
        limit: usize,
    ) -> Result<Vec<Turn>, StoreError>;
}

/// Outcome of a cache lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheRead {
    Hit(Vec<Turn>),
    Miss,
}

/// What `append_bounded` does when the key is not cached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendMode {
    /// Start a new list holding just this turn
    CreateIfAbsent,
    /// Leave the key absent; the next read repopulates it from the store
    IfCached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    Skipped,
}

/// Bounded, ordered, expiring view of the most recent turns per conversation
#[async_trait]
pub trait HistoryCache: Send + Sync {
    /// Up to `limit` most recent cached turns, oldest first.
    /// An absent key reads as `CacheRead::Miss`.
    async fn read_ordered(
        &self,
        key: &ConversationKey,
        limit: usize,
    ) -> Result<CacheRead, CacheDegraded>;

    /// Atomically replace the cached list and reset its expiry
    async fn replace(
        &self,
        key: &ConversationKey,
        turns: &[Turn],
        ttl: Duration,
    ) -> Result<(), CacheDegraded>;

    /// Atomically push `turn`, keep the last `max_len` entries and reset expiry
    async fn append_bounded(
        &self,
        key: &ConversationKey,
        turn: &Turn,
        max_len: usize,
        ttl: Duration,
        mode: AppendMode,
    ) -> Result<AppendOutcome, CacheDegraded>;

    /// Drop the cached list for `key`
    async fn invalidate(&self, key: &ConversationKey) -> Result<(), CacheDegraded>;
}
