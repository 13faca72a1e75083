use thiserror::Error;

/// Failure of the durable store. Fatal to the operation in flight.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store task failed: {0}")]
    Task(String),

    #[error("store connection lock poisoned")]
    Poisoned,
}

/// Failure of the cache. Never surfaced past the coordinator: a degraded cache
/// behaves like a miss on read and like a no-op after an append.
#[derive(Debug, Error)]
pub enum CacheDegraded {
    #[error("cache unreachable: {0}")]
    Unreachable(String),

    #[error("corrupt cache entry: {0}")]
    Corrupt(String),

    #[error("cache call timed out after {0}ms")]
    TimedOut(u128),
}

impl From<redis::RedisError> for CacheDegraded {
    fn from(err: redis::RedisError) -> Self {
        CacheDegraded::Unreachable(err.to_string())
    }
}

/// The only failure that crosses the coordinator boundary
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<StoreError> for HistoryError {
    fn from(err: StoreError) -> Self {
        HistoryError::StoreUnavailable(err.to_string())
    }
}
