//! Redis History Cache
//!
//! Information Hiding:
//! - One Redis list per conversation, each element a JSON-encoded turn
//! - push/trim/expire run inside MULTI/EXEC so no partial state is visible
//! - The multiplexed connection is opened on first use (or by `connect`) and
//!   dropped after a failed command, so the next call reconnects

use super::{AppendMode, AppendOutcome, CacheRead, HistoryCache};
use crate::history::{CacheDegraded, ConversationKey, Turn};
use ::redis::aio::MultiplexedConnection;
use ::redis::{FromRedisValue, Pipeline};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::Mutex;

/// Cache backed by Redis (or Valkey) lists
pub struct RedisHistoryCache {
    client: ::redis::Client,
    prefix: String,
    connection: Mutex<Option<MultiplexedConnection>>,
}

impl RedisHistoryCache {
    /// Validate `url` and prepare a client. No connection is made yet.
    pub fn new(url: &str, prefix: impl Into<String>) -> Result<Self, CacheDegraded> {
        let client = ::redis::Client::open(url)?;
        Ok(Self {
            client,
            prefix: prefix.into(),
            connection: Mutex::new(None),
        })
    }

    /// Open the connection eagerly so startup logs show whether Redis is reachable.
    pub async fn connect(&self) -> Result<(), CacheDegraded> {
        let mut guard = self.connection.lock().await;
        self.ensure_connection(&mut guard).await.map(|_| ())
    }

    async fn ensure_connection<'a>(
        &self,
        connection: &'a mut Option<MultiplexedConnection>,
    ) -> Result<&'a mut MultiplexedConnection, CacheDegraded> {
        if connection.is_none() {
            let conn = self.client.get_multiplexed_async_connection().await?;
            tracing::info!(prefix = %self.prefix, "[RedisHistoryCache] Connected");
            *connection = Some(conn);
        }
        connection
            .as_mut()
            .ok_or_else(|| CacheDegraded::Unreachable("connection unavailable".to_string()))
    }

    async fn run<T>(&self, operation: &'static str, pipe: Pipeline) -> Result<T, CacheDegraded>
    where
        T: FromRedisValue + Send,
    {
        // The multiplexed handle is cheap to clone; the lock only guards (re)connects.
        let mut conn = {
            let mut guard = self.connection.lock().await;
            self.ensure_connection(&mut guard).await?.clone()
        };
        let result: ::redis::RedisResult<T> = pipe.query_async(&mut conn).await;
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                tracing::warn!(
                    operation,
                    error = %err,
                    "[RedisHistoryCache] Command failed, dropping connection"
                );
                *self.connection.lock().await = None;
                Err(err.into())
            }
        }
    }

    fn encode(turns: &[Turn]) -> Result<Vec<String>, CacheDegraded> {
        turns
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CacheDegraded::Corrupt(e.to_string()))
    }

    fn ttl_secs(ttl: Duration) -> u64 {
        ttl.as_secs().max(1)
    }
}

/// Decode a list read back from Redis. One bad element poisons the whole list.
fn decode_payloads(payloads: &[String]) -> Result<Vec<Turn>, CacheDegraded> {
    payloads
        .iter()
        .map(|payload| {
            serde_json::from_str::<Turn>(payload)
                .map_err(|e| CacheDegraded::Corrupt(format!("{}: {}", e, payload)))
        })
        .collect()
}

#[async_trait]
impl HistoryCache for RedisHistoryCache {
    async fn read_ordered(
        &self,
        key: &ConversationKey,
        limit: usize,
    ) -> Result<CacheRead, CacheDegraded> {
        if limit == 0 {
            return Ok(CacheRead::Miss);
        }
        let cache_key = key.cache_key(&self.prefix);
        let start = -(i64::try_from(limit).unwrap_or(i64::MAX));

        let mut pipe = ::redis::pipe();
        pipe.cmd("LRANGE").arg(&cache_key).arg(start).arg(-1);
        let (payloads,): (Vec<String>,) = self.run("read_ordered", pipe).await?;

        if payloads.is_empty() {
            tracing::debug!(key = %cache_key, "[RedisHistoryCache] Miss");
            return Ok(CacheRead::Miss);
        }

        let turns = decode_payloads(&payloads)?;
        tracing::debug!(key = %cache_key, loaded = turns.len(), "[RedisHistoryCache] Hit");
        Ok(CacheRead::Hit(turns))
    }

    async fn replace(
        &self,
        key: &ConversationKey,
        turns: &[Turn],
        ttl: Duration,
    ) -> Result<(), CacheDegraded> {
        let cache_key = key.cache_key(&self.prefix);
        let encoded = Self::encode(turns)?;

        let mut pipe = ::redis::pipe();
        pipe.atomic();
        pipe.cmd("DEL").arg(&cache_key).ignore();
        if !encoded.is_empty() {
            pipe.cmd("RPUSH").arg(&cache_key).arg(&encoded).ignore();
            pipe.cmd("EXPIRE")
                .arg(&cache_key)
                .arg(Self::ttl_secs(ttl))
                .ignore();
        }
        self.run::<()>("replace", pipe).await?;

        tracing::debug!(
            key = %cache_key,
            turns = encoded.len(),
            ttl_secs = Self::ttl_secs(ttl),
            "[RedisHistoryCache] Replaced"
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
        let payload =
            serde_json::to_string(turn).map_err(|e| CacheDegraded::Corrupt(e.to_string()))?;
        let keep_from = -(i64::try_from(max_len.max(1)).unwrap_or(i64::MAX));
        let push = match mode {
            AppendMode::CreateIfAbsent => "RPUSH",
            AppendMode::IfCached => "RPUSHX",
        };

        // LTRIM and EXPIRE are no-ops on a missing key, so a skipped RPUSHX
        // leaves nothing behind.
        let mut pipe = ::redis::pipe();
        pipe.atomic();
        pipe.cmd(push).arg(&cache_key).arg(&payload);
        pipe.cmd("LTRIM").arg(&cache_key).arg(keep_from).arg(-1).ignore();
        pipe.cmd("EXPIRE")
            .arg(&cache_key)
            .arg(Self::ttl_secs(ttl))
            .ignore();
        let (new_len,): (usize,) = self.run("append_bounded", pipe).await?;

        let outcome = if new_len == 0 {
            AppendOutcome::Skipped
        } else {
            AppendOutcome::Appended
        };
        tracing::debug!(
            key = %cache_key,
            ?outcome,
            "[RedisHistoryCache] Append"
        );
        Ok(outcome)
    }

    async fn invalidate(&self, key: &ConversationKey) -> Result<(), CacheDegraded> {
        let cache_key = key.cache_key(&self.prefix);
        let mut pipe = ::redis::pipe();
        pipe.cmd("DEL").arg(&cache_key).ignore();
        self.run::<()>("invalidate", pipe).await?;
        tracing::debug!(key = %cache_key, "[RedisHistoryCache] Invalidated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_rejects_whole_list_on_bad_element() {
        let payloads = vec![
            r#"{"role":"user","content":"ok"}"#.to_string(),
            "not json".to_string(),
        ];
        assert!(matches!(
            decode_payloads(&payloads),
            Err(CacheDegraded::Corrupt(_))
        ));
    }

    #[test]
    fn test_decode_preserves_order() {
        let payloads = vec![
            r#"{"role":"user","content":"q"}"#.to_string(),
            r#"{"role":"assistant","content":"a"}"#.to_string(),
        ];
        let turns = decode_payloads(&payloads).unwrap();
        assert_eq!(turns, vec![Turn::user("q"), Turn::assistant("a")]);
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        assert!(RedisHistoryCache::new("not-a-url", "p").is_err());
    }

    // Needs a live server: REDIS_URL=redis://127.0.0.1:6379/15 cargo test -- --ignored
    #[tokio::test]
    #[ignore]
    async fn test_live_append_trim_and_replace() {
        let url = std::env::var("REDIS_URL").unwrap();
        let cache = RedisHistoryCache::new(&url, "query-orchestrator-test").unwrap();
        let key = ConversationKey::new("live", "append");
        let ttl = Duration::from_secs(30);

        cache.invalidate(&key).await.unwrap();
        let skipped = cache
            .append_bounded(&key, &Turn::user("x"), 3, ttl, AppendMode::IfCached)
            .await
            .unwrap();
        assert_eq!(skipped, AppendOutcome::Skipped);
        assert_eq!(cache.read_ordered(&key, 10).await.unwrap(), CacheRead::Miss);

        cache.replace(&key, &[Turn::user("a")], ttl).await.unwrap();
        for c in ["b", "c", "d"] {
            cache
                .append_bounded(&key, &Turn::user(c), 3, ttl, AppendMode::IfCached)
                .await
                .unwrap();
        }

        let read = cache.read_ordered(&key, 10).await.unwrap();
        assert_eq!(
            read,
            CacheRead::Hit(vec![Turn::user("b"), Turn::user("c"), Turn::user("d")])
        );
        cache.invalidate(&key).await.unwrap();
    }
}
