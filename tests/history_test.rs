//! Cache-aside behaviour of the history coordinator against a real SQLite
//! store and an in-process cache with injectable faults.

mod common;

use common::{FaultyCache, FaultyStore};
use futures::future::join_all;
use query_orchestrator::history::{
    ConversationKey, HistoryCoordinator, HistoryError, HistoryPolicy, Role, Turn,
};
use query_orchestrator::storage::{CacheRead, HistoryStore};
use std::sync::Arc;
use std::time::Duration;

const MAX: usize = 10;

fn setup() -> (HistoryCoordinator, Arc<FaultyStore>, Arc<FaultyCache>) {
    setup_with(HistoryPolicy {
        max_turns: MAX,
        cache_ttl: Duration::from_secs(3600),
        operation_timeout: Duration::from_millis(500),
    })
}

fn setup_with(policy: HistoryPolicy) -> (HistoryCoordinator, Arc<FaultyStore>, Arc<FaultyCache>) {
    let store = FaultyStore::new();
    let cache = FaultyCache::new();
    let history = HistoryCoordinator::new(store.clone(), cache.clone(), policy);
    (history, store, cache)
}

fn key(user: &str, chat: &str) -> ConversationKey {
    ConversationKey::new(user, chat)
}

fn contents(turns: &[Turn]) -> Vec<String> {
    turns.iter().map(|t| t.content.clone()).collect()
}

async fn append_n(history: &HistoryCoordinator, key: &ConversationKey, n: usize) {
    for i in 0..n {
        let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
        history.append_history(key, role, format!("m{}", i)).await.unwrap();
    }
}

fn expected(range: std::ops::Range<usize>) -> Vec<String> {
    range.map(|i| format!("m{}", i)).collect()
}

#[tokio::test]
async fn test_history_preserves_append_order() {
    let (history, _, _) = setup();
    let k = key("u1", "c1");
    append_n(&history, &k, 6).await;

    // First read misses and loads from the store, second is served by cache
    let from_store = history.get_history(&k, None).await.unwrap();
    let from_cache = history.get_history(&k, None).await.unwrap();

    assert_eq!(contents(&from_store), expected(0..6));
    assert_eq!(from_cache, from_store);
    assert_eq!(from_store[0].role, Role::User);
    assert_eq!(from_store[1].role, Role::Assistant);
}

#[tokio::test]
async fn test_history_is_bounded_to_most_recent_turns() {
    let (history, store, _) = setup();
    let k = key("u1", "c1");
    append_n(&history, &k, MAX + 4).await;

    let turns = history.get_history(&k, None).await.unwrap();
    assert_eq!(contents(&turns), expected(4..MAX + 4));

    // Still bounded after more appends land in the cached list
    append_n(&history, &k, 3).await;
    let turns = history.get_history(&k, None).await.unwrap();
    assert_eq!(turns.len(), MAX);

    // Nothing was dropped from the durable log
    let all = store.read_recent_turns(&k, 100).await.unwrap();
    assert_eq!(all.len(), MAX + 4 + 3);
}

#[tokio::test]
async fn test_cached_view_matches_store_after_appends() {
    let (history, store, cache) = setup();
    let k = key("u1", "c1");
    history.append_history(&k, Role::User, "seed").await.unwrap();
    history.get_history(&k, None).await.unwrap(); // populate cache

    append_n(&history, &k, 15).await;

    let via_cache = history.get_history(&k, None).await.unwrap();
    let via_store = store.read_recent_turns(&k, MAX).await.unwrap();
    assert_eq!(via_cache, via_store);
    assert_eq!(cache.peek(&k).await, CacheRead::Hit(via_store));
}

#[tokio::test]
async fn test_cache_miss_heals_from_store() {
    let (history, store, cache) = setup();
    let k = key("u1", "c1");
    append_n(&history, &k, 4).await;
    assert_eq!(cache.peek(&k).await, CacheRead::Miss);

    let first = history.get_history(&k, None).await.unwrap();
    assert_eq!(contents(&first), expected(0..4));
    assert_eq!(store.reads(), 1);

    let second = history.get_history(&k, None).await.unwrap();
    assert_eq!(second, first);
    assert_eq!(store.reads(), 1, "second read should be served by the cache");

    let stats = history.stats();
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.cache_misses, 1);
    assert_eq!(stats.store_reads, 1);
}

#[tokio::test]
async fn test_failed_store_append_leaves_cache_untouched() {
    let (history, store, cache) = setup();
    let k = key("u1", "c1");
    append_n(&history, &k, 2).await;
    history.get_history(&k, None).await.unwrap();
    let before = cache.peek(&k).await;

    store.fail_appends.set(true);
    let err = history
        .append_history(&k, Role::User, "never recorded")
        .await
        .unwrap_err();

    assert!(matches!(err, HistoryError::StoreUnavailable(_)));
    assert_eq!(cache.peek(&k).await, before);
}

#[tokio::test]
async fn test_cache_write_failure_does_not_fail_append() {
    let (history, _, cache) = setup();
    let k = key("u1", "c1");
    append_n(&history, &k, 3).await;
    history.get_history(&k, None).await.unwrap();

    cache.fail_writes.set(true);
    history
        .append_history(&k, Role::User, "m3")
        .await
        .expect("durable write succeeded, so the append succeeds");

    // The stale list was dropped, so the next read goes to the store
    assert_eq!(cache.peek(&k).await, CacheRead::Miss);
    cache.fail_writes.set(false);

    let turns = history.get_history(&k, None).await.unwrap();
    assert_eq!(contents(&turns), expected(0..4));
    assert!(history.stats().cache_degraded >= 1);
}

#[tokio::test]
async fn test_conversations_are_isolated() {
    let (history, _, _) = setup();
    let pairs = [
        key("alice", "chat"),
        key("alice", "other"),
        key("bob", "chat"),
        key("a:b", "c"),
        key("a", "b:c"),
    ];

    for (i, k) in pairs.iter().enumerate() {
        history.append_history(k, Role::User, format!("only-{}", i)).await.unwrap();
    }
    // Once via store, once via cache
    for _ in 0..2 {
        for (i, k) in pairs.iter().enumerate() {
            let turns = history.get_history(k, None).await.unwrap();
            assert_eq!(contents(&turns), vec![format!("only-{}", i)], "key {}", k);
        }
    }
}

#[tokio::test]
async fn test_unknown_conversation_reads_empty() {
    let (history, _, cache) = setup();
    let k = key("new-user", "new-chat");

    assert!(history.get_history(&k, None).await.unwrap().is_empty());
    assert!(history.get_history(&k, None).await.unwrap().is_empty());
    assert_eq!(cache.peek(&k).await, CacheRead::Miss);
}

#[tokio::test]
async fn test_unreachable_cache_falls_back_to_store() {
    let (history, store, cache) = setup();
    let k = key("u1", "c1");
    append_n(&history, &k, 3).await;

    cache.fail_reads.set(true);
    cache.fail_writes.set(true);
    for _ in 0..2 {
        let turns = history.get_history(&k, None).await.unwrap();
        assert_eq!(contents(&turns), expected(0..3));
    }
    assert_eq!(store.reads(), 2);
}

#[tokio::test]
async fn test_corrupt_cache_entry_is_dropped() {
    let (history, _, cache) = setup();
    let k = key("u1", "c1");
    append_n(&history, &k, 2).await;
    history.get_history(&k, None).await.unwrap();

    cache.corrupt_reads.set(true);
    let turns = history.get_history(&k, None).await.unwrap();
    assert_eq!(contents(&turns), expected(0..2));

    cache.corrupt_reads.set(false);
    // Rebuilt from the store after the corrupt entry was invalidated
    assert_eq!(cache.peek(&k).await, CacheRead::Hit(turns));
}

#[tokio::test]
async fn test_store_failure_on_miss_is_reported() {
    let (history, store, _) = setup();
    let k = key("u1", "c1");
    store.fail_reads.set(true);

    let err = history.get_history(&k, None).await.unwrap_err();
    assert!(matches!(err, HistoryError::StoreUnavailable(_)));
}

#[tokio::test]
async fn test_cache_hit_does_not_need_store() {
    let (history, store, _) = setup();
    let k = key("u1", "c1");
    append_n(&history, &k, 2).await;
    history.get_history(&k, None).await.unwrap();

    store.fail_reads.set(true);
    let turns = history.get_history(&k, None).await.unwrap();
    assert_eq!(contents(&turns), expected(0..2));
}

#[tokio::test]
async fn test_slow_store_times_out_as_unavailable() {
    let (history, store, _) = setup_with(HistoryPolicy {
        max_turns: MAX,
        cache_ttl: Duration::from_secs(60),
        operation_timeout: Duration::from_millis(50),
    });
    store.set_delay(Some(Duration::from_millis(500)));

    let err = history.get_history(&key("u", "c"), None).await.unwrap_err();
    assert!(matches!(err, HistoryError::StoreUnavailable(_)));

    let err = history
        .append_history(&key("u", "c"), Role::User, "late")
        .await
        .unwrap_err();
    assert!(matches!(err, HistoryError::StoreUnavailable(_)));
}

#[tokio::test]
async fn test_append_committing_after_timeout_keeps_cache_and_order() {
    let (history, store, cache) = setup_with(HistoryPolicy {
        max_turns: MAX,
        cache_ttl: Duration::from_secs(60),
        operation_timeout: Duration::from_millis(50),
    });
    let k = key("u", "c");
    history.append_history(&k, Role::User, "m0").await.unwrap();
    history.get_history(&k, None).await.unwrap();

    // The write outlives the caller's timeout but still commits
    store.set_delay(Some(Duration::from_millis(200)));
    let err = history
        .append_history(&k, Role::Assistant, "m1")
        .await
        .unwrap_err();
    assert!(matches!(err, HistoryError::StoreUnavailable(_)));
    store.set_delay(None);

    // Waits for the pending write, so it lands after it
    history.append_history(&k, Role::User, "m2").await.unwrap();

    let durable = store.read_recent_turns(&k, MAX).await.unwrap();
    assert_eq!(contents(&durable), expected(0..3));
    match cache.peek(&k).await {
        CacheRead::Hit(turns) => assert_eq!(turns, durable),
        CacheRead::Miss => {}
    }
    let turns = history.get_history(&k, None).await.unwrap();
    assert_eq!(turns, durable);
}

#[tokio::test]
async fn test_hanging_cache_times_out_to_store() {
    let (history, _, cache) = setup_with(HistoryPolicy {
        max_turns: MAX,
        cache_ttl: Duration::from_secs(60),
        operation_timeout: Duration::from_millis(50),
    });
    let k = key("u", "c");
    append_n(&history, &k, 2).await;

    cache.hang.set(true);
    let turns = history.get_history(&k, None).await.unwrap();
    assert_eq!(contents(&turns), expected(0..2));
    history.append_history(&k, Role::User, "m2").await.unwrap();
}

#[tokio::test]
async fn test_concurrent_appends_keep_cache_and_store_in_agreement() {
    let (history, store, _) = setup();
    let history = Arc::new(history);
    let k = key("u1", "c1");
    history.append_history(&k, Role::System, "start").await.unwrap();
    history.get_history(&k, None).await.unwrap();

    let tasks = (0..8).map(|i| {
        let history = Arc::clone(&history);
        let k = k.clone();
        tokio::spawn(async move {
            history
                .append_history(&k, Role::User, format!("q{}", i))
                .await
                .unwrap();
        })
    });
    for result in join_all(tasks).await {
        result.unwrap();
    }

    let cached = history.get_history(&k, None).await.unwrap();
    let durable = store.read_recent_turns(&k, MAX).await.unwrap();
    assert_eq!(cached, durable);
    assert_eq!(cached.len(), 9);
}

#[tokio::test]
async fn test_reads_racing_appends_never_lose_turns() {
    let (history, _, _) = setup();
    let history = Arc::new(history);
    let k = key("u1", "c1");

    let writer = {
        let history = Arc::clone(&history);
        let k = k.clone();
        tokio::spawn(async move {
            for i in 0..5 {
                history.append_history(&k, Role::User, format!("m{}", i)).await.unwrap();
            }
        })
    };
    let readers = (0..5).map(|_| {
        let history = Arc::clone(&history);
        let k = k.clone();
        tokio::spawn(async move { history.get_history(&k, None).await.unwrap() })
    });
    for reader in join_all(readers).await {
        let turns = reader.unwrap();
        // Any snapshot is a prefix of the final order
        assert_eq!(contents(&turns), expected(0..turns.len()));
    }
    writer.await.unwrap();

    let turns = history.get_history(&k, None).await.unwrap();
    assert_eq!(contents(&turns), expected(0..5));
}
