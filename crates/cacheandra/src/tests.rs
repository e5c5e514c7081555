//! Scenario tests for the cross-tier coordination policy

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::{
    CacheConfig, CacheError, DurableTier, DurableTierError, FastTier, FastTierError, TieredCache,
};

/// In-memory fast tier with scriptable failures.
///
/// `fail_next` queues an error consumed by the next call, whatever it is;
/// `kill` makes every call answer `NodeDead` until `revive`.
#[derive(Clone, Default)]
struct StubFast {
    inner: Arc<FastInner>,
}

#[derive(Default)]
struct FastInner {
    store: Mutex<HashMap<String, Vec<u8>>>,
    ttls: Mutex<HashMap<String, Option<Duration>>>,
    script: Mutex<VecDeque<FastTierError>>,
    dead: AtomicBool,
    calls: AtomicUsize,
}

impl StubFast {
    fn fail_next(&self, err: FastTierError) {
        self.inner.script.lock().unwrap().push_back(err);
    }

    fn kill(&self) {
        self.inner.dead.store(true, Ordering::SeqCst);
    }

    fn revive(&self) {
        self.inner.dead.store(false, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    fn contains(&self, skey: &str) -> bool {
        self.inner.store.lock().unwrap().contains_key(skey)
    }

    fn ttl(&self, skey: &str) -> Option<Option<Duration>> {
        self.inner.ttls.lock().unwrap().get(skey).copied()
    }

    fn evict(&self, skey: &str) {
        self.inner.store.lock().unwrap().remove(skey);
    }

    fn check(&self) -> Result<(), FastTierError> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.dead.load(Ordering::SeqCst) {
            return Err(FastTierError::NodeDead);
        }
        match self.inner.script.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn put(&self, skey: &str, value: &[u8], timeout: Option<Duration>) {
        self.inner
            .store
            .lock()
            .unwrap()
            .insert(skey.to_string(), value.to_vec());
        self.inner
            .ttls
            .lock()
            .unwrap()
            .insert(skey.to_string(), timeout);
    }

    fn counter_value(&self, skey: &str) -> Result<i64, FastTierError> {
        let store = self.inner.store.lock().unwrap();
        let raw = store.get(skey).ok_or(FastTierError::NotFound)?;
        std::str::from_utf8(raw)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| FastTierError::Other("not a counter".to_string()))
    }
}

#[async_trait]
impl FastTier for StubFast {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, FastTierError> {
        self.check()?;
        Ok(self.inner.store.lock().unwrap().get(key).cloned())
    }

    async fn get_multi(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>, FastTierError> {
        self.check()?;
        let store = self.inner.store.lock().unwrap();
        Ok(keys
            .iter()
            .filter_map(|key| store.get(key).map(|v| (key.clone(), v.clone())))
            .collect())
    }

    async fn set(
        &self,
        key: &str,
        value: &[u8],
        timeout: Option<Duration>,
    ) -> Result<(), FastTierError> {
        self.check()?;
        self.put(key, value, timeout);
        Ok(())
    }

    async fn set_multi(
        &self,
        entries: &[(String, Vec<u8>)],
        timeout: Option<Duration>,
    ) -> Result<(), FastTierError> {
        self.check()?;
        for (key, value) in entries {
            self.put(key, value, timeout);
        }
        Ok(())
    }

    async fn add(
        &self,
        key: &str,
        value: &[u8],
        timeout: Option<Duration>,
    ) -> Result<bool, FastTierError> {
        self.check()?;
        if self.contains(key) {
            return Ok(false);
        }
        self.put(key, value, timeout);
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), FastTierError> {
        self.check()?;
        self.inner.store.lock().unwrap().remove(key);
        Ok(())
    }

    async fn delete_multi(&self, keys: &[String]) -> Result<(), FastTierError> {
        self.check()?;
        let mut store = self.inner.store.lock().unwrap();
        for key in keys {
            store.remove(key);
        }
        Ok(())
    }

    async fn incr(&self, key: &str, delta: u64) -> Result<u64, FastTierError> {
        self.check()?;
        let current = self.counter_value(key)?;
        let next = current + delta as i64;
        self.put(key, next.to_string().as_bytes(), None);
        Ok(next as u64)
    }

    async fn decr(&self, key: &str, delta: u64) -> Result<u64, FastTierError> {
        self.check()?;
        let current = self.counter_value(key)?;
        // memcached clamps decrements at zero
        let next = (current - delta as i64).max(0);
        self.put(key, next.to_string().as_bytes(), None);
        Ok(next as u64)
    }

    async fn flush_all(&self) -> Result<(), FastTierError> {
        self.check()?;
        self.inner.store.lock().unwrap().clear();
        Ok(())
    }

    async fn disconnect_all(&self) {}
}

/// In-memory durable tier: blob and counter maps, a kill switch and a
/// record of every counter delta for rebase assertions.
#[derive(Clone, Default)]
struct StubDurable {
    inner: Arc<DurableInner>,
}

#[derive(Default)]
struct DurableInner {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    blob_ttls: Mutex<HashMap<String, Option<Duration>>>,
    counters: Mutex<HashMap<String, i64>>,
    deltas: Mutex<Vec<i64>>,
    down: AtomicBool,
}

impl StubDurable {
    fn kill(&self) {
        self.inner.down.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), DurableTierError> {
        if self.inner.down.load(Ordering::SeqCst) {
            return Err(DurableTierError::Transient("down".to_string()));
        }
        Ok(())
    }

    fn put_blob(&self, skey: &str, value: Vec<u8>) {
        self.inner
            .blobs
            .lock()
            .unwrap()
            .insert(skey.to_string(), value);
    }

    fn put_counter(&self, skey: &str, count: i64) {
        self.inner
            .counters
            .lock()
            .unwrap()
            .insert(skey.to_string(), count);
    }

    fn blob(&self, skey: &str) -> Option<Vec<u8>> {
        self.inner.blobs.lock().unwrap().get(skey).cloned()
    }

    fn counter(&self, skey: &str) -> Option<i64> {
        self.inner.counters.lock().unwrap().get(skey).copied()
    }

    fn deltas(&self) -> Vec<i64> {
        self.inner.deltas.lock().unwrap().clone()
    }
}

#[async_trait]
impl DurableTier for StubDurable {
    async fn blob_get(&self, key: &str) -> Result<Option<Vec<u8>>, DurableTierError> {
        self.check()?;
        Ok(self.blob(key))
    }

    async fn blob_insert(
        &self,
        key: &str,
        value: &[u8],
        timeout: Option<Duration>,
    ) -> Result<(), DurableTierError> {
        self.check()?;
        self.put_blob(key, value.to_vec());
        self.inner
            .blob_ttls
            .lock()
            .unwrap()
            .insert(key.to_string(), timeout);
        Ok(())
    }

    async fn blob_remove(&self, key: &str) -> Result<(), DurableTierError> {
        self.check()?;
        self.inner.blobs.lock().unwrap().remove(key);
        Ok(())
    }

    async fn blob_multiget(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, Vec<u8>>, DurableTierError> {
        self.check()?;
        let blobs = self.inner.blobs.lock().unwrap();
        Ok(keys
            .iter()
            .filter_map(|key| blobs.get(key).map(|v| (key.clone(), v.clone())))
            .collect())
    }

    async fn blob_batch_insert(
        &self,
        entries: &[(String, Vec<u8>)],
        timeout: Option<Duration>,
    ) -> Result<(), DurableTierError> {
        self.check()?;
        for (key, value) in entries {
            self.put_blob(key, value.clone());
            self.inner
                .blob_ttls
                .lock()
                .unwrap()
                .insert(key.clone(), timeout);
        }
        Ok(())
    }

    async fn blob_batch_remove(&self, keys: &[String]) -> Result<(), DurableTierError> {
        self.check()?;
        let mut blobs = self.inner.blobs.lock().unwrap();
        for key in keys {
            blobs.remove(key);
        }
        Ok(())
    }

    async fn counter_get(&self, key: &str) -> Result<Option<i64>, DurableTierError> {
        self.check()?;
        Ok(self.counter(key))
    }

    async fn counter_multiget(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, i64>, DurableTierError> {
        self.check()?;
        let counters = self.inner.counters.lock().unwrap();
        Ok(keys
            .iter()
            .filter_map(|key| counters.get(key).map(|c| (key.clone(), *c)))
            .collect())
    }

    async fn counter_add(&self, key: &str, delta: i64) -> Result<(), DurableTierError> {
        self.check()?;
        *self
            .inner
            .counters
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_insert(0) += delta;
        self.inner.deltas.lock().unwrap().push(delta);
        Ok(())
    }

    async fn counter_remove(&self, key: &str) -> Result<(), DurableTierError> {
        self.check()?;
        self.inner.counters.lock().unwrap().remove(key);
        Ok(())
    }

    async fn truncate_all(&self) -> Result<(), DurableTierError> {
        self.check()?;
        self.inner.blobs.lock().unwrap().clear();
        self.inner.counters.lock().unwrap().clear();
        Ok(())
    }
}

fn config() -> CacheConfig {
    // Short backoff keeps the retry tests fast.
    CacheConfig::default().retry_backoff(Duration::from_millis(5))
}

/// Storage key under the default prefix/version.
fn skey(key: &str) -> String {
    format!(":1:{key}")
}

fn both_tiers() -> (TieredCache<StubFast, StubDurable>, StubFast, StubDurable) {
    let fast = StubFast::default();
    let durable = StubDurable::default();
    let cache = TieredCache::with_tiers(Some(fast.clone()), Some(durable.clone()), &config());
    (cache, fast, durable)
}

fn fast_only() -> (TieredCache<StubFast, StubDurable>, StubFast) {
    let fast = StubFast::default();
    let cache = TieredCache::with_tiers(Some(fast.clone()), None, &config());
    (cache, fast)
}

fn durable_only() -> (TieredCache<StubFast, StubDurable>, StubDurable) {
    let durable = StubDurable::default();
    let cache = TieredCache::with_tiers(None, Some(durable.clone()), &config());
    (cache, durable)
}

#[tokio::test]
async fn fast_only_set_get_delete() {
    let (cache, _fast) = fast_only();

    cache.set("a", &json!("1"), None).await;
    assert_eq!(cache.get("a").await, Some(json!("1")));

    cache.delete("a").await;
    assert_eq!(cache.get("a").await, None);
}

#[tokio::test]
async fn roundtrip_structured_values() {
    let (cache, _fast, _durable) = both_tiers();

    let value = json!({"question": "favorite color?", "votes": [3, 1, 4]});
    cache.set("poll", &value, None).await;
    assert_eq!(cache.get("poll").await, Some(value));

    cache.set("flag", &json!(true), None).await;
    assert_eq!(cache.get("flag").await, Some(json!(true)));
}

#[tokio::test]
async fn counters_across_both_tiers() {
    let (cache, _fast, durable) = both_tiers();

    cache.set("c", &json!(1), None).await;
    assert_eq!(cache.incr("c", 1).await.unwrap(), 2);
    assert_eq!(cache.get("c").await, Some(json!(2)));
    assert_eq!(cache.incr("c", 10).await.unwrap(), 12);
    assert_eq!(cache.get("c").await, Some(json!(12)));
    assert_eq!(cache.decr("c", 8).await.unwrap(), 4);
    assert_eq!(cache.get("c").await, Some(json!(4)));

    assert_eq!(durable.counter(&skey("c")), Some(4));
}

#[tokio::test]
async fn durable_only_add_wins_once() {
    let (cache, _durable) = durable_only();

    assert!(cache.add("k", &json!("v"), None).await);
    assert_eq!(cache.get("k").await, Some(json!("v")));
    assert!(!cache.add("k", &json!("w"), None).await);
    assert_eq!(cache.get("k").await, Some(json!("v")));
}

#[tokio::test]
async fn add_first_writer_wins_with_both_tiers() {
    let (cache, _fast, _durable) = both_tiers();

    assert!(cache.add("k", &json!("v1"), None).await);
    assert!(!cache.add("k", &json!("v2"), None).await);
    assert_eq!(cache.get("k").await, Some(json!("v1")));
}

#[tokio::test]
async fn no_tiers_degrades_silently() {
    let cache: TieredCache<StubFast, StubDurable> =
        TieredCache::with_tiers(None, None, &config());

    cache.set("k", &json!("v"), None).await;
    assert_eq!(cache.get("k").await, None);
    assert!(!cache.add("k", &json!("v"), None).await);
    assert!(cache.get_many(&["a", "b"]).await.is_empty());
    assert!(matches!(
        cache.incr("k", 1).await,
        Err(CacheError::KeyNotFound(_))
    ));
}

#[tokio::test]
async fn fast_outage_serves_from_durable_and_reconverges() {
    let (cache, fast, _durable) = both_tiers();

    cache.set("x", &json!("y"), None).await;

    fast.kill();
    assert_eq!(cache.get("x").await, Some(json!("y")));

    fast.revive();
    let before = cache.stats().fast_hits;
    assert_eq!(cache.get("x").await, Some(json!("y")));
    assert_eq!(cache.stats().fast_hits, before + 1);

    // After an eviction the durable hit back-fills with the short TTL.
    fast.evict(&skey("x"));
    assert_eq!(cache.get("x").await, Some(json!("y")));
    assert_eq!(fast.ttl(&skey("x")), Some(Some(Duration::from_secs(1))));
}

#[tokio::test]
async fn counter_rebase_on_integer_set() {
    let (cache, _fast, durable) = both_tiers();

    cache.set("n", &json!(5), None).await;
    cache.set("n", &json!(2), None).await;

    assert_eq!(cache.get("n").await, Some(json!(2)));
    assert_eq!(durable.counter(&skey("n")), Some(2));
    // Rebase applied 5 then 2 - 5.
    assert_eq!(durable.deltas(), vec![5, -3]);
}

#[tokio::test]
async fn counter_family_read_before_blob() {
    let (cache, durable) = durable_only();

    // A stale blob left behind by an earlier non-integer write must lose
    // to the counter.
    durable.put_blob(&skey("score"), b"\"old\"".to_vec());
    durable.put_counter(&skey("score"), 7);

    assert_eq!(cache.get("score").await, Some(json!(7)));
}

#[tokio::test]
async fn incr_removes_stale_blob() {
    let (cache, _fast, durable) = both_tiers();

    cache.set("hits", &json!(5), None).await;
    assert!(durable.blob(&skey("hits")).is_some());

    assert_eq!(cache.incr("hits", 1).await.unwrap(), 6);
    assert!(durable.blob(&skey("hits")).is_none());
    assert_eq!(durable.counter(&skey("hits")), Some(6));
}

#[tokio::test]
async fn incr_unknown_key_errors() {
    let (cache, _fast) = fast_only();
    assert!(matches!(
        cache.incr("absent", 1).await,
        Err(CacheError::KeyNotFound(_))
    ));

    let (cache, _durable) = durable_only();
    assert!(matches!(
        cache.decr("absent", 1).await,
        Err(CacheError::KeyNotFound(_))
    ));
}

#[tokio::test]
async fn delete_removes_blob_counter_and_fast_entry() {
    let (cache, fast, durable) = both_tiers();

    cache.set("c", &json!(5), None).await;
    cache.delete("c").await;

    assert_eq!(cache.get("c").await, None);
    assert!(!fast.contains(&skey("c")));
    assert!(durable.blob(&skey("c")).is_none());
    assert!(durable.counter(&skey("c")).is_none());
}

#[tokio::test]
async fn disabled_node_retries_once_and_returns_value() {
    let (cache, fast, _durable) = both_tiers();

    cache.set("k", &json!("v"), None).await;
    let calls = fast.calls();

    fast.fail_next(FastTierError::NodeDisabledRetry);
    assert_eq!(cache.get("k").await, Some(json!("v")));
    // First attempt consumed the scripted failure, the re-entrant retry hit.
    assert_eq!(fast.calls(), calls + 2);
}

#[tokio::test]
async fn dead_node_on_get_falls_back_and_backfills() {
    let (cache, fast, durable) = both_tiers();

    durable.put_blob(&skey("k"), b"\"v\"".to_vec());

    fast.fail_next(FastTierError::NodeDead);
    assert_eq!(cache.get("k").await, Some(json!("v")));
    assert_eq!(fast.ttl(&skey("k")), Some(Some(Duration::from_secs(1))));
}

#[tokio::test]
async fn dead_node_on_add_retries_inline() {
    let (cache, fast, durable) = both_tiers();

    fast.fail_next(FastTierError::NodeDead);
    assert!(cache.add("k", &json!("v"), None).await);
    assert!(fast.contains(&skey("k")));
    assert!(durable.blob(&skey("k")).is_some());
}

#[tokio::test]
async fn get_many_full_and_partial_hits() {
    let (cache, fast, durable) = both_tiers();

    cache.set("a", &json!("1"), None).await;
    cache.set("b", &json!("2"), None).await;

    let found = cache.get_many(&["a", "b"]).await;
    assert_eq!(found.len(), 2);
    assert_eq!(found.get("a"), Some(&json!("1")));
    assert_eq!(found.get("b"), Some(&json!("2")));

    // A partial fast-tier hit is returned as-is even though the durable
    // tier knows the other key.
    fast.evict(&skey("b"));
    assert!(durable.blob(&skey("b")).is_some());
    let found = cache.get_many(&["a", "b"]).await;
    assert_eq!(found.len(), 1);
    assert_eq!(found.get("a"), Some(&json!("1")));
}

#[tokio::test]
async fn get_many_empty_fast_result_unions_blobs_and_counters() {
    let (cache, fast, durable) = both_tiers();

    durable.put_blob(&skey("a"), b"\"x\"".to_vec());
    durable.put_counter(&skey("b"), 9);

    let found = cache.get_many(&["a", "b", "c"]).await;
    assert_eq!(found.len(), 2);
    assert_eq!(found.get("a"), Some(&json!("x")));
    assert_eq!(found.get("b"), Some(&json!(9)));

    // Both recovered values were back-filled with the short TTL.
    assert_eq!(fast.ttl(&skey("a")), Some(Some(Duration::from_secs(1))));
    assert_eq!(fast.ttl(&skey("b")), Some(Some(Duration::from_secs(1))));
}

#[tokio::test]
async fn set_many_is_blob_only() {
    let (cache, fast, durable) = both_tiers();

    cache
        .set_many(&[("a", json!(7)), ("b", json!("s"))], None)
        .await;

    assert!(fast.contains(&skey("a")));
    assert_eq!(durable.blob(&skey("a")), Some(b"7".to_vec()));
    assert_eq!(durable.blob(&skey("b")), Some(b"\"s\"".to_vec()));
    // Bulk writes skip the counter family entirely.
    assert!(durable.deltas().is_empty());
    assert!(durable.counter(&skey("a")).is_none());
}

#[tokio::test]
async fn delete_many_leaves_counters() {
    let (cache, fast, durable) = both_tiers();

    cache.set("c", &json!(1), None).await;
    cache.delete_many(&["c"]).await;

    assert!(!fast.contains(&skey("c")));
    assert!(durable.blob(&skey("c")).is_none());
    // Batch deletes are blob-only by design.
    assert_eq!(durable.counter(&skey("c")), Some(1));
}

#[tokio::test]
async fn clear_truncates_both_tiers() {
    let (cache, fast, durable) = both_tiers();

    cache.set("a", &json!("1"), None).await;
    cache.set("n", &json!(4), None).await;
    cache.clear().await;

    assert!(!fast.contains(&skey("a")));
    assert!(durable.blob(&skey("a")).is_none());
    assert!(durable.counter(&skey("n")).is_none());
    assert_eq!(cache.get("a").await, None);
}

#[tokio::test]
async fn fast_tier_is_trusted_when_durable_is_down() {
    let (cache, _fast, durable) = both_tiers();

    cache.set("k", &json!("v"), None).await;
    durable.kill();

    assert_eq!(cache.get("k").await, Some(json!("v")));
}

#[tokio::test]
async fn stats_track_tier_hits() {
    let (cache, fast, _durable) = both_tiers();

    cache.set("k", &json!("v"), None).await;
    cache.get("k").await;
    fast.evict(&skey("k"));
    cache.get("k").await;
    cache.get("missing").await;

    let stats = cache.stats();
    assert_eq!(stats.fast_hits, 1);
    assert_eq!(stats.durable_hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits(), 2);
}
