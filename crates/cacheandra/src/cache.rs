//! Cross-tier coordination

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, warn};

use cacheandra_core::{
    CacheConfig, CacheError, CacheStats, DurableTier, FastTier, FastTierError, JsonSerializer,
    KeyMaker, Result, Serializer,
};
use cacheandra_storage::{MemcachedConfig, MemcachedTier, ScyllaConfig, ScyllaTier};

/// TTL for values back-filled into the fast tier from the durable tier.
/// Kept short so the fast tier reconverges quickly after writes it missed.
const BACKFILL_TTL: Duration = Duration::from_secs(1);

#[derive(Default)]
struct Counters {
    fast_hits: AtomicU64,
    durable_hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

#[derive(Clone, Copy)]
enum Direction {
    Incr,
    Decr,
}

impl Direction {
    fn signed(self, delta: u64) -> i64 {
        match self {
            Direction::Incr => delta as i64,
            Direction::Decr => -(delta as i64),
        }
    }
}

/// Two-tier cache: a volatile fast tier over a durable fallback tier.
///
/// The fast tier is trusted whenever it produces a value. A miss there is
/// never evidence of deletion: the durable tier is consulted, counter
/// family first (an incremented key may still carry a stale blob), and a
/// durable hit is back-filled into the fast tier with a short TTL.
///
/// Integer values are dual-represented. Writes keep the durable counter
/// family authoritative by rebasing it on `set` and removing the blob row
/// on `incr`/`decr`. The design is convergent, not linearizable: readers
/// may see a stale fast-tier value for up to the back-fill TTL.
///
/// Either tier may be absent ([`None`]); each operation degrades to what
/// the remaining tier can answer, and the only error ever surfaced is
/// [`CacheError::KeyNotFound`] from the counter updates.
pub struct TieredCache<F = MemcachedTier, D = ScyllaTier, S = JsonSerializer> {
    fast: Option<F>,
    durable: Option<D>,
    serializer: S,
    keys: KeyMaker,
    retry_backoff: Duration,
    counters: Counters,
}

impl TieredCache<MemcachedTier, ScyllaTier> {
    /// Build both tier drivers from `config`.
    ///
    /// A tier whose driver cannot be constructed is logged and treated as
    /// absent rather than failing the cache; with both tiers absent every
    /// read misses and every write is a silent no-op.
    pub async fn connect(config: CacheConfig) -> Self {
        let fast = if config.servers.is_empty() {
            None
        } else {
            let tier_config = MemcachedConfig {
                servers: config.servers.clone(),
                options: config.options.clone(),
                default_timeout: config.default_timeout,
            };
            match MemcachedTier::connect(&tier_config) {
                Ok(tier) => Some(tier),
                Err(e) => {
                    error!(error = %e, "fast tier construction failed, running without it");
                    None
                }
            }
        };

        let durable = match &config.cassandra {
            None => None,
            Some(nodes) => {
                let tier_config = ScyllaConfig {
                    nodes: nodes.clone(),
                    keyspace: config.keyspace.clone(),
                    column_family: config.column_family.clone(),
                    ..ScyllaConfig::default()
                };
                match ScyllaTier::connect(&tier_config).await {
                    Ok(tier) => Some(tier),
                    Err(e) => {
                        error!(error = %e, "durable tier construction failed, running without it");
                        None
                    }
                }
            }
        };

        Self::with_tiers(fast, durable, &config)
    }
}

impl<F: FastTier, D: DurableTier> TieredCache<F, D> {
    /// Assemble a cache from already-built tier drivers.
    pub fn with_tiers(fast: Option<F>, durable: Option<D>, config: &CacheConfig) -> Self {
        Self {
            fast,
            durable,
            serializer: JsonSerializer,
            keys: KeyMaker::new(config.key_prefix.clone(), config.version),
            retry_backoff: config.retry_backoff,
            counters: Counters::default(),
        }
    }
}

impl<F, D, S> TieredCache<F, D, S>
where
    F: FastTier,
    D: DurableTier,
    S: Serializer,
{
    /// Fetch a value. The fast tier answers first when present; on a miss
    /// or a dead node the durable tier answers instead and the result is
    /// back-filled. Returns `None` on a total miss or total outage.
    pub async fn get(&self, key: &str) -> Option<Value> {
        self.get_inner(key, true).await
    }

    async fn get_inner(&self, key: &str, retry: bool) -> Option<Value> {
        let skey = self.keys.make(key);

        if let Some(fast) = &self.fast {
            match fast.get(&skey).await {
                Ok(Some(raw)) => match self.serializer.deserialize::<Value>(&raw) {
                    Ok(value) => {
                        self.counters.fast_hits.fetch_add(1, Ordering::Relaxed);
                        return Some(value);
                    }
                    Err(e) => {
                        warn!(%key, error = %e, "undecodable fast-tier payload, treating as miss");
                    }
                },
                Ok(None) => {}
                Err(FastTierError::NodeDisabledRetry) if retry => {
                    debug!(%key, "fast tier disabled until timed retry on get");
                    tokio::time::sleep(self.retry_backoff).await;
                    return Box::pin(self.get_inner(key, false)).await;
                }
                Err(FastTierError::NodeDead) => {
                    error!(%key, "fast tier node dead on get, treating as miss");
                }
                Err(e) => warn!(%key, error = %e, "fast tier get failed"),
            }
        }

        let Some(durable) = &self.durable else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        // Counter family first: an incremented key may still carry a
        // stale blob, and the counter is the authoritative integer.
        let value = match durable.counter_get(&skey).await {
            Ok(Some(count)) => Some(Value::from(count)),
            Ok(None) => match durable.blob_get(&skey).await {
                Ok(Some(raw)) => match self.serializer.deserialize::<Value>(&raw) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        warn!(%key, error = %e, "undecodable durable payload");
                        None
                    }
                },
                Ok(None) => None,
                Err(e) => {
                    warn!(%key, error = %e, "durable blob read failed");
                    None
                }
            },
            Err(e) => {
                warn!(%key, error = %e, "durable counter read failed");
                None
            }
        };

        match value {
            Some(value) => {
                self.counters.durable_hits.fetch_add(1, Ordering::Relaxed);
                if let Some(fast) = &self.fast {
                    match self.serializer.serialize(&value) {
                        Ok(raw) => {
                            if let Err(e) = fast.set(&skey, &raw, Some(BACKFILL_TTL)).await {
                                warn!(%key, error = %e, "fast tier back-fill failed");
                            }
                        }
                        Err(e) => warn!(%key, error = %e, "back-fill serialization failed"),
                    }
                }
                Some(value)
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert `value` iff no live entry exists for `key`. Returns whether
    /// the insert happened. With the fast tier present its `add` verdict
    /// decides; otherwise a durable blob probe does.
    pub async fn add(&self, key: &str, value: &Value, timeout: Option<Duration>) -> bool {
        self.add_inner(key, value, timeout, true).await
    }

    async fn add_inner(
        &self,
        key: &str,
        value: &Value,
        timeout: Option<Duration>,
        retry: bool,
    ) -> bool {
        let skey = self.keys.make(key);
        let raw = match self.serializer.serialize(value) {
            Ok(raw) => raw,
            Err(e) => {
                error!(%key, error = %e, "unserializable value on add");
                return false;
            }
        };

        let mut inserted = false;
        if let Some(fast) = &self.fast {
            inserted = match fast.add(&skey, &raw, timeout).await {
                Ok(inserted) => inserted,
                Err(FastTierError::NodeDisabledRetry) if retry => {
                    debug!(%key, "fast tier disabled until timed retry on add");
                    tokio::time::sleep(self.retry_backoff).await;
                    return Box::pin(self.add_inner(key, value, timeout, false)).await;
                }
                Err(FastTierError::NodeDead) => {
                    error!(%key, "fast tier node dead on add, retrying once");
                    fast.add(&skey, &raw, timeout).await.unwrap_or_else(|e| {
                        warn!(%key, error = %e, "fast tier add retry failed");
                        false
                    })
                }
                Err(e) => {
                    warn!(%key, error = %e, "fast tier add failed");
                    false
                }
            };
        }

        if let Some(durable) = &self.durable {
            if self.fast.is_none() {
                // No fast tier to arbitrate: a live blob row decides.
                inserted = match durable.blob_get(&skey).await {
                    Ok(existing) => existing.is_none(),
                    Err(e) => {
                        warn!(%key, error = %e, "durable probe failed on add");
                        false
                    }
                };
            }
            if inserted {
                if let Some(n) = value.as_i64() {
                    if let Err(e) = durable.counter_add(&skey, n).await {
                        warn!(%key, error = %e, "counter seed failed on add");
                    }
                }
                if let Err(e) = durable.blob_insert(&skey, &raw, timeout).await {
                    warn!(%key, error = %e, "durable insert failed on add");
                }
            }
        }

        if inserted {
            self.counters.writes.fetch_add(1, Ordering::Relaxed);
        }
        inserted
    }

    /// Store `value` in both tiers. Integer values additionally rebase the
    /// durable counter so later `incr`/`decr` observe them.
    pub async fn set(&self, key: &str, value: &Value, timeout: Option<Duration>) {
        self.set_inner(key, value, timeout, true).await
    }

    async fn set_inner(&self, key: &str, value: &Value, timeout: Option<Duration>, retry: bool) {
        let skey = self.keys.make(key);
        let raw = match self.serializer.serialize(value) {
            Ok(raw) => raw,
            Err(e) => {
                error!(%key, error = %e, "unserializable value on set");
                return;
            }
        };

        if let Some(fast) = &self.fast {
            match fast.set(&skey, &raw, timeout).await {
                Ok(()) => {}
                Err(FastTierError::NodeDisabledRetry) if retry => {
                    debug!(%key, "fast tier disabled until timed retry on set");
                    tokio::time::sleep(self.retry_backoff).await;
                    return Box::pin(self.set_inner(key, value, timeout, false)).await;
                }
                Err(FastTierError::NodeDead) => {
                    error!(%key, "fast tier node dead on set, retrying once");
                    if let Err(e) = fast.set(&skey, &raw, timeout).await {
                        warn!(%key, error = %e, "fast tier set retry failed");
                    }
                }
                Err(e) => warn!(%key, error = %e, "fast tier set failed"),
            }
        }

        if let Some(durable) = &self.durable {
            match durable.blob_insert(&skey, &raw, timeout).await {
                Ok(()) => {
                    if let Some(target) = value.as_i64() {
                        self.rebase_counter(durable, &skey, target).await;
                    }
                }
                Err(e) => warn!(%key, error = %e, "durable insert failed on set"),
            }
        }

        self.counters.writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Bring the additive counter to an absolute value. The store cannot
    /// set a counter, only add, so the delta against the current reading
    /// is applied. Concurrent rebases race; last writer wins.
    async fn rebase_counter(&self, durable: &D, skey: &str, target: i64) {
        let current = match durable.counter_get(skey).await {
            Ok(Some(count)) => count,
            Ok(None) => 0,
            Err(e) => {
                warn!(key = %skey, error = %e, "counter read failed during rebase, assuming zero");
                0
            }
        };
        if target != current {
            if let Err(e) = durable.counter_add(skey, target - current).await {
                warn!(key = %skey, error = %e, "counter rebase failed");
            }
        }
    }

    /// Remove `key` from every tier. Best-effort on each.
    pub async fn delete(&self, key: &str) {
        self.delete_inner(key, true).await
    }

    async fn delete_inner(&self, key: &str, retry: bool) {
        let skey = self.keys.make(key);

        if let Some(fast) = &self.fast {
            match fast.delete(&skey).await {
                Ok(()) => {}
                Err(FastTierError::NodeDisabledRetry) if retry => {
                    debug!(%key, "fast tier disabled until timed retry on delete");
                    tokio::time::sleep(self.retry_backoff).await;
                    return Box::pin(self.delete_inner(key, false)).await;
                }
                // A dead node has already lost the entry.
                Err(e) => warn!(%key, error = %e, "fast tier delete failed"),
            }
        }

        if let Some(durable) = &self.durable {
            if let Err(e) = durable.blob_remove(&skey).await {
                warn!(%key, error = %e, "durable blob remove failed");
            }
            if let Err(e) = durable.counter_remove(&skey).await {
                warn!(%key, error = %e, "durable counter remove failed");
            }
        }

        self.counters.deletes.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the counter entry for `key` by `delta` and return the new
    /// value. Errors with [`CacheError::KeyNotFound`] when no reachable
    /// tier holds a live entry.
    pub async fn incr(&self, key: &str, delta: u64) -> Result<i64> {
        self.update_counter(key, delta, Direction::Incr, true).await
    }

    /// Decrement the counter entry for `key` by `delta` and return the new
    /// value. The fast tier clamps at zero; the durable counter does not.
    pub async fn decr(&self, key: &str, delta: u64) -> Result<i64> {
        self.update_counter(key, delta, Direction::Decr, true).await
    }

    async fn update_counter(
        &self,
        key: &str,
        delta: u64,
        direction: Direction,
        retry: bool,
    ) -> Result<i64> {
        let skey = self.keys.make(key);
        let mut value: Option<i64> = None;

        if let Some(fast) = &self.fast {
            let first = match direction {
                Direction::Incr => fast.incr(&skey, delta).await,
                Direction::Decr => fast.decr(&skey, delta).await,
            };
            match first {
                Ok(v) => value = Some(v as i64),
                Err(FastTierError::NotFound) => value = None,
                Err(FastTierError::NodeDisabledRetry) if retry => {
                    debug!(%key, "fast tier disabled until timed retry on counter update");
                    tokio::time::sleep(self.retry_backoff).await;
                    return Box::pin(self.update_counter(key, delta, direction, false)).await;
                }
                Err(FastTierError::NodeDead) => {
                    error!(%key, "fast tier node dead on counter update, retrying once");
                    let second = match direction {
                        Direction::Incr => fast.incr(&skey, delta).await,
                        Direction::Decr => fast.decr(&skey, delta).await,
                    };
                    value = match second {
                        Ok(v) => Some(v as i64),
                        Err(e) => {
                            warn!(%key, error = %e, "fast tier counter retry failed");
                            None
                        }
                    };
                }
                Err(e) => {
                    warn!(%key, error = %e, "fast tier counter update failed");
                    value = None;
                }
            }

            if value.is_none() && self.durable.is_none() {
                return Err(CacheError::KeyNotFound(key.to_string()));
            }
        }

        if let Some(durable) = &self.durable {
            if self.fast.is_none() {
                // Without the fast tier nothing has vouched for the key
                // being live; a definitive counter miss refuses the update.
                match durable.counter_get(&skey).await {
                    Ok(Some(_)) => {}
                    Ok(None) => return Err(CacheError::KeyNotFound(key.to_string())),
                    Err(e) => warn!(%key, error = %e, "counter probe failed, proceeding"),
                }
            }
            match durable.counter_add(&skey, direction.signed(delta)).await {
                Ok(()) => {
                    // The key now holds an integer; its blob copy is stale.
                    if let Err(e) = durable.blob_remove(&skey).await {
                        warn!(%key, error = %e, "stale blob removal failed after counter update");
                    }
                    match durable.counter_get(&skey).await {
                        Ok(Some(count)) => value = Some(count),
                        Ok(None) => warn!(%key, "counter missing after update"),
                        Err(e) => warn!(%key, error = %e, "counter read-back failed"),
                    }
                }
                Err(e) => warn!(%key, error = %e, "counter update failed"),
            }
        }

        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        value.ok_or_else(|| CacheError::KeyNotFound(key.to_string()))
    }

    /// Fetch several values, keyed by the caller's keys. A fast-tier
    /// answer, even partial, is returned as-is; only an empty result falls
    /// through to the durable tier (one round trip instead of per-key
    /// fallbacks).
    pub async fn get_many(&self, keys: &[&str]) -> HashMap<String, Value> {
        self.get_many_inner(keys, true).await
    }

    async fn get_many_inner(&self, keys: &[&str], retry: bool) -> HashMap<String, Value> {
        let mapped: Vec<String> = keys.iter().map(|key| self.keys.make(key)).collect();
        let unmapped: HashMap<&str, &str> = mapped
            .iter()
            .map(String::as_str)
            .zip(keys.iter().copied())
            .collect();

        let mut found: HashMap<String, Value> = HashMap::new();
        if let Some(fast) = &self.fast {
            match fast.get_multi(&mapped).await {
                Ok(hits) => {
                    for (skey, raw) in hits {
                        match self.serializer.deserialize::<Value>(&raw) {
                            Ok(value) => {
                                if let Some(user_key) = unmapped.get(skey.as_str()) {
                                    found.insert((*user_key).to_string(), value);
                                }
                            }
                            Err(e) => {
                                warn!(key = %skey, error = %e, "undecodable fast-tier payload in get_many");
                            }
                        }
                    }
                }
                Err(FastTierError::NodeDisabledRetry) if retry => {
                    debug!("fast tier disabled until timed retry on get_many");
                    tokio::time::sleep(self.retry_backoff).await;
                    return Box::pin(self.get_many_inner(keys, false)).await;
                }
                Err(FastTierError::NodeDead) => {
                    error!("fast tier node dead on get_many, falling back");
                }
                Err(e) => warn!(error = %e, "fast tier get_many failed"),
            }
        }

        if !found.is_empty() {
            // A partial hit is returned as-is; per-key durable fallback
            // would cost a round trip on every partially-cold batch.
            self.counters
                .fast_hits
                .fetch_add(found.len() as u64, Ordering::Relaxed);
            return found;
        }

        let Some(durable) = &self.durable else {
            self.counters
                .misses
                .fetch_add(keys.len() as u64, Ordering::Relaxed);
            return found;
        };

        let mut recovered: HashMap<String, Value> = HashMap::new();
        match durable.blob_multiget(&mapped).await {
            Ok(blobs) => {
                for (skey, raw) in blobs {
                    match self.serializer.deserialize::<Value>(&raw) {
                        Ok(value) => {
                            recovered.insert(skey, value);
                        }
                        Err(e) => {
                            warn!(key = %skey, error = %e, "undecodable durable payload in get_many");
                        }
                    }
                }
                let missing: Vec<String> = mapped
                    .iter()
                    .filter(|skey| !recovered.contains_key(*skey))
                    .cloned()
                    .collect();
                if !missing.is_empty() {
                    match durable.counter_multiget(&missing).await {
                        Ok(counts) => {
                            for (skey, count) in counts {
                                recovered.insert(skey, Value::from(count));
                            }
                        }
                        Err(e) => warn!(error = %e, "durable counter multiget failed"),
                    }
                }
            }
            Err(e) => warn!(error = %e, "durable multiget failed"),
        }

        if recovered.is_empty() {
            self.counters
                .misses
                .fetch_add(keys.len() as u64, Ordering::Relaxed);
            return found;
        }

        if let Some(fast) = &self.fast {
            let mut entries = Vec::with_capacity(recovered.len());
            for (skey, value) in &recovered {
                match self.serializer.serialize(value) {
                    Ok(raw) => entries.push((skey.clone(), raw)),
                    Err(e) => warn!(key = %skey, error = %e, "back-fill serialization failed"),
                }
            }
            if let Err(e) = fast.set_multi(&entries, Some(BACKFILL_TTL)).await {
                warn!(error = %e, "fast tier back-fill failed in get_many");
            }
        }

        self.counters
            .durable_hits
            .fetch_add(recovered.len() as u64, Ordering::Relaxed);
        for (skey, value) in recovered {
            if let Some(user_key) = unmapped.get(skey.as_str()) {
                found.insert((*user_key).to_string(), value);
            }
        }
        found
    }

    /// Store several entries at once. Bulk writes are blob-only: integer
    /// values written here do not touch the counter family, so callers
    /// needing counter semantics must use [`set`](Self::set) per key.
    pub async fn set_many(&self, entries: &[(&str, Value)], timeout: Option<Duration>) {
        self.set_many_inner(entries, timeout, true).await
    }

    async fn set_many_inner(
        &self,
        entries: &[(&str, Value)],
        timeout: Option<Duration>,
        retry: bool,
    ) {
        let mut encoded: Vec<(String, Vec<u8>)> = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            match self.serializer.serialize(value) {
                Ok(raw) => encoded.push((self.keys.make(key), raw)),
                Err(e) => error!(%key, error = %e, "unserializable value in set_many"),
            }
        }
        if encoded.is_empty() {
            return;
        }

        if let Some(fast) = &self.fast {
            match fast.set_multi(&encoded, timeout).await {
                Ok(()) => {}
                Err(FastTierError::NodeDisabledRetry) if retry => {
                    debug!("fast tier disabled until timed retry on set_many");
                    tokio::time::sleep(self.retry_backoff).await;
                    return Box::pin(self.set_many_inner(entries, timeout, false)).await;
                }
                Err(FastTierError::NodeDead) => {
                    error!("fast tier node dead on set_many, retrying once");
                    if let Err(e) = fast.set_multi(&encoded, timeout).await {
                        warn!(error = %e, "fast tier set_many retry failed");
                    }
                }
                Err(e) => warn!(error = %e, "fast tier set_many failed"),
            }
        }

        if let Some(durable) = &self.durable {
            if let Err(e) = durable.blob_batch_insert(&encoded, timeout).await {
                warn!(error = %e, "durable batch insert failed");
            }
        }

        self.counters
            .writes
            .fetch_add(encoded.len() as u64, Ordering::Relaxed);
    }

    /// Remove several keys. Bulk deletes are blob-only on the durable
    /// tier, mirroring [`set_many`](Self::set_many).
    pub async fn delete_many(&self, keys: &[&str]) {
        self.delete_many_inner(keys, true).await
    }

    async fn delete_many_inner(&self, keys: &[&str], retry: bool) {
        let mapped: Vec<String> = keys.iter().map(|key| self.keys.make(key)).collect();

        if let Some(fast) = &self.fast {
            match fast.delete_multi(&mapped).await {
                Ok(()) => {}
                Err(FastTierError::NodeDisabledRetry) if retry => {
                    debug!("fast tier disabled until timed retry on delete_many");
                    tokio::time::sleep(self.retry_backoff).await;
                    return Box::pin(self.delete_many_inner(keys, false)).await;
                }
                // A dead node needs no deletes.
                Err(e) => warn!(error = %e, "fast tier delete_many failed"),
            }
        }

        if let Some(durable) = &self.durable {
            if let Err(e) = durable.blob_batch_remove(&mapped).await {
                warn!(error = %e, "durable batch remove failed");
            }
        }

        self.counters
            .deletes
            .fetch_add(mapped.len() as u64, Ordering::Relaxed);
    }

    /// Drop everything from both tiers. Best-effort; failures are logged.
    pub async fn clear(&self) {
        if let Some(fast) = &self.fast {
            if let Err(e) = fast.flush_all().await {
                warn!(error = %e, "fast tier flush failed");
            }
        }
        if let Some(durable) = &self.durable {
            if let Err(e) = durable.truncate_all().await {
                warn!(error = %e, "durable truncate failed");
            }
        }
    }

    /// Disconnect fast-tier handles. The durable session stays up for the
    /// life of the process.
    pub async fn close(&self) {
        if let Some(fast) = &self.fast {
            fast.disconnect_all().await;
        }
    }

    /// Snapshot of the operation counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            fast_hits: self.counters.fast_hits.load(Ordering::Relaxed),
            durable_hits: self.counters.durable_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
        }
    }
}
