//! Tier driver traits

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::{DurableTierError, FastTierError};

/// Driver for the volatile fast tier (memcached protocol).
///
/// Values are opaque payload bytes; integer entries must be stored in the
/// protocol's ASCII-decimal form for `incr`/`decr` to apply. A `timeout`
/// of `None` (or zero) means "use the driver's default"; normalization of
/// long timeouts to absolute timestamps is the driver's business.
///
/// Misses are not errors: `get` answers `Ok(None)`, `add` answers
/// `Ok(false)` when the key already exists. Failures arrive
/// pre-classified as [`FastTierError`].
#[async_trait]
pub trait FastTier: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, FastTierError>;

    /// Fetch several keys at once; absent keys are simply not in the map.
    async fn get_multi(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>, FastTierError>;

    async fn set(
        &self,
        key: &str,
        value: &[u8],
        timeout: Option<Duration>,
    ) -> Result<(), FastTierError>;

    async fn set_multi(
        &self,
        entries: &[(String, Vec<u8>)],
        timeout: Option<Duration>,
    ) -> Result<(), FastTierError>;

    /// Insert iff absent. `Ok(false)` means a live entry was already there.
    async fn add(
        &self,
        key: &str,
        value: &[u8],
        timeout: Option<Duration>,
    ) -> Result<bool, FastTierError>;

    async fn delete(&self, key: &str) -> Result<(), FastTierError>;

    async fn delete_multi(&self, keys: &[String]) -> Result<(), FastTierError>;

    /// Increment an existing counter entry; absent keys answer
    /// [`FastTierError::NotFound`].
    async fn incr(&self, key: &str, delta: u64) -> Result<u64, FastTierError>;

    /// Decrement an existing counter entry (servers clamp at zero).
    async fn decr(&self, key: &str, delta: u64) -> Result<u64, FastTierError>;

    async fn flush_all(&self) -> Result<(), FastTierError>;

    /// Drop client handles. Connection pools may outlive this call.
    async fn disconnect_all(&self);
}

/// Driver for the durable fallback tier (wide-column store).
///
/// Two logical column families under one keyspace: a blob family (`val`
/// column, per-row TTL) and a counter family (`count` column of the native
/// additive counter type, no TTL). Row absence is `Ok(None)`; failures
/// arrive pre-classified as [`DurableTierError`]. The driver maps an
/// operation `timeout` to a row TTL itself and never retries beyond the
/// connection pool's built-in policy.
#[async_trait]
pub trait DurableTier: Send + Sync + 'static {
    async fn blob_get(&self, key: &str) -> Result<Option<Vec<u8>>, DurableTierError>;

    async fn blob_insert(
        &self,
        key: &str,
        value: &[u8],
        timeout: Option<Duration>,
    ) -> Result<(), DurableTierError>;

    async fn blob_remove(&self, key: &str) -> Result<(), DurableTierError>;

    async fn blob_multiget(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, Vec<u8>>, DurableTierError>;

    async fn blob_batch_insert(
        &self,
        entries: &[(String, Vec<u8>)],
        timeout: Option<Duration>,
    ) -> Result<(), DurableTierError>;

    async fn blob_batch_remove(&self, keys: &[String]) -> Result<(), DurableTierError>;

    async fn counter_get(&self, key: &str) -> Result<Option<i64>, DurableTierError>;

    async fn counter_multiget(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, i64>, DurableTierError>;

    /// Commutative add; creates the counter at `delta` when absent.
    async fn counter_add(&self, key: &str, delta: i64) -> Result<(), DurableTierError>;

    async fn counter_remove(&self, key: &str) -> Result<(), DurableTierError>;

    /// Truncate both column families.
    async fn truncate_all(&self) -> Result<(), DurableTierError>;
}
