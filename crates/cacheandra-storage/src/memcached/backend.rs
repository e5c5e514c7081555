use std::collections::HashMap;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use memcache::{Client, CommandError, MemcacheError};
use tokio::task;
use tracing::debug;

use cacheandra_core::{FastTier, FastTierError};

use super::config::MemcachedConfig;

/// Relative TTLs above this are interpreted by memcached as absolute unix
/// timestamps, so larger timeouts get the current time added first.
const MAX_RELATIVE_TTL: u64 = 60 * 60 * 24 * 30;

/// Fast-tier driver over a memcached-protocol cluster.
///
/// The client shards keys across the configured servers and pools
/// connections per server, so a single handle is shared by every task;
/// calls run on the blocking thread pool.
#[derive(Clone)]
pub struct MemcachedTier {
    client: Arc<Client>,
    default_timeout: Duration,
}

impl MemcachedTier {
    /// Connect to the configured servers.
    pub fn connect(config: &MemcachedConfig) -> Result<Self, FastTierError> {
        let client = Client::connect(config.urls()).map_err(classify)?;
        Ok(Self {
            client: Arc::new(client),
            default_timeout: config.default_timeout,
        })
    }

    async fn run<T, F>(&self, op: F) -> Result<T, MemcacheError>
    where
        T: Send + 'static,
        F: FnOnce(&Client) -> Result<T, MemcacheError> + Send + 'static,
    {
        let client = Arc::clone(&self.client);
        match task::spawn_blocking(move || op(&client)).await {
            Ok(result) => result,
            Err(join) => Err(MemcacheError::from(std::io::Error::other(join.to_string()))),
        }
    }

    fn expiration(&self, timeout: Option<Duration>) -> u32 {
        normalize_expiration(timeout, self.default_timeout)
    }
}

#[async_trait]
impl FastTier for MemcachedTier {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, FastTierError> {
        let key = key.to_string();
        self.run(move |c| c.get::<Vec<u8>>(&key)).await.map_err(classify)
    }

    async fn get_multi(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>, FastTierError> {
        let keys = keys.to_vec();
        self.run(move |c| {
            let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
            c.gets::<Vec<u8>>(&refs)
        })
        .await
        .map_err(classify)
    }

    async fn set(
        &self,
        key: &str,
        value: &[u8],
        timeout: Option<Duration>,
    ) -> Result<(), FastTierError> {
        let key = key.to_string();
        let value = value.to_vec();
        let expiration = self.expiration(timeout);
        self.run(move |c| c.set(&key, value.as_slice(), expiration))
            .await
            .map_err(classify)
    }

    async fn set_multi(
        &self,
        entries: &[(String, Vec<u8>)],
        timeout: Option<Duration>,
    ) -> Result<(), FastTierError> {
        let entries = entries.to_vec();
        let expiration = self.expiration(timeout);
        self.run(move |c| {
            for (key, value) in &entries {
                c.set(key, value.as_slice(), expiration)?;
            }
            Ok(())
        })
        .await
        .map_err(classify)
    }

    async fn add(
        &self,
        key: &str,
        value: &[u8],
        timeout: Option<Duration>,
    ) -> Result<bool, FastTierError> {
        let key = key.to_string();
        let value = value.to_vec();
        let expiration = self.expiration(timeout);
        match self
            .run(move |c| c.add(&key, value.as_slice(), expiration))
            .await
        {
            Ok(()) => Ok(true),
            Err(MemcacheError::CommandError(CommandError::KeyExists)) => Ok(false),
            Err(err) => Err(classify(err)),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), FastTierError> {
        let key = key.to_string();
        self.run(move |c| c.delete(&key).map(|_| ()))
            .await
            .map_err(classify)
    }

    async fn delete_multi(&self, keys: &[String]) -> Result<(), FastTierError> {
        let keys = keys.to_vec();
        self.run(move |c| {
            for key in &keys {
                c.delete(key)?;
            }
            Ok(())
        })
        .await
        .map_err(classify)
    }

    async fn incr(&self, key: &str, delta: u64) -> Result<u64, FastTierError> {
        let key = key.to_string();
        self.run(move |c| c.increment(&key, delta))
            .await
            .map_err(classify)
    }

    async fn decr(&self, key: &str, delta: u64) -> Result<u64, FastTierError> {
        let key = key.to_string();
        self.run(move |c| c.decrement(&key, delta))
            .await
            .map_err(classify)
    }

    async fn flush_all(&self) -> Result<(), FastTierError> {
        self.run(|c| c.flush()).await.map_err(classify)
    }

    async fn disconnect_all(&self) {
        // The client's per-server pools tear down when the last handle
        // drops; nothing to do eagerly.
        debug!("fast tier disconnect requested");
    }
}

/// Maps raw client errors into the coordinator's taxonomy. This is the
/// only place raw error payloads are inspected.
///
/// Timeout-shaped I/O means a node is disabled until a timed retry; a
/// refused or torn-down connection means the node is dead.
pub(crate) fn classify(err: MemcacheError) -> FastTierError {
    match err {
        MemcacheError::CommandError(CommandError::KeyNotFound) => FastTierError::NotFound,
        MemcacheError::IOError(ref io) => match io.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted => {
                FastTierError::NodeDisabledRetry
            }
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected => FastTierError::NodeDead,
            _ => FastTierError::Other(err.to_string()),
        },
        other => FastTierError::Other(other.to_string()),
    }
}

/// Zero or absent timeouts take the default; anything past the protocol's
/// relative-TTL ceiling is converted to an absolute timestamp.
fn normalize_expiration(timeout: Option<Duration>, default_timeout: Duration) -> u32 {
    let secs = timeout
        .filter(|t| !t.is_zero())
        .unwrap_or(default_timeout)
        .as_secs();
    if secs > MAX_RELATIVE_TTL {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        (now + secs).min(u32::MAX as u64) as u32
    } else {
        secs as u32
    }
}
