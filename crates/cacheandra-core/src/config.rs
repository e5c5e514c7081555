//! Backend configuration

use std::collections::HashMap;
use std::time::Duration;

/// Configuration for a two-tier cache.
///
/// Both tiers are optional: an empty `servers` list means no fast tier,
/// and `cassandra: None` means no durable tier. Everything is immutable
/// after construction.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Fast-tier servers (`host:port` or full `memcache://` URLs); keys
    /// are sharded across them by the client
    pub servers: Vec<String>,

    /// Opaque behavior options passed through to the fast-tier client,
    /// appended to each connection URL as query parameters
    pub options: HashMap<String, String>,

    /// Durable-tier contact points; `None` disables the tier
    pub cassandra: Option<Vec<String>>,

    /// Keyspace holding both column families
    pub keyspace: String,

    /// Blob column family; the counter family appends `_counter`
    pub column_family: String,

    /// TTL substituted when an operation passes none
    pub default_timeout: Duration,

    /// Sleep before the single re-entrant retry after a
    /// disabled-until-timed-retry signal
    pub retry_backoff: Duration,

    /// Prefix baked into every storage key
    pub key_prefix: String,

    /// Version baked into every storage key
    pub version: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            options: HashMap::new(),
            cassandra: None,
            keyspace: "cacheandra".to_string(),
            column_family: "cache".to_string(),
            default_timeout: Duration::from_secs(300),
            retry_backoff: Duration::from_millis(200),
            key_prefix: String::new(),
            version: 1,
        }
    }
}

impl CacheConfig {
    /// Create a config from a fast-tier server list.
    pub fn new<I, S>(servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            servers: servers.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Parse a `;`-separated server string. An empty string yields a
    /// config with no fast tier.
    pub fn from_server_string(servers: &str) -> Self {
        Self::new(
            servers
                .split(';')
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        )
    }

    /// Set the durable-tier contact points.
    pub fn cassandra<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cassandra = Some(nodes.into_iter().map(Into::into).collect());
        self
    }

    /// Set the keyspace.
    pub fn keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.keyspace = keyspace.into();
        self
    }

    /// Set the blob column family name.
    pub fn column_family(mut self, name: impl Into<String>) -> Self {
        self.column_family = name.into();
        self
    }

    /// Add a fast-tier client option.
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Set the default TTL.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Set the retry backoff.
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Set the storage-key prefix.
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the storage-key version.
    pub fn version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Name of the counter column family.
    pub fn counter_family(&self) -> String {
        format!("{}_counter", self.column_family)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_string() {
        let config = CacheConfig::from_server_string("10.0.0.1:11211;10.0.0.2:11211");
        assert_eq!(config.servers, vec!["10.0.0.1:11211", "10.0.0.2:11211"]);

        let config = CacheConfig::from_server_string("");
        assert!(config.servers.is_empty());
    }

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.keyspace, "cacheandra");
        assert_eq!(config.column_family, "cache");
        assert_eq!(config.counter_family(), "cache_counter");
        assert_eq!(config.retry_backoff, Duration::from_millis(200));
        assert!(config.cassandra.is_none());
    }

    #[test]
    fn test_builder() {
        let config = CacheConfig::new(["127.0.0.1:11211"])
            .cassandra(["127.0.0.1:9042"])
            .keyspace("polls")
            .column_family("answers")
            .option("tcp_nodelay", "true")
            .version(3);
        assert_eq!(config.counter_family(), "answers_counter");
        assert_eq!(config.cassandra.as_deref(), Some(&["127.0.0.1:9042".to_string()][..]));
        assert_eq!(config.options.get("tcp_nodelay").map(String::as_str), Some("true"));
        assert_eq!(config.version, 3);
    }
}
