//! Configuration for the fast-tier driver

use std::collections::HashMap;
use std::time::Duration;

/// Configuration for [`MemcachedTier`](super::MemcachedTier).
#[derive(Debug, Clone)]
pub struct MemcachedConfig {
    /// Server addresses (`host:port` or full `memcache://` URLs); the
    /// client shards keys across them
    pub servers: Vec<String>,

    /// Client behavior options, appended to each URL as query parameters
    /// (e.g. `timeout`, `tcp_nodelay`, `protocol`)
    pub options: HashMap<String, String>,

    /// TTL substituted when an operation passes none
    pub default_timeout: Duration,
}

impl Default for MemcachedConfig {
    fn default() -> Self {
        Self {
            servers: vec!["127.0.0.1:11211".to_string()],
            options: HashMap::new(),
            default_timeout: Duration::from_secs(300),
        }
    }
}

impl MemcachedConfig {
    /// Create a config for the given servers.
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

    /// Connection URLs with the behavior options applied, in a
    /// deterministic order.
    pub(crate) fn urls(&self) -> Vec<String> {
        let mut options: Vec<(&str, &str)> = self
            .options
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        options.sort();

        self.servers
            .iter()
            .map(|server| {
                let mut url = if server.contains("://") {
                    server.clone()
                } else {
                    format!("memcache://{server}")
                };
                let mut sep = if url.contains('?') { '&' } else { '?' };
                for (key, value) in &options {
                    url.push(sep);
                    url.push_str(key);
                    url.push('=');
                    url.push_str(value);
                    sep = '&';
                }
                url
            })
            .collect()
    }
}
