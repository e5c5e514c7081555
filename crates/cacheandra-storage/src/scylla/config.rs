//! Configuration for the durable-tier driver

use std::time::Duration;

/// Configuration for [`ScyllaTier`](super::ScyllaTier).
#[derive(Debug, Clone)]
pub struct ScyllaConfig {
    /// Contact points (`host:port`)
    pub nodes: Vec<String>,

    /// Keyspace holding both column families
    pub keyspace: String,

    /// Blob column family; the counter family appends `_counter`
    pub column_family: String,

    /// Timeout for establishing connections
    pub connect_timeout: Duration,

    /// Per-request timeout; retries beyond this are the pool's business
    pub request_timeout: Duration,
}

impl Default for ScyllaConfig {
    fn default() -> Self {
        Self {
            nodes: vec!["127.0.0.1:9042".to_string()],
            keyspace: "cacheandra".to_string(),
            column_family: "cache".to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_millis(500),
        }
    }
}

impl ScyllaConfig {
    /// Create a config for the given contact points.
    pub fn new<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            nodes: nodes.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Name of the counter column family.
    pub fn counter_family(&self) -> String {
        format!("{}_counter", self.column_family)
    }
}
