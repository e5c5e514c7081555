//! cacheandra: a two-tier cache backend
//!
//! Presents a single key/value cache over two tiers: a volatile
//! memcached-protocol fast tier and a durable wide-column fallback tier
//! with per-row TTL and native counters. The fast tier is trusted when it
//! answers; misses and node failures fall back to the durable tier, whose
//! hits are back-filled with a short TTL so the tiers converge. Integer
//! values additionally live in the durable tier's counter family, which
//! keeps `incr`/`decr` meaningful across fast-tier loss.
//!
//! Either tier may be absent or down; every operation degrades to the
//! best answer the remaining tier can give.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use cacheandra::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = CacheConfig::new(["127.0.0.1:11211"])
//!         .cassandra(["127.0.0.1:9042"]);
//!     let cache = TieredCache::connect(config).await;
//!
//!     cache.set("greeting", &json!("hello"), None).await;
//!     assert_eq!(cache.get("greeting").await, Some(json!("hello")));
//!
//!     cache.set("visits", &json!(1), None).await;
//!     let visits = cache.incr("visits", 1).await.unwrap();
//!     assert_eq!(visits, 2);
//! }
//! ```

mod cache;

// Re-export core
pub use cacheandra_core::*;

// Re-export tier drivers
pub use cacheandra_storage::{MemcachedConfig, MemcachedTier, ScyllaConfig, ScyllaTier};

pub use cache::TieredCache;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        CacheConfig, CacheError, CacheStats, DurableTier, FastTier, JsonSerializer, Serializer,
        TieredCache,
    };
}

#[cfg(test)]
mod tests;
