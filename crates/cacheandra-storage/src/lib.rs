//! Tier drivers for the cacheandra backend
//!
//! One driver per tier: [`memcached`] wraps a memcached-protocol cluster
//! (the volatile fast tier), [`scylla`] wraps a Cassandra-compatible
//! wide-column store (the durable fallback tier). Each driver owns the
//! classification of its client's raw errors into the taxonomy the
//! coordinator branches on.

#[cfg(feature = "memcached")]
pub mod memcached;

#[cfg(feature = "scylla")]
pub mod scylla;

#[cfg(feature = "memcached")]
pub use memcached::{MemcachedConfig, MemcachedTier};

#[cfg(feature = "scylla")]
pub use scylla::{ScyllaConfig, ScyllaTier};
