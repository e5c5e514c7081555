//! Error types for cache operations

use thiserror::Error;

/// The only error surfaced to callers.
///
/// Cache semantics under partial outage are best-effort: tier failures are
/// logged and degrade to a miss, a falsy result or a silent success. The
/// single exception is `incr`/`decr` on a key no reachable tier knows.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// Counter update on a key with no live entry
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Serialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization failed
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Classified fast-tier failures.
///
/// A plain miss is not an error: `get` answers `Ok(None)` and `add` answers
/// `Ok(false)`. These variants are what the coordinator branches on; only
/// the driver's classification routine ever sees the raw client errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FastTierError {
    /// Counter update on an absent key
    #[error("fast tier: key not found")]
    NotFound,

    /// A node failed and is disabled until a timed retry; it will either
    /// come back to life or be marked dead
    #[error("fast tier: server disabled until timed retry")]
    NodeDisabledRetry,

    /// A node is marked dead
    #[error("fast tier: server is marked dead")]
    NodeDead,

    /// Anything the classifier does not recognize
    #[error("fast tier: {0}")]
    Other(String),
}

/// Classified durable-tier failures. Absence of a row is `Ok(None)`, never
/// an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DurableTierError {
    /// Unavailable, timed out, no connection or retries exhausted
    #[error("durable tier unavailable: {0}")]
    Transient(String),

    /// Auth, schema or invalid-request problems; retrying cannot help
    #[error("durable tier rejected request: {0}")]
    Fatal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CacheError::KeyNotFound("counter".to_string());
        assert_eq!(err.to_string(), "key not found: counter");

        let err = FastTierError::NodeDisabledRetry;
        assert_eq!(
            err.to_string(),
            "fast tier: server disabled until timed retry"
        );

        let err = DurableTierError::Transient("no connection".to_string());
        assert_eq!(err.to_string(), "durable tier unavailable: no connection");
    }

    #[test]
    fn test_error_clone() {
        let err = FastTierError::NodeDead;
        assert_eq!(err.clone(), err);
    }
}
