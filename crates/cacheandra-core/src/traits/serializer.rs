//! Pluggable serialization trait

use crate::CacheError;
use serde::{Serialize, de::DeserializeOwned};

/// Bidirectional encoding of application values into the opaque payload
/// stored by the blob family and the fast tier.
///
/// Round-trip law: `deserialize(serialize(v)) == v` for every supported
/// value. The rest of the system never inspects the bytes.
pub trait Serializer: Send + Sync + Clone + 'static {
    /// Name of the serializer (for debugging/logs)
    fn name(&self) -> &str;

    /// Serialize a value to bytes
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CacheError>;

    /// Deserialize bytes to a value
    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CacheError>;
}

/// JSON serializer (default).
///
/// JSON is load-bearing here rather than a convenience: a bare integer
/// encodes as ASCII decimal, which is the representation memcached's
/// `incr`/`decr` operate on, so integer entries in the fast tier stay
/// incrementable in place.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn name(&self) -> &str {
        "json"
    }

    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CacheError> {
        serde_json::to_vec(value).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CacheError> {
        serde_json::from_slice(bytes).map_err(|e| CacheError::Deserialization(e.to_string()))
    }
}
