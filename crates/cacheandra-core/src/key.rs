//! Storage key derivation

/// Canonicalizes a user key into the storage key used by both tiers.
///
/// The composition is `{prefix}:{version}:{key}`. For a fixed prefix the
/// mapping from `(key, version)` to storage key is injective: the version
/// renders as decimal and is delimited on both sides, so no other
/// `(key, version)` pair can produce the same string.
///
/// Public entry points map each user key through this exactly once;
/// everything below the coordinator works in storage keys.
#[derive(Debug, Clone)]
pub struct KeyMaker {
    prefix: String,
    version: u64,
}

impl KeyMaker {
    pub fn new(prefix: impl Into<String>, version: u64) -> Self {
        Self {
            prefix: prefix.into(),
            version,
        }
    }

    /// Derive the storage key for `key` under the configured version.
    pub fn make(&self, key: &str) -> String {
        format!("{}:{}:{}", self.prefix, self.version, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let keys = KeyMaker::new("app", 2);
        assert_eq!(keys.make("user:7"), keys.make("user:7"));
        assert_eq!(keys.make("user:7"), "app:2:user:7");
    }

    #[test]
    fn test_version_and_key_are_distinguished() {
        let v1 = KeyMaker::new("app", 1);
        let v2 = KeyMaker::new("app", 2);
        // Same user key under different versions never collides.
        assert_ne!(v1.make("k"), v2.make("k"));
        // A user key that embeds the delimiter cannot forge another version:
        // the version segment sits between fixed delimiters.
        assert_ne!(v1.make("2:k"), v2.make("k"));
    }

    #[test]
    fn test_empty_prefix() {
        let keys = KeyMaker::new("", 1);
        assert_eq!(keys.make("k"), ":1:k");
    }
}
