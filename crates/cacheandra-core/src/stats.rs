//! Operation counters

/// Point-in-time snapshot of a cache instance's operation counters.
///
/// `fast_hits` and `durable_hits` distinguish which tier answered a read;
/// a durable hit on a healthy deployment means the fast tier missed and a
/// back-fill was attempted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub fast_hits: u64,
    pub durable_hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub deletes: u64,
}

impl CacheStats {
    /// Total reads that found a value in either tier.
    pub fn hits(&self) -> u64 {
        self.fast_hits + self.durable_hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hits() {
        let stats = CacheStats {
            fast_hits: 3,
            durable_hits: 2,
            misses: 1,
            ..Default::default()
        };
        assert_eq!(stats.hits(), 5);
    }
}
