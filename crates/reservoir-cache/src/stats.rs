//! Sharded cache statistics

use serde::{Deserialize, Serialize};

/// Outcome counters for sharded cache lookups
///
/// Each `get` bumps exactly one of the four counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatistics {
    pub local_hits: u64,
    pub remote_hits: u64,
    pub misses: u64,
    pub network_errors: u64,
}

impl CacheStatistics {
    /// Total number of lookups recorded
    pub fn lookups(&self) -> u64 {
        self.local_hits + self.remote_hits + self.misses + self.network_errors
    }

    /// Fraction of lookups answered locally or by a peer
    pub fn hit_rate(&self) -> f64 {
        match self.lookups() {
            0 => 0.0,
            total => (self.local_hits + self.remote_hits) as f64 / total as f64,
        }
    }
}
