//! Reservoir Cache
//!
//! This crate provides the bounded LRU cache and the sharded cache facade
//! that layers it over a set of remote peers.

pub mod lru;
pub mod router;
pub mod sharded;
pub mod stats;

pub use lru::BoundedCache;
pub use router::{key_hash, shard_for_key};
pub use sharded::ShardedCache;
pub use stats::CacheStatistics;
