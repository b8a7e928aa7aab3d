//! Key-to-peer routing
//!
//! A key is routed to `hash(key) mod peer_count`. The hash is the first eight
//! bytes of the key's SHA-256 digest, so every process agrees on placement.
//! Changing the number of peers reshuffles most keys; there is no hash ring.

use sha2::{Digest, Sha256};

/// Stable 64-bit hash of a cache key
pub fn key_hash(key: &str) -> u64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

/// Index of the peer responsible for `key`, or `None` when there are no peers
pub fn shard_for_key(key: &str, peer_count: usize) -> Option<usize> {
    if peer_count == 0 {
        return None;
    }
    Some((key_hash(key) % peer_count as u64) as usize)
}
