//! Remote store trait

use async_trait::async_trait;
use std::time::Duration;

use crate::error::RemoteError;
use crate::node::CacheNode;

/// Network boundary between the sharded cache and its peers
///
/// Implementations talk to one peer per call and report failures as
/// [`RemoteError`]. No retries happen above this trait; an implementation
/// that wants retry or backoff does it internally.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Write a value to the peer, optionally expiring after `ttl`
    async fn store(
        &self,
        node: &CacheNode,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), RemoteError>;

    /// Read a value from the peer
    async fn fetch(&self, node: &CacheNode, key: &str) -> Result<Option<String>, RemoteError>;

    /// Delete a value from the peer, returning whether it existed
    async fn delete(&self, node: &CacheNode, key: &str) -> Result<bool, RemoteError>;

    /// Check whether the peer is reachable
    async fn ping(&self, node: &CacheNode) -> Result<bool, RemoteError>;
}
