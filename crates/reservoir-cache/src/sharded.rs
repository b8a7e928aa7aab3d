//! Sharded cache facade
//!
//! Reads and writes go through a process-local [`BoundedCache`] first and are
//! then routed to one remote peer chosen by [`shard_for_key`]. The remote tier
//! is best effort: network failures turn lookups into misses and make writes
//! report `false`, but never undo the local write.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use reservoir_remote::{CacheNode, RemoteStore};
use tracing::{debug, info, warn};

use crate::lru::BoundedCache;
use crate::router::shard_for_key;
use crate::stats::CacheStatistics;

#[derive(Debug, Clone, Copy)]
enum Lookup {
    LocalHit,
    RemoteHit,
    Miss,
    NetworkError,
}

/// Local LRU cache fronting a set of remote peers
pub struct ShardedCache {
    local: BoundedCache<String, String>,
    nodes: RwLock<Vec<CacheNode>>,
    remote: Arc<dyn RemoteStore>,
    stats: Mutex<CacheStatistics>,
}

impl ShardedCache {
    /// Create a facade; an empty node list runs in local-only mode
    pub fn new(
        local_capacity: NonZeroUsize,
        nodes: Vec<CacheNode>,
        remote: Arc<dyn RemoteStore>,
    ) -> Self {
        info!(
            "Distributed cache initialized with {} nodes (local capacity: {})",
            nodes.len(),
            local_capacity
        );

        Self {
            local: BoundedCache::new(local_capacity),
            nodes: RwLock::new(nodes),
            remote,
            stats: Mutex::new(CacheStatistics::default()),
        }
    }

    /// The process-local tier
    pub fn local(&self) -> &BoundedCache<String, String> {
        &self.local
    }

    /// Peer currently responsible for `key`
    pub fn node_for_key(&self, key: &str) -> Option<CacheNode> {
        let nodes = self.nodes.read();
        shard_for_key(key, nodes.len()).map(|idx| nodes[idx].clone())
    }

    /// Write locally, then propagate to the key's peer
    ///
    /// Returns `false` only when propagation fails; the local write stands
    /// either way. `ttl` is passed to the peer, the local tier keeps entries
    /// until they are evicted.
    pub async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> bool {
        self.local.put(key.to_string(), value.to_string());

        let Some(node) = self.node_for_key(key) else {
            return true;
        };

        match self.remote.store(&node, key, value, ttl).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to sync {} to {}: {}", key, node, e);
                metrics::counter!("reservoir_cache_sync_failures_total").increment(1);
                false
            }
        }
    }

    /// Look up a key locally, then at its peer
    ///
    /// A remote hit is written back into the local tier unless a local write
    /// for the same key landed while the fetch was in flight.
    pub async fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = self.local.get(key) {
            self.record(Lookup::LocalHit);
            return Some(value);
        }

        let Some(node) = self.node_for_key(key) else {
            self.record(Lookup::Miss);
            return None;
        };

        match self.remote.fetch(&node, key).await {
            Ok(Some(value)) => {
                debug!("Remote hit for {} on {}", key, node);
                self.local.put_if_absent(key.to_string(), value.clone());
                self.record(Lookup::RemoteHit);
                Some(value)
            }
            Ok(None) => {
                self.record(Lookup::Miss);
                None
            }
            Err(e) => {
                warn!("Failed to fetch {} from {}: {}", key, node, e);
                self.record(Lookup::NetworkError);
                None
            }
        }
    }

    /// Remove locally, then best-effort delete at the key's peer
    pub async fn remove(&self, key: &str) -> bool {
        self.local.remove(key);

        let Some(node) = self.node_for_key(key) else {
            return true;
        };

        match self.remote.delete(&node, key).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to delete {} from {}: {}", key, node, e);
                false
            }
        }
    }

    /// Apply `put` to each item in turn; true if every propagation succeeded
    pub async fn put_batch<I, K, V>(&self, items: I) -> bool
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut all_synced = true;
        for (key, value) in items {
            all_synced &= self.put(key.as_ref(), value.as_ref(), None).await;
        }
        all_synced
    }

    /// Apply `get` to each key in turn, returning the keys that were found
    pub async fn get_batch<I, K>(&self, keys: I) -> BTreeMap<String, String>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let mut found = BTreeMap::new();
        for key in keys {
            let key = key.as_ref();
            if let Some(value) = self.get(key).await {
                found.insert(key.to_string(), value);
            }
        }
        found
    }

    /// Add a peer; ignored if one with the same address and port exists
    pub fn add_node(&self, node: CacheNode) -> bool {
        let mut nodes = self.nodes.write();
        if nodes.iter().any(|n| n.matches(&node.address, node.port)) {
            debug!("Cache node {} already registered", node);
            return false;
        }

        info!("Adding cache node {}", node);
        nodes.push(node);
        true
    }

    /// Remove a peer by address and port
    pub fn remove_node(&self, address: &str, port: u16) -> bool {
        let mut nodes = self.nodes.write();
        let before = nodes.len();
        nodes.retain(|n| !n.matches(address, port));

        let removed = nodes.len() < before;
        if removed {
            info!("Removed cache node {}:{}", address, port);
        }
        removed
    }

    pub fn nodes(&self) -> Vec<CacheNode> {
        self.nodes.read().clone()
    }

    /// Peers that passed the last health check
    pub fn active_nodes(&self) -> Vec<CacheNode> {
        self.nodes
            .read()
            .iter()
            .filter(|n| n.available)
            .cloned()
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }

    /// Ping every peer and record which ones answered
    ///
    /// Pings run against a snapshot without holding the lock; results are
    /// applied by address so concurrent membership changes are preserved.
    /// Returns the number of available peers.
    pub async fn health_check(&self) -> usize {
        let snapshot = self.nodes();
        let mut results = Vec::with_capacity(snapshot.len());

        for node in &snapshot {
            let reachable = match self.remote.ping(node).await {
                Ok(true) => true,
                Ok(false) => {
                    warn!("Cache node {} did not answer ping", node);
                    false
                }
                Err(e) => {
                    warn!("Cache node {} health check failed: {}", node, e);
                    false
                }
            };
            results.push((node.address.clone(), node.port, reachable));
        }

        let now = Utc::now();
        let mut nodes = self.nodes.write();
        for (address, port, reachable) in results {
            if let Some(node) = nodes.iter_mut().find(|n| n.matches(&address, port)) {
                if reachable && !node.available {
                    info!("Cache node {} recovered", node);
                }
                node.available = reachable;
                if reachable {
                    node.last_ping = Some(now);
                }
            }
        }

        let available = nodes.iter().filter(|n| n.available).count();
        metrics::gauge!("reservoir_cache_available_nodes").set(available as f64);
        available
    }

    /// Consistent snapshot of the lookup counters
    pub fn statistics(&self) -> CacheStatistics {
        *self.stats.lock()
    }

    fn record(&self, lookup: Lookup) {
        let mut stats = self.stats.lock();
        match lookup {
            Lookup::LocalHit => {
                stats.local_hits += 1;
                metrics::counter!("reservoir_cache_local_hits_total").increment(1);
            }
            Lookup::RemoteHit => {
                stats.remote_hits += 1;
                metrics::counter!("reservoir_cache_remote_hits_total").increment(1);
            }
            Lookup::Miss => {
                stats.misses += 1;
                metrics::counter!("reservoir_cache_misses_total").increment(1);
            }
            Lookup::NetworkError => {
                stats.network_errors += 1;
                metrics::counter!("reservoir_cache_network_errors_total").increment(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reservoir_remote::{InMemoryRemote, RemoteError};
    use async_trait::async_trait;
    use tokio::sync::Notify;
    use tokio::task::JoinSet;

    fn capacity(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    fn create_test_nodes(count: u16) -> Vec<CacheNode> {
        (0..count)
            .map(|i| CacheNode::new(format!("cache-{}", i), 7000 + i))
            .collect()
    }

    fn create_test_cache(nodes: Vec<CacheNode>, remote: Arc<InMemoryRemote>) -> ShardedCache {
        ShardedCache::new(capacity(100), nodes, remote)
    }

    /// Peer that answers pings with `false` and rejects everything else
    struct SilentRemote;

    #[async_trait]
    impl RemoteStore for SilentRemote {
        async fn store(
            &self,
            node: &CacheNode,
            _key: &str,
            _value: &str,
            _ttl: Option<Duration>,
        ) -> Result<(), RemoteError> {
            Err(RemoteError::Rejected(node.endpoint()))
        }

        async fn fetch(&self, node: &CacheNode, _key: &str) -> Result<Option<String>, RemoteError> {
            Err(RemoteError::Rejected(node.endpoint()))
        }

        async fn delete(&self, node: &CacheNode, _key: &str) -> Result<bool, RemoteError> {
            Err(RemoteError::Rejected(node.endpoint()))
        }

        async fn ping(&self, _node: &CacheNode) -> Result<bool, RemoteError> {
            Ok(false)
        }
    }

    /// In-memory peer that holds each fetch until told to resume
    #[derive(Default)]
    struct PausingRemote {
        inner: InMemoryRemote,
        fetched: Notify,
        resume: Notify,
    }

    #[async_trait]
    impl RemoteStore for PausingRemote {
        async fn store(
            &self,
            node: &CacheNode,
            key: &str,
            value: &str,
            ttl: Option<Duration>,
        ) -> Result<(), RemoteError> {
            self.inner.store(node, key, value, ttl).await
        }

        async fn fetch(&self, node: &CacheNode, key: &str) -> Result<Option<String>, RemoteError> {
            let value = self.inner.fetch(node, key).await?;
            self.fetched.notify_one();
            self.resume.notified().await;
            Ok(value)
        }

        async fn delete(&self, node: &CacheNode, key: &str) -> Result<bool, RemoteError> {
            self.inner.delete(node, key).await
        }

        async fn ping(&self, node: &CacheNode) -> Result<bool, RemoteError> {
            self.inner.ping(node).await
        }
    }

    #[tokio::test]
    async fn test_local_only_mode() {
        let cache = create_test_cache(vec![], Arc::new(InMemoryRemote::new()));

        assert!(cache.put("user:1", "alice", None).await);
        assert_eq!(cache.get("user:1").await, Some("alice".to_string()));
        assert_eq!(cache.get("user:2").await, None);

        let stats = cache.statistics();
        assert_eq!(stats.local_hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.network_errors, 0);
        assert!(cache.node_for_key("user:1").is_none());
    }

    #[tokio::test]
    async fn test_put_writes_through_to_peer() {
        let remote = Arc::new(InMemoryRemote::new());
        let nodes = create_test_nodes(3);
        let cache = create_test_cache(nodes.clone(), remote.clone());

        assert!(cache.put("user:1", "alice", None).await);

        let owner = cache.node_for_key("user:1").unwrap();
        assert_eq!(remote.len_for(&owner), 1);
        let total: usize = nodes.iter().map(|n| remote.len_for(n)).sum();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn test_remote_hit_populates_local() {
        let remote = Arc::new(InMemoryRemote::new());
        let nodes = create_test_nodes(3);
        let writer = create_test_cache(nodes.clone(), remote.clone());
        let reader = create_test_cache(nodes, remote);

        writer.put("user:1", "alice", None).await;

        assert!(!reader.local().contains("user:1"));
        assert_eq!(reader.get("user:1").await, Some("alice".to_string()));
        assert!(reader.local().contains("user:1"));
        assert_eq!(reader.get("user:1").await, Some("alice".to_string()));

        let stats = reader.statistics();
        assert_eq!(stats.remote_hits, 1);
        assert_eq!(stats.local_hits, 1);
        assert_eq!(stats.misses, 0);
    }

    #[tokio::test]
    async fn test_remote_miss() {
        let cache = create_test_cache(create_test_nodes(2), Arc::new(InMemoryRemote::new()));

        assert_eq!(cache.get("missing").await, None);
        assert_eq!(cache.statistics().misses, 1);
        assert_eq!(cache.statistics().network_errors, 0);
    }

    #[tokio::test]
    async fn test_network_error_downgrades_to_miss() {
        let remote = Arc::new(InMemoryRemote::new());
        let nodes = create_test_nodes(1);
        let cache = create_test_cache(nodes.clone(), remote.clone());

        remote.set_reachable(&nodes[0], false);

        // Local write survives a failed propagation
        assert!(!cache.put("user:1", "alice", None).await);
        assert_eq!(cache.get("user:1").await, Some("alice".to_string()));

        assert_eq!(cache.get("user:2").await, None);
        let stats = cache.statistics();
        assert_eq!(stats.local_hits, 1);
        assert_eq!(stats.network_errors, 1);
        assert_eq!(stats.misses, 0);
    }

    #[tokio::test]
    async fn test_remove() {
        let remote = Arc::new(InMemoryRemote::new());
        let cache = create_test_cache(create_test_nodes(2), remote.clone());

        cache.put("user:1", "alice", None).await;
        let owner = cache.node_for_key("user:1").unwrap();

        assert!(cache.remove("user:1").await);
        assert!(!cache.local().contains("user:1"));
        assert_eq!(remote.len_for(&owner), 0);
        assert_eq!(cache.get("user:1").await, None);
    }

    #[tokio::test]
    async fn test_remote_failures_are_reported() {
        let cache = ShardedCache::new(capacity(10), create_test_nodes(2), Arc::new(SilentRemote));

        assert!(!cache.put("k", "v", None).await);
        assert!(!cache.remove("k").await);
        assert_eq!(cache.health_check().await, 0);
        assert!(cache.active_nodes().is_empty());
    }

    #[tokio::test]
    async fn test_batch_operations() {
        let remote = Arc::new(InMemoryRemote::new());
        let cache = create_test_cache(create_test_nodes(3), remote);

        let items = vec![("a", "1"), ("b", "2"), ("c", "3")];
        assert!(cache.put_batch(items).await);

        let found = cache.get_batch(["a", "b", "c", "d"]).await;
        assert_eq!(found.len(), 3);
        assert_eq!(found.get("b"), Some(&"2".to_string()));
        assert!(!found.contains_key("d"));

        let stats = cache.statistics();
        assert_eq!(stats.local_hits, 3);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_keys_on_same_shard_share_a_peer() {
        let cache = create_test_cache(create_test_nodes(3), Arc::new(InMemoryRemote::new()));

        let first = "key-0".to_string();
        let target = shard_for_key(&first, 3);
        let second = (1..1000)
            .map(|i| format!("key-{}", i))
            .find(|k| shard_for_key(k, 3) == target)
            .unwrap();

        assert_eq!(cache.node_for_key(&first), cache.node_for_key(&second));
    }

    #[tokio::test]
    async fn test_node_removal_reroutes() {
        let cache = create_test_cache(create_test_nodes(3), Arc::new(InMemoryRemote::new()));

        assert!(cache.remove_node("cache-1", 7001));
        assert!(!cache.remove_node("cache-1", 7001));
        assert_eq!(cache.node_count(), 2);

        let nodes = cache.nodes();
        for i in 0..50 {
            let key = format!("key-{}", i);
            let expected = &nodes[shard_for_key(&key, 2).unwrap()];
            let routed = cache.node_for_key(&key).unwrap();
            assert_eq!(&routed, expected);
            assert_ne!(routed.address, "cache-1");
        }
    }

    #[tokio::test]
    async fn test_add_node() {
        let cache = create_test_cache(vec![], Arc::new(InMemoryRemote::new()));

        assert!(cache.add_node(CacheNode::new("cache-a", 7000)));
        assert!(!cache.add_node(CacheNode::new("cache-a", 7000)));
        assert_eq!(cache.node_count(), 1);
        assert_eq!(cache.node_for_key("anything").unwrap().address, "cache-a");
    }

    #[tokio::test]
    async fn test_health_check_marks_nodes() {
        let remote = Arc::new(InMemoryRemote::new());
        let nodes = create_test_nodes(3);
        let cache = create_test_cache(nodes.clone(), remote.clone());

        remote.set_reachable(&nodes[1], false);
        assert_eq!(cache.health_check().await, 2);

        let active = cache.active_nodes();
        assert_eq!(active.len(), 2);
        assert!(active.iter().all(|n| n.last_ping.is_some()));
        assert!(!active.iter().any(|n| n.matches("cache-1", 7001)));

        // Unavailable peers still own their shard
        assert_eq!(cache.node_count(), 3);

        remote.set_reachable(&nodes[1], true);
        assert_eq!(cache.health_check().await, 3);
    }

    #[tokio::test]
    async fn test_remote_write_back_keeps_newer_local_value() {
        let nodes = create_test_nodes(1);
        let remote = Arc::new(PausingRemote::default());
        remote.inner.store(&nodes[0], "k", "old", None).await.unwrap();
        let cache = Arc::new(ShardedCache::new(capacity(10), nodes.clone(), remote.clone()));

        let reader = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get("k").await })
        };

        // The reader has missed locally and read "old" from the peer
        remote.fetched.notified().await;
        assert!(cache.put("k", "new", None).await);
        remote.resume.notify_one();

        assert_eq!(reader.await.unwrap(), Some("old".to_string()));
        assert_eq!(cache.local().get("k"), Some("new".to_string()));
        assert_eq!(
            remote.inner.fetch(&nodes[0], "k").await.unwrap(),
            Some("new".to_string())
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_operations_with_membership_changes() {
        let cache = Arc::new(create_test_cache(
            create_test_nodes(3),
            Arc::new(InMemoryRemote::new()),
        ));
        let mut tasks = JoinSet::new();

        for t in 0..8 {
            let cache = Arc::clone(&cache);
            tasks.spawn(async move {
                for i in 0..100 {
                    let key = format!("key-{}-{}", t, i % 20);
                    cache.put(&key, "v", None).await;
                    cache.get(&key).await;
                    cache.get(&format!("absent-{}-{}", t, i)).await;

                    // Routed peers are always whole, known descriptors
                    let node = cache.node_for_key(&key).unwrap();
                    assert!((7000..7003).contains(&node.port));
                    assert_eq!(node.address, format!("cache-{}", node.port - 7000));
                }
            });
        }

        {
            let cache = Arc::clone(&cache);
            tasks.spawn(async move {
                for _ in 0..20 {
                    cache.remove_node("cache-1", 7001);
                    tokio::task::yield_now().await;
                    cache.add_node(CacheNode::new("cache-1", 7001));
                    tokio::task::yield_now().await;
                }
                cache.remove_node("cache-1", 7001);
            });
        }

        while let Some(result) = tasks.join_next().await {
            result.unwrap();
        }

        let stats = cache.statistics();
        assert_eq!(stats.lookups(), 8 * 100 * 2);
        assert_eq!(stats.network_errors, 0);

        assert_eq!(cache.node_count(), 2);
        for i in 0..100 {
            let node = cache.node_for_key(&format!("key-{}", i)).unwrap();
            assert_ne!(node.port, 7001);
        }
    }
}
