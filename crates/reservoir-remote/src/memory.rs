//! In-memory remote store
//!
//! Keeps one map per peer endpoint inside the process. Peers can be marked
//! unreachable to exercise the network-failure paths of callers.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::RemoteError;
use crate::node::CacheNode;
use crate::store::RemoteStore;

struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Remote store simulated with in-process maps
#[derive(Default)]
pub struct InMemoryRemote {
    peers: RwLock<HashMap<String, HashMap<String, StoredValue>>>,
    unreachable: RwLock<HashSet<String>>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a peer going down or coming back
    pub fn set_reachable(&self, node: &CacheNode, reachable: bool) {
        let endpoint = node.endpoint();
        let mut unreachable = self.unreachable.write();
        if reachable {
            unreachable.remove(&endpoint);
        } else {
            unreachable.insert(endpoint);
        }
    }

    /// Number of live keys held for a peer
    pub fn len_for(&self, node: &CacheNode) -> usize {
        self.peers
            .read()
            .get(&node.endpoint())
            .map(|values| values.values().filter(|v| !v.is_expired()).count())
            .unwrap_or(0)
    }

    fn check_reachable(&self, node: &CacheNode) -> Result<String, RemoteError> {
        let endpoint = node.endpoint();
        if self.unreachable.read().contains(&endpoint) {
            return Err(RemoteError::Unreachable(endpoint));
        }
        Ok(endpoint)
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn store(
        &self,
        node: &CacheNode,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), RemoteError> {
        let endpoint = self.check_reachable(node)?;
        debug!("Storing {} on {}", key, endpoint);

        let expires_at = ttl.and_then(|ttl| Instant::now().checked_add(ttl));
        self.peers.write().entry(endpoint).or_default().insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn fetch(&self, node: &CacheNode, key: &str) -> Result<Option<String>, RemoteError> {
        let endpoint = self.check_reachable(node)?;

        let mut peers = self.peers.write();
        let Some(values) = peers.get_mut(&endpoint) else {
            return Ok(None);
        };

        let expired = match values.get(key) {
            Some(stored) => stored.is_expired(),
            None => return Ok(None),
        };
        if expired {
            values.remove(key);
            return Ok(None);
        }

        Ok(values.get(key).map(|stored| stored.value.clone()))
    }

    async fn delete(&self, node: &CacheNode, key: &str) -> Result<bool, RemoteError> {
        let endpoint = self.check_reachable(node)?;
        Ok(self
            .peers
            .write()
            .get_mut(&endpoint)
            .and_then(|values| values.remove(key))
            .is_some_and(|stored| !stored.is_expired()))
    }

    async fn ping(&self, node: &CacheNode) -> Result<bool, RemoteError> {
        self.check_reachable(node)?;
        Ok(true)
    }
}
