//! Cache peer descriptor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A remote cache peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheNode {
    pub address: String,
    pub port: u16,
    /// Whether the last health check reached this peer
    #[serde(default = "default_available")]
    pub available: bool,
    /// Time of the last successful health check
    #[serde(default)]
    pub last_ping: Option<DateTime<Utc>>,
}

fn default_available() -> bool {
    true
}

impl CacheNode {
    /// Create a peer descriptor, assumed available until a check says otherwise
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            available: true,
            last_ping: None,
        }
    }

    /// `address:port` form used as the peer's key
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn matches(&self, address: &str, port: u16) -> bool {
        self.address == address && self.port == port
    }
}

impl fmt::Display for CacheNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}
