//! Reservoir Remote Cache Boundary
//!
//! This crate provides the peer descriptor and the network seam the sharded
//! cache talks through, plus an in-memory implementation of that seam.

pub mod error;
pub mod memory;
pub mod node;
pub mod store;

pub use error::RemoteError;
pub use memory::InMemoryRemote;
pub use node::CacheNode;
pub use store::RemoteStore;
