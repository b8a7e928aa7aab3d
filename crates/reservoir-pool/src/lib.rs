//! Reservoir Connection Pool
//!
//! This crate provides a bounded pool of reusable connection handles with
//! blocking acquisition, staleness detection and elastic sizing.

pub mod connection;
pub mod error;
pub mod pool;

pub use connection::{Connection, ConnectionId, ConnectionManager, SimulatedConnector};
pub use error::PoolError;
pub use pool::{PoolConfig, PoolStatus, ResourcePool};
