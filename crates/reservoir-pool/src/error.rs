//! Pool error types

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Invalid pool configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Connection pool {identifier} timed out after {waited:?}")]
    Timeout { identifier: String, waited: Duration },

    #[error("Connection pool {0} is shutting down")]
    ShuttingDown(String),
}
