//! Remote cache error types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Peer unreachable: {0}")]
    Unreachable(String),

    #[error("Peer rejected request: {0}")]
    Rejected(String),
}
