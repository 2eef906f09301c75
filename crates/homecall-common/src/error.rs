use std::net::SocketAddr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HomecallError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("failed to bind metrics listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("delivery failed: {0}")]
    Delivery(String),
    #[error("failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("collaborator unavailable: {0}")]
    Collaborator(String),
    #[error("{0} has been shut down")]
    Stopped(&'static str),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HomecallError>;
