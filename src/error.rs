use std::net::SocketAddr;
use thiserror::Error;

/// Failure to decode a wire frame. Always recovered locally: the receive
/// loops log and drop the offending datagram.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed frame header")]
    MalformedHeader,

    #[error("truncated frame: declared {declared} bytes, have {available}")]
    Truncated { declared: usize, available: usize },
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("protocol error: {0}")]
    Decode(#[from] DecodeError),

    #[error("participant not found: {0}")]
    NotFound(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("transfer aborted: {0}")]
    TransferAborted(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Encode(#[from] bincode::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ChatError>;
