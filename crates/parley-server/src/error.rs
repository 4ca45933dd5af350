use thiserror::Error;

use crate::connection::ConnectionId;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Connection {0} is closed")]
    ConnectionClosed(ConnectionId),

    #[error("Connection {0} stopped reading, outbound backlog is full")]
    Backlogged(ConnectionId),

    #[error("Dispatch queue is closed")]
    DispatchClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}
