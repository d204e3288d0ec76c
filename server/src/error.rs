//! Error types for the relay server

use shared::{PlayerId, ProtocolError};
use std::net::SocketAddr;
use thiserror::Error;

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Error, Debug)]
pub enum RelayError {
    /// Datagram could not be decoded, or an outbound packet could not be encoded
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A non-connect packet arrived from an address with no player
    #[error("packet from unregistered address {0}")]
    UnknownSender(SocketAddr),

    #[error("no connection for player {0}")]
    UnknownPlayer(PlayerId),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to send to {addr}: {source}")]
    Send {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {message}")]
    Config { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    pub fn config(message: impl Into<String>) -> Self {
        RelayError::Config {
            message: message.into(),
        }
    }
}
