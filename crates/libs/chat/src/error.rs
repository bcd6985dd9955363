use crate::registry::ConnKey;
use crate::transport::ConnectionId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("{field} is {len} bytes, which exceeds the {max} byte capacity")]
    PayloadTooLarge {
        field: &'static str,
        len: usize,
        max: usize,
    },
    #[error("Malformed packet: {0}")]
    MalformedPacket(String),
    #[error("Invalid name: {0}")]
    InvalidName(String),
    #[error("Transport unavailable at {addr}: {source}")]
    TransportUnavailable {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Network I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Not connected to a server")]
    NotConnected,
    #[error("No live connection with id {0}")]
    UnknownConnection(ConnectionId),
    #[error("{0} is not a live connection")]
    UnknownKey(ConnKey),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<toml::de::Error> for ChatError {
    fn from(e: toml::de::Error) -> Self {
        ChatError::Config(e.to_string())
    }
}
