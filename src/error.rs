//! Error handling for the chat server

use thiserror::Error;

/// Result type alias for chat operations
pub type Result<T> = std::result::Result<T, ChatError>;

/// Chat server error types
#[derive(Debug, Error)]
pub enum ChatError {
    /// Network-related errors (bind, accept, socket I/O)
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    /// Wire serialization/deserialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A record that decoded but cannot be processed
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Configuration errors (bad bind address, etc.)
    #[error("configuration error: {0}")]
    Config(String),
}
