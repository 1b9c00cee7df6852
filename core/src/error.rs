/// Error types for the synchronizer
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Pagination error: {0}")]
    Pagination(String),

    #[error("Send error: {0}")]
    Send(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
