//! Error types for the sync core

use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

/// Errors surfaced by collaborators and configuration loading.
///
/// None of these escape the sync state machine itself: failures reported by
/// storages and workers are logged and turned into policy decisions.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("network error: {0}")]
    Network(String),

    /// The fetch URI exceeded the server limit, usually because of too many filter values
    #[error("request uri too long")]
    UriTooLong,

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("component destroyed")]
    Destroyed,

    #[error("channel closed")]
    ChannelClosed,
}

impl SyncError {
    pub fn is_uri_too_long(&self) -> bool {
        matches!(self, SyncError::UriTooLong)
    }
}
