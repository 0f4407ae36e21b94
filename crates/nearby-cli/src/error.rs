//! Error handling for the nearby CLI

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Nearby error: {0}")]
    Nearby(#[from] nearby_core::NearbyError),

    #[error("Session failed: {0}")]
    Session(#[from] nearby_core::SessionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Peer session failed: {0}")]
    PeerFailed(String),

    #[error("Invalid peer address: {0}")]
    InvalidPeer(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("TOML encoding error: {0}")]
    TomlEncoding(#[from] toml::ser::Error),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::Config(err.to_string())
    }
}
