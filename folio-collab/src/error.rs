//! Error types for the collaboration client.
//!
//! Nothing here crosses the socket boundary: transport failures are
//! reported as [`SessionEvent`](crate::session::SessionEvent)s and send
//! failures as `false`. These types cover the codec, configuration
//! loading and token lookup.

use std::path::PathBuf;

/// Failure to encode or decode a wire frame.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Failed to serialize frame: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Malformed frame: {0}")]
    Deserialize(#[source] serde_json::Error),
}

/// Invalid or incomplete session configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Base URL must use ws:// or wss://, got '{0}'")]
    InvalidScheme(String),

    #[error("Template id must not be empty")]
    MissingTemplate,

    #[error("User id must not be empty")]
    MissingUser,

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue {
        field: &'static str,
        reason: String,
    },
}

/// Failure to read a persisted auth token.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Failed to read token file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Top-level error for constructing and tearing down a session.
#[derive(Debug, thiserror::Error)]
pub enum CollabError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session driver failed: {0}")]
    Driver(#[from] tokio::task::JoinError),
}
