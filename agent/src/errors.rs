//! Error types for the update agent

use thiserror::Error;

/// Main error type for the update agent
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Checksum mismatch for entry '{entry}'")]
    ChecksumMismatch { entry: String },

    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("Working buffer exceeded: {0}")]
    BufferOverflow(String),

    #[error("Install error: {0}")]
    InstallError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Internal(err.to_string())
    }
}
