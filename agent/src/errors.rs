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

    #[error("URL error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Server returned {status}: {body}")]
    ServerError { status: u16, body: String },

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Content store error: {0}")]
    StoreError(String),

    #[error("Init system error: {0}")]
    InitError(String),

    #[error("Notification channel error: {0}")]
    NotifyError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),
}

impl AgentError {
    /// Errors caused by the network or the local environment that are
    /// expected to clear up on their own
    pub fn is_transient(&self) -> bool {
        match self {
            AgentError::IoError(_) | AgentError::HttpError(_) => true,
            AgentError::ServerError { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}
