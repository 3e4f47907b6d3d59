//! Unified error handling for the client.

use crate::config::ConfigError;
use crmsync_engine::RemoteError;

/// Client error type.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Engine error: {0}")]
    Engine(#[from] crmsync_engine::Error),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Usage: {0}")]
    Usage(String),
}

impl From<ClientError> for RemoteError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Remote(e) => e,
            ClientError::Auth(message) => RemoteError::Status { code: 401, message },
            ClientError::Http(e) => match e.status() {
                Some(status) => RemoteError::Status {
                    code: status.as_u16(),
                    message: e.to_string(),
                },
                None => RemoteError::Transport(e.to_string()),
            },
            other => RemoteError::Transport(other.to_string()),
        }
    }
}

/// Result type alias for the client.
pub type Result<T> = std::result::Result<T, ClientError>;
