//! Error types

use thiserror::Error;

/// Price feed errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FeedError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timeout waiting for data")]
    Timeout,

    #[error("HTTP status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Socket not connected")]
    NotConnected,

    #[error("Feed disconnected")]
    Disconnected,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl FeedError {
    /// Whether the failure concerns the connection to the source rather
    /// than a single symbol's data.
    pub fn is_transport(&self) -> bool {
        match self {
            FeedError::Transport(_)
            | FeedError::Timeout
            | FeedError::NotConnected
            | FeedError::Disconnected => true,
            FeedError::Http { status, .. } => *status >= 500,
            FeedError::InvalidMessage(_)
            | FeedError::InvalidPrice(_)
            | FeedError::InvalidConfig(_) => false,
        }
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::InvalidMessage(err.to_string())
    }
}

/// Result type alias
pub type FeedResult<T> = Result<T, FeedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert!(FeedError::Timeout.is_transport());
        assert!(FeedError::Transport("refused".into()).is_transport());
        assert!(FeedError::Http { status: 503, message: String::new() }.is_transport());
        assert!(!FeedError::Http { status: 404, message: String::new() }.is_transport());
        assert!(!FeedError::InvalidPrice("-1".into()).is_transport());
    }
}
