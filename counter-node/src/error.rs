use thiserror::Error;

/// Errors that can occur in the counter node library
#[derive(Error, Debug)]
pub enum CounterError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network I/O error
    #[error("Network I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Peer could not be reached (connect, timeout, protocol failure)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Peer answered with a non-success status
    #[error("Peer {url} responded with status {status}: {body}")]
    PeerStatus {
        url: String,
        status: u16,
        body: String,
    },

    /// Request body could not be parsed
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// Request parsed but carries unusable values
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type alias using CounterError
pub type Result<T> = std::result::Result<T, CounterError>;

impl CounterError {
    /// Whether the error was caused by the caller's input rather than by this node
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            CounterError::MalformedRequest(_) | CounterError::InvalidRequest(_)
        )
    }
}

impl From<serde_json::Error> for CounterError {
    fn from(err: serde_json::Error) -> Self {
        CounterError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for CounterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            CounterError::Serialization(err.to_string())
        } else {
            CounterError::Transport(err.to_string())
        }
    }
}

impl From<config::ConfigError> for CounterError {
    fn from(err: config::ConfigError) -> Self {
        CounterError::Config(err.to_string())
    }
}
