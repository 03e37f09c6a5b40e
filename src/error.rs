//! Error types for the tunnel filter.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the tunnel filter.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Packet capture error
    #[error("Capture error: {0}")]
    Capture(String),
}

impl Error {
    /// Create a new configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new capture error.
    pub fn capture<S: Into<String>>(msg: S) -> Self {
        Self::Capture(msg.into())
    }
}
