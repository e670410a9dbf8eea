//! Error handling for the fusion engine.

use thiserror::Error;

/// Main error type for the fusion engine
#[derive(Debug, Error)]
pub enum Error {
    /// Signal validation errors (malformed or missing fields)
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Offline buffer errors
    #[error("Buffer error: {0}")]
    BufferError(String),

    /// Embedded storage errors
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Encryption / key-vault errors
    #[error("Crypto error: {0}")]
    CryptoError(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// TOML serialization/deserialization errors
    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    /// Sled database errors
    #[error("Database error: {0}")]
    DbError(#[from] sled::Error),

    /// Record encoding errors
    #[error("Encoding error: {0}")]
    EncodeError(#[from] bincode::Error),

    /// Other errors
    #[error("Error: {0}")]
    Other(String),
}

/// Result type for the fusion engine
pub type Result<T> = std::result::Result<T, Error>;

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Error::Other(err.to_string())
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Error::Other(err)
    }
}

// Allow automatic conversion from anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}
