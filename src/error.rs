//! Error types for the savebot resilience core

use thiserror::Error;

/// Result type alias for savebot operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the crate itself (not by the wrapped provider calls)
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Resource key was empty
    #[error("invalid resource key: {0}")]
    InvalidResourceKey(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
