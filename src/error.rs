//! # Error Types
//!
//! Custom error types for MAV Bridge using `thiserror`.

use thiserror::Error;

/// Main error type for MAV Bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Transport errors (connect, read or write on the vehicle link)
    #[error("Link error: {0}")]
    Link(String),

    /// MAVLink encode/decode errors for a single frame
    #[error("MAVLink codec error: {0}")]
    Codec(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON errors (custom data cache)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for MAV Bridge
pub type Result<T> = std::result::Result<T, BridgeError>;
