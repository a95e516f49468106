//! Error types for habitcore.
//!
//! This module defines all error types used throughout the library.

use thiserror::Error;

/// Result type alias for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Main error type for sync operations
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Validation error in {field}: {message}")]
    Validation { field: String, message: String },

    /// Shared secret rejected by the signing proxy (HTTP 401).
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The signing proxy is up but missing its storage configuration.
    #[error("Server misconfigured: {0}")]
    ServerMisconfigured(String),

    #[error("Transport error: {0}")]
    Transport(String),

    /// Wrong passphrase, corrupt ciphertext, or authentication-tag mismatch.
    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Create a new validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new auth error
    pub fn auth(message: impl Into<String>) -> Self {
        SyncError::Auth(message.into())
    }

    /// Create a new transport error
    pub fn transport(message: impl Into<String>) -> Self {
        SyncError::Transport(message.into())
    }

    /// Create a new decryption error
    pub fn decryption(message: impl Into<String>) -> Self {
        SyncError::Decryption(message.into())
    }

    /// True for errors caused by a rejected shared secret
    pub fn is_auth(&self) -> bool {
        matches!(self, SyncError::Auth(_))
    }
}
