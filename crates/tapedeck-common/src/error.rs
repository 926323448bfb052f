//! Common error types used throughout tapedeck.
//!
//! This module provides a unified error type for failures shared by the
//! playback crates: invalid input, operations attempted in the wrong playback
//! state, capacity exhaustion, and I/O failures.

/// Common error type for tapedeck.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested item was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input was provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The operation is not allowed in the current playback state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A bounded resource has no room left.
    #[error("Capacity exhausted: {0}")]
    Exhausted(String),

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new NotFound error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new InvalidInput error.
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new InvalidState error.
    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create a new Exhausted error.
    pub fn exhausted<S: Into<String>>(msg: S) -> Self {
        Self::Exhausted(msg.into())
    }

    /// Create a new Internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
