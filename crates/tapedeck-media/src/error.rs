//! Error types for tapedeck-media.

use thiserror::Error;

/// Result type for tapedeck-media operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for tapedeck-media operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The segment index is unusable for this rendition.
    #[error("Malformed segment index: {0}")]
    MalformedIndex(String),

    /// Invalid MP4 box structure.
    #[error("Invalid MP4: {0}")]
    InvalidMp4(String),

    /// Missing required box in MP4 data.
    #[error("Missing required box: {0}")]
    MissingBox(&'static str),

    /// Unsupported feature or codec.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Buffer too small for operation.
    #[error("Buffer underflow: need {need} bytes, have {have}")]
    BufferUnderflow { need: usize, have: usize },

    /// Invalid segment index.
    #[error("Invalid segment index: {index} (max: {max})")]
    InvalidSegmentIndex { index: usize, max: usize },
}

impl Error {
    /// Create a malformed index error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedIndex(msg.into())
    }

    /// Create an invalid MP4 error.
    pub fn invalid_mp4(msg: impl Into<String>) -> Self {
        Self::InvalidMp4(msg.into())
    }

    /// Create an unsupported error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedIndex(format!("invalid JSON: {}", err))
    }
}
