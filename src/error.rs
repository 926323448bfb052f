//! Error type for the playback core.

use crate::codec::DecodeError;
use crate::download::DownloadError;

/// Result type for tapedeck operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for tapedeck operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Common(#[from] tapedeck_common::Error),

    #[error(transparent)]
    Media(#[from] tapedeck_media::Error),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The media descriptor cannot be played.
    #[error("Invalid media descriptor: {0}")]
    InvalidDescriptor(String),
}

impl Error {
    /// Operation not allowed in the current playback state.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::Common(tapedeck_common::Error::invalid_state(msg))
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::Common(tapedeck_common::Error::invalid_input(msg))
    }

    /// Whether the session that produced this error can no longer play.
    pub fn is_fatal_to_session(&self) -> bool {
        match self {
            Self::Media(tapedeck_media::Error::MalformedIndex(_)) => true,
            Self::Download(e) => e.is_malformed_index(),
            Self::InvalidDescriptor(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_index_is_fatal() {
        let err = Error::from(tapedeck_media::Error::malformed("no segments"));
        assert!(err.is_fatal_to_session());
        assert!(!Error::invalid_state("playing").is_fatal_to_session());
    }

    #[test]
    fn test_display_is_transparent() {
        let err = Error::invalid_state("seek while playing");
        assert_eq!(err.to_string(), "Invalid state: seek while playing");
    }
}
