use crate::events::ErrorCode;

/// Errors produced while fetching media bytes or indices.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("HTTP {status} for {url}")]
    Http { status: u16, url: String },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: u64, got: u64 },

    #[error("Segment index error: {0}")]
    Index(#[from] tapedeck_media::Error),

    #[error("Download cancelled")]
    Cancelled,

    #[error("Download worker is gone")]
    WorkerGone,
}

impl DownloadError {
    /// Transient failures worth another attempt: transport errors,
    /// timeouts, 5xx and 429.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Transport(_) => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    pub fn is_malformed_index(&self) -> bool {
        matches!(self, Self::Index(tapedeck_media::Error::MalformedIndex(_)))
    }

    /// Classification reported in [`PlayerEvent::Error`](crate::events::PlayerEvent).
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Http { .. } => ErrorCode::HttpStatus,
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::Transport(_) | Self::ShortRead { .. } => ErrorCode::Network,
            Self::Index(_) => ErrorCode::MalformedIndex,
            Self::Cancelled | Self::WorkerGone => ErrorCode::Internal,
        }
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if let Some(status) = e.status() {
            Self::Http {
                status: status.as_u16(),
                url: e.url().map(|u| u.to_string()).unwrap_or_default(),
            }
        } else {
            Self::Transport(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        let http = |status| DownloadError::Http {
            status,
            url: "http://x".into(),
        };
        assert!(http(503).is_retryable());
        assert!(http(429).is_retryable());
        assert!(!http(404).is_retryable());
        assert!(!http(416).is_retryable());
        assert!(DownloadError::Timeout("slow".into()).is_retryable());
        assert!(!DownloadError::Cancelled.is_retryable());
    }

    #[test]
    fn test_codes() {
        let malformed = DownloadError::from(tapedeck_media::Error::malformed("empty"));
        assert!(malformed.is_malformed_index());
        assert_eq!(malformed.code(), ErrorCode::MalformedIndex);
        assert_eq!(
            DownloadError::ShortRead {
                expected: 10,
                got: 2
            }
            .code(),
            ErrorCode::Network
        );
    }
}
