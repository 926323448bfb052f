/// Marker in decoder errors raised when the platform reclaimed an idle
/// decoder. Such decoders are recreated instead of reported.
pub const RECLAIMED_MARKER: &str = "reclaimed due to inactivity";

/// Errors from the decode pipeline.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Decoder is not configured")]
    NotConfigured,

    #[error("A key frame is required after configure or reset")]
    KeyFrameRequired,

    #[error("Unsupported decoder config: {0}")]
    Unsupported(String),

    #[error("Decoder error: {0}")]
    Decoder(String),

    #[error("Demux error: {0}")]
    Demux(#[from] tapedeck_media::Error),
}

impl DecodeError {
    /// Whether the decoder was reclaimed and can simply be recreated.
    pub fn is_reclaimed(&self) -> bool {
        matches!(self, Self::Decoder(msg) if msg.contains(RECLAIMED_MARKER))
    }
}
