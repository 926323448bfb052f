//! Decode pipeline for the codec backend.
//!
//! Downloaded bytes are demuxed per lane onto tapes (one per container),
//! and samples are fed to a [`VideoDecoder`] starting at the keyframe that
//! precedes the cursor. While paused only a window of frames around the
//! cursor is submitted; in-flight work is bounded and the excess waits in a
//! FIFO until the decoder returns frames.

mod buffer;
mod decoder;
mod error;
mod tape;

pub use buffer::{CodecBuffer, CodecStats, Lane, SeekOutcome};
pub use decoder::{
    DecodedFrame, DecoderConfig, DecoderFactory, EncodedChunk, HeadlessDecoder, HeadlessFactory,
    VideoDecoder,
};
pub use error::{DecodeError, RECLAIMED_MARKER};
pub use tape::Tape;
