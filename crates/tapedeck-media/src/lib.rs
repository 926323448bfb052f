//! Tapedeck-Media: segment indices and fragmented MP4 handling
//!
//! This crate provides the container-level pieces of the playback core.
//! It knows nothing about networking or scheduling; it only answers
//! questions about bytes.
//!
//! # Modules
//!
//! - `segment_index` - Per-rendition JSON index mapping frames to byte ranges
//! - `fmp4` - ISO BMFF box model, streaming demuxer, and fragment writer
//!
//! # Architecture
//!
//! Remote media is stored as one fragmented MP4 per rendition:
//!
//! 1. `ftyp` + `moov` describe the single video track
//! 2. Each `moof` + `mdat` pair carries a run of samples, starting on a
//!    sync sample when the index marks it `is_sync`
//! 3. A sidecar JSON index records the byte offset, size and frame span of
//!    every top-level box
//!
//! The index lets a downloader fetch exactly the byte range holding a
//! frame, and the demuxer turns whatever bytes arrive back into samples.

pub mod error;
pub mod fmp4;
pub mod segment_index;

pub use error::{Error, Result};
pub use fmp4::{Demuxer, DemuxEvent, Sample, TrackConfig};
pub use segment_index::{
    BoxType, ByteSpan, KeyframeMatch, SegmentBlock, SegmentDescriptor, SegmentIndex, SegmentMatch,
};
