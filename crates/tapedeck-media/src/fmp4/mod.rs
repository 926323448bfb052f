//! Fragmented MP4 (fMP4) handling.
//!
//! - `boxes`: box headers and a bounds-checked payload reader
//! - `demux`: streaming demuxer turning appended bytes into samples
//! - `init` / `moof`: writers for init segments and movie fragments
//! - `synth`: synthetic media with a matching segment index

pub mod boxes;
mod demux;
mod init;
mod moof;
pub mod synth;

pub use boxes::{BoxHeader, ByteReader, FourCc};
pub use demux::{codec_string, DemuxEvent, Demuxer, Sample, TrackConfig};
pub use init::{InitSegment, InitSegmentBuilder};
pub use moof::{EncodedFragment, FragmentBuilder, FragmentSample};
pub use synth::{SyntheticMedia, SyntheticVideo};
