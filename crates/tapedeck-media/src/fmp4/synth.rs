//! Synthetic fragmented MP4 media with a matching segment index.
//!
//! Every sample payload starts with its frame number as a big-endian `u64`,
//! so consumers can check which frame a decoded sample carries without a
//! real codec.

use super::init::InitSegment;
use super::moof::{FragmentBuilder, FragmentSample};
use crate::segment_index::SegmentIndex;
use bytes::{BufMut, Bytes, BytesMut};
use serde_json::json;

/// `avcC` record for High profile, level 3.1, with no parameter sets.
const SYNTHETIC_AVCC: [u8; 7] = [1, 0x64, 0x00, 0x1f, 0xff, 0xe0, 0x00];

const TIMESCALE: u32 = 90000;

/// Builder for synthetic media.
#[derive(Debug, Clone)]
pub struct SyntheticVideo {
    fps: f64,
    frames: u64,
    gop_len: u64,
    frag_len: u64,
    width: u16,
    height: u16,
    frame_bytes: usize,
    start_bias: f64,
    format_version: u32,
}

/// Generated media file and its index.
#[derive(Debug, Clone)]
pub struct SyntheticMedia {
    pub bytes: Bytes,
    pub index_json: String,
    pub index: SegmentIndex,
    pub fps: f64,
}

impl SyntheticVideo {
    pub fn new(fps: f64, frames: u64) -> Self {
        Self {
            fps,
            frames,
            gop_len: 30,
            frag_len: 30,
            width: 640,
            height: 360,
            frame_bytes: 64,
            start_bias: 0.0,
            format_version: 2,
        }
    }

    /// Frames between sync samples.
    pub fn gop_len(mut self, n: u64) -> Self {
        self.gop_len = n.max(1);
        self
    }

    /// Frames per fragment; fragments never straddle a GOP.
    pub fn frag_len(mut self, n: u64) -> Self {
        self.frag_len = n.max(1);
        self
    }

    pub fn dimensions(mut self, width: u16, height: u16) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Payload size of each sample (at least 8 bytes).
    pub fn frame_bytes(mut self, n: usize) -> Self {
        self.frame_bytes = n.max(8);
        self
    }

    pub fn start_bias(mut self, bias: f64) -> Self {
        self.start_bias = bias;
        self
    }

    /// Index format version written to the JSON.
    pub fn format_version(mut self, v: u32) -> Self {
        self.format_version = v;
        self
    }

    /// Read back the frame number written into a sample payload.
    pub fn frame_number(data: &[u8]) -> Option<u64> {
        let head: [u8; 8] = data.get(..8)?.try_into().ok()?;
        Some(u64::from_be_bytes(head))
    }

    fn payload(&self, frame: u64) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.frame_bytes);
        buf.put_u64(frame);
        buf.resize(self.frame_bytes, (frame % 251) as u8);
        buf.freeze()
    }

    pub fn build(&self) -> crate::Result<SyntheticMedia> {
        let sample_duration = (TIMESCALE as f64 / self.fps).round().max(1.0) as u32;
        let init = InitSegment::builder()
            .timescale(TIMESCALE)
            .duration(self.frames * sample_duration as u64)
            .dimensions(self.width, self.height)
            .avc_config(SYNTHETIC_AVCC.to_vec())
            .default_sample_duration(sample_duration)
            .build();

        let mut out = BytesMut::from(&init.data[..]);
        let mut segments = vec![
            json!({"name": "ftyp", "offset": 0, "size": init.ftyp_len}),
            json!({"name": "moov", "offset": init.ftyp_len, "size": init.moov_len()}),
        ];

        let mut frame = 0u64;
        let mut sequence = 1u32;
        while frame < self.frames {
            let gop_end = ((frame / self.gop_len) + 1) * self.gop_len;
            let end = (frame + self.frag_len).min(gop_end).min(self.frames);
            let samples: Vec<FragmentSample> = (frame..end)
                .map(|f| FragmentSample {
                    duration: sample_duration,
                    cts_offset: 0,
                    is_sync: f % self.gop_len == 0,
                    data: self.payload(f),
                })
                .collect();
            let frag = FragmentBuilder::new(sequence, 1)
                .base_media_decode_time(frame * sample_duration as u64)
                .build(&samples);

            let offset = out.len();
            segments.push(json!({
                "name": "moof",
                "offset": offset,
                "size": frag.moof_len,
                "frame_start": frame,
                "frame_samples": end - frame,
                "is_sync": frame % self.gop_len == 0,
            }));
            segments.push(json!({
                "name": "mdat",
                "offset": offset + frag.moof_len,
                "size": frag.mdat_len(),
            }));
            out.extend_from_slice(&frag.bytes);

            frame = end;
            sequence += 1;
        }

        let index_json = json!({
            "file": {
                "version": self.format_version,
                "start": self.start_bias,
                "timescale": TIMESCALE,
            },
            "segments": segments,
        })
        .to_string();

        let index = SegmentIndex::from_slice(index_json.as_bytes())?;

        Ok(SyntheticMedia {
            bytes: out.freeze(),
            index_json,
            index,
            fps: self.fps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment_index::BoxType;

    #[test]
    fn test_index_matches_bytes() {
        let media = SyntheticVideo::new(30.0, 100).gop_len(30).frag_len(10).build().unwrap();
        assert_eq!(media.index.total_bytes(), media.bytes.len() as u64);
        assert_eq!(media.index.frame_count(), 100);
        for seg in media.index.segments() {
            let start = seg.byte_offset as usize;
            let name = &media.bytes[start + 4..start + 8];
            let expected: &[u8] = match seg.box_type {
                BoxType::Ftyp => b"ftyp",
                BoxType::Moov => b"moov",
                BoxType::Moof => b"moof",
                BoxType::Mdat => b"mdat",
            };
            assert_eq!(name, expected);
        }
    }

    #[test]
    fn test_fragments_respect_gops() {
        let media = SyntheticVideo::new(25.0, 60).gop_len(25).frag_len(10).build().unwrap();
        let starts: Vec<(u64, bool)> = media
            .index
            .segments()
            .iter()
            .filter(|s| s.box_type == BoxType::Moof)
            .map(|s| (s.frame_start, s.is_sync))
            .collect();
        assert_eq!(
            starts,
            vec![
                (0, true),
                (10, false),
                (20, false),
                (25, true),
                (35, false),
                (45, false),
                (50, true)
            ]
        );
    }

    #[test]
    fn test_frame_number_roundtrip() {
        let v = SyntheticVideo::new(30.0, 1).frame_bytes(16);
        assert_eq!(SyntheticVideo::frame_number(&v.payload(1234)), Some(1234));
        assert_eq!(SyntheticVideo::frame_number(&[1, 2]), None);
    }
}
