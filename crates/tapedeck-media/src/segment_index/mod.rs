//! Segment index for one encoded rendition.
//!
//! A segment index records every top-level box of a remote fragmented MP4
//! together with the frames each `moof` covers. It answers two questions for
//! the downloader: which bytes hold frame `N`, and where does the GOP that
//! contains frame `N` begin.

mod parse;

use serde::{Deserialize, Serialize};
use tapedeck_common::Direction;

/// Frames from a segment's trailing edge that count as "near the boundary".
pub const NEAR_BOUNDARY_FRAMES: u64 = 5;

/// First index format version carrying per-fragment frame spans.
pub const MIN_RANDOM_SEEK_VERSION: u32 = 2;

/// Top-level box kind recorded in the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoxType {
    Ftyp,
    Moov,
    Moof,
    Mdat,
}

impl BoxType {
    /// Parse a four-character box name as it appears in the index.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ftyp" => Some(Self::Ftyp),
            "moov" => Some(Self::Moov),
            "moof" => Some(Self::Moof),
            "mdat" => Some(Self::Mdat),
            _ => None,
        }
    }

    /// Whether this box belongs to the initialization segment.
    pub fn is_init(&self) -> bool {
        matches!(self, Self::Ftyp | Self::Moov)
    }
}

/// One box of a remote fragmented MP4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentDescriptor {
    /// Offset of the box header in the remote file.
    pub byte_offset: u64,
    /// Box size including header.
    pub byte_size: u64,
    /// Box kind.
    pub box_type: BoxType,
    /// First frame carried by this fragment (`moof` only).
    pub frame_start: u64,
    /// Number of frames carried by this fragment (`moof` only).
    pub frame_samples: u32,
    /// Whether the fragment starts on a sync sample.
    pub is_sync: bool,
}

impl SegmentDescriptor {
    /// Offset one past the last byte of the box.
    pub fn byte_end(&self) -> u64 {
        self.byte_offset + self.byte_size
    }

    /// Frame one past the last frame of the fragment.
    pub fn frame_end(&self) -> u64 {
        self.frame_start + self.frame_samples as u64
    }

    /// Whether the fragment's frame span contains `frame`.
    pub fn contains_frame(&self, frame: u64) -> bool {
        frame >= self.frame_start && frame < self.frame_end()
    }
}

/// Half-open byte span `[start, end)` in the remote file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteSpan {
    pub start: u64,
    pub end: u64,
}

impl ByteSpan {
    /// Create a span; `end` is exclusive.
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Number of bytes covered.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// Whether the span covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// HTTP `Range` header value (inclusive end).
    pub fn range_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end.saturating_sub(1))
    }
}

/// Result of [`SegmentIndex::find_segment_for_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentMatch {
    /// Index of the `moof` whose frame span contains the query.
    pub match_index: usize,
    /// Query is within [`NEAR_BOUNDARY_FRAMES`] of the trailing edge.
    pub near_boundary: bool,
    /// Index of the sync `moof` that opens the GOP holding the match.
    pub last_sync_index: usize,
    /// Last frame carried by the matched fragment.
    pub last_frame: u64,
}

/// Result of [`SegmentIndex::closest_preceding_keyframe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyframeMatch {
    /// Index of the sync `moof` at or before the query.
    pub this_segment: usize,
    /// Index of the following sync `moof`, if any.
    pub next_segment: Option<usize>,
    /// The query is within [`NEAR_BOUNDARY_FRAMES`] of the next keyframe.
    pub near_boundary: bool,
    /// Frame number of the keyframe itself.
    pub keyframe: u64,
}

/// A contiguous run of segments fetched with one ranged request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentBlock {
    /// First segment index in the block.
    pub first: usize,
    /// One past the last segment index.
    pub end: usize,
    /// Bytes covered by the block.
    pub span: ByteSpan,
    /// Frames carried by the block's fragments, `[start, end)`.
    pub frames: Option<(u64, u64)>,
}

impl SegmentBlock {
    /// Number of segments in the block.
    pub fn segment_count(&self) -> usize {
        self.end - self.first
    }
}

/// Parsed segment index for one rendition.
#[derive(Debug, Clone)]
pub struct SegmentIndex {
    segments: Vec<SegmentDescriptor>,
    /// Indices into `segments` of every `moof`, in file order.
    moofs: Vec<usize>,
    timescale: u32,
    start_bias: f64,
    format_version: u32,
}

impl SegmentIndex {
    /// Parse an index from JSON bytes.
    pub fn from_slice(json: &[u8]) -> crate::Result<Self> {
        parse::parse_index(json)
    }

    /// Build an index from already-validated parts.
    pub(crate) fn from_parts(
        segments: Vec<SegmentDescriptor>,
        timescale: u32,
        start_bias: f64,
        format_version: u32,
    ) -> Self {
        let moofs = segments
            .iter()
            .enumerate()
            .filter(|(_, s)| s.box_type == BoxType::Moof)
            .map(|(i, _)| i)
            .collect();
        Self {
            segments,
            moofs,
            timescale,
            start_bias,
            format_version,
        }
    }

    /// All segments in file order.
    pub fn segments(&self) -> &[SegmentDescriptor] {
        &self.segments
    }

    /// Get a segment by index.
    pub fn get(&self, index: usize) -> Option<&SegmentDescriptor> {
        self.segments.get(index)
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether the index is empty (never true for a parsed index).
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Media timescale.
    pub fn timescale(&self) -> u32 {
        self.timescale
    }

    /// Presentation time of frame zero, in seconds.
    pub fn start_bias(&self) -> f64 {
        self.start_bias
    }

    /// Index format version.
    pub fn format_version(&self) -> u32 {
        self.format_version
    }

    /// Older index formats carry no frame spans and cannot seek.
    pub fn supports_random_seek(&self) -> bool {
        self.format_version >= MIN_RANDOM_SEEK_VERSION
    }

    /// Size of the remote file as described by the index.
    pub fn total_bytes(&self) -> u64 {
        self.segments.last().map(|s| s.byte_end()).unwrap_or(0)
    }

    /// Number of frames covered by all fragments.
    pub fn frame_count(&self) -> u64 {
        self.moofs
            .iter()
            .map(|&i| self.segments[i].frame_end())
            .max()
            .unwrap_or(0)
    }

    /// Number of `moof` fragments.
    pub fn fragment_count(&self) -> usize {
        self.moofs.len()
    }

    /// Byte span of the leading `ftyp`/`moov` boxes.
    pub fn init_range(&self) -> Option<ByteSpan> {
        let header_end = self
            .segments
            .iter()
            .take_while(|s| s.box_type.is_init())
            .last()?
            .byte_end();
        Some(ByteSpan::new(self.segments[0].byte_offset, header_end))
    }

    /// Index of the first segment after the initialization boxes.
    pub fn first_media_segment(&self) -> usize {
        self.segments
            .iter()
            .position(|s| !s.box_type.is_init())
            .unwrap_or(self.segments.len())
    }

    /// Presentation time of `frame` at `fps`.
    pub fn time_for_frame(&self, frame: u64, fps: f64) -> f64 {
        if fps <= 0.0 {
            return self.start_bias;
        }
        self.start_bias + frame as f64 / fps
    }

    /// Frame displayed at `time`, rounding down so the frame's own timestamp
    /// never exceeds `time`.
    pub fn frame_for_time(&self, time: f64, fps: f64) -> u64 {
        if fps <= 0.0 || !time.is_finite() {
            return 0;
        }
        let mut frame = ((time - self.start_bias).max(0.0) * fps).floor() as u64;
        while frame > 0 && self.time_for_frame(frame, fps) > time {
            frame -= 1;
        }
        frame
    }

    /// Locate the fragment holding `frame`.
    ///
    /// Returns `None` when the index format predates random seek or when no
    /// fragment carries the frame.
    pub fn find_segment_for_frame(&self, frame: u64, direction: Direction) -> Option<SegmentMatch> {
        if !self.supports_random_seek() {
            return None;
        }

        let upper = self
            .moofs
            .partition_point(|&i| self.segments[i].frame_start <= frame);
        let pos = self.moofs[..upper]
            .iter()
            .rposition(|&i| self.segments[i].contains_frame(frame))?;
        let match_index = self.moofs[pos];
        let seg = &self.segments[match_index];

        let remaining = match direction {
            Direction::Backward => frame - seg.frame_start + 1,
            Direction::Forward | Direction::Stopped => seg.frame_end() - frame,
        };

        let last_sync_index = self.moofs[..=pos]
            .iter()
            .rev()
            .copied()
            .find(|&i| self.segments[i].is_sync)
            .unwrap_or(self.moofs[0]);

        Some(SegmentMatch {
            match_index,
            near_boundary: remaining <= NEAR_BOUNDARY_FRAMES,
            last_sync_index,
            last_frame: seg.frame_end() - 1,
        })
    }

    /// Find the last keyframe at or before `frame`.
    ///
    /// The returned keyframe is never later than the query.
    pub fn closest_preceding_keyframe(&self, frame: u64) -> Option<KeyframeMatch> {
        let upper = self
            .moofs
            .partition_point(|&i| self.segments[i].frame_start <= frame);
        let pos = self.moofs[..upper]
            .iter()
            .rposition(|&i| self.segments[i].is_sync)?;
        let this_segment = self.moofs[pos];
        let next_segment = self.moofs[pos + 1..]
            .iter()
            .copied()
            .find(|&i| self.segments[i].is_sync);

        let near_boundary = next_segment
            .map(|i| self.segments[i].frame_start.saturating_sub(frame) <= NEAR_BOUNDARY_FRAMES)
            .unwrap_or(false);

        Some(KeyframeMatch {
            this_segment,
            next_segment,
            near_boundary,
            keyframe: self.segments[this_segment].frame_start,
        })
    }

    /// Time-based form of [`closest_preceding_keyframe`](Self::closest_preceding_keyframe).
    pub fn closest_preceding_keyframe_at(&self, time: f64, fps: f64) -> Option<KeyframeMatch> {
        self.closest_preceding_keyframe(self.frame_for_time(time, fps))
    }

    /// Index of the sync `moof` strictly before segment `before`.
    pub fn previous_sync_fragment(&self, before: usize) -> Option<usize> {
        self.moofs
            .iter()
            .rev()
            .copied()
            .find(|&i| i < before && self.segments[i].is_sync)
    }

    /// Byte span to fetch for a seek: the whole GOP up to and including the
    /// matched fragment, plus the next fragment when near its boundary.
    pub fn seek_range(&self, m: &SegmentMatch) -> ByteSpan {
        let mut last = (m.match_index + 1).min(self.segments.len() - 1);
        if m.near_boundary {
            last = (last + 2).min(self.segments.len() - 1);
        }
        let start = self.segments[m.last_sync_index].byte_offset;
        ByteSpan::new(start, self.segments[last].byte_end())
    }

    /// Describe segments `[first, end)` as a block.
    pub fn block(&self, first: usize, end: usize) -> Option<SegmentBlock> {
        if first >= end || end > self.segments.len() {
            return None;
        }
        let span = ByteSpan::new(
            self.segments[first].byte_offset,
            self.segments[end - 1].byte_end(),
        );
        let frames = self.segments[first..end]
            .iter()
            .filter(|s| s.box_type == BoxType::Moof && s.frame_samples > 0)
            .fold(None, |acc: Option<(u64, u64)>, s| match acc {
                None => Some((s.frame_start, s.frame_end())),
                Some((a, b)) => Some((a.min(s.frame_start), b.max(s.frame_end()))),
            });
        Some(SegmentBlock {
            first,
            end,
            span,
            frames,
        })
    }

    /// Next sequential block starting at segment `from`, sized by `budget`.
    ///
    /// Segments are accumulated until the block reaches the budget. A block
    /// always holds at least one segment and never ends between a `moof` and
    /// its `mdat`.
    pub fn next_block(&self, from: usize, budget: u64) -> Option<SegmentBlock> {
        if from >= self.segments.len() {
            return None;
        }
        let mut end = from;
        let mut size = 0u64;
        while end < self.segments.len() {
            let seg = &self.segments[end];
            size += seg.byte_size;
            end += 1;
            if seg.box_type == BoxType::Moof
                && end < self.segments.len()
                && self.segments[end].box_type == BoxType::Mdat
            {
                size += self.segments[end].byte_size;
                end += 1;
            }
            if size >= budget {
                break;
            }
        }
        self.block(from, end)
    }
}
