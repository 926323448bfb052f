//! JSON segment index parsing and validation.

use super::{BoxType, SegmentDescriptor, SegmentIndex};
use crate::{Error, Result};
use serde::Deserialize;

/// Timescale assumed when the index does not record one.
const DEFAULT_TIMESCALE: u32 = 1000;

#[derive(Debug, Deserialize)]
struct RawIndex {
    #[serde(default)]
    file: RawFile,
    #[serde(default)]
    segments: Vec<RawSegment>,
}

#[derive(Debug, Deserialize)]
struct RawFile {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    start: f64,
    #[serde(default)]
    timescale: Option<u32>,
}

impl Default for RawFile {
    fn default() -> Self {
        Self {
            version: default_version(),
            start: 0.0,
            timescale: None,
        }
    }
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct RawSegment {
    name: String,
    offset: u64,
    size: u64,
    #[serde(default)]
    frame_start: Option<u64>,
    #[serde(default)]
    frame_samples: Option<u32>,
    #[serde(default)]
    is_sync: Option<bool>,
}

pub(super) fn parse_index(json: &[u8]) -> Result<SegmentIndex> {
    let raw: RawIndex = serde_json::from_slice(json)?;

    if raw.segments.is_empty() {
        return Err(Error::malformed("index contains no segments"));
    }

    let mut segments = Vec::with_capacity(raw.segments.len());
    for (i, seg) in raw.segments.iter().enumerate() {
        let box_type = BoxType::from_name(&seg.name).ok_or_else(|| {
            Error::malformed(format!("segment {} has unknown box name '{}'", i, seg.name))
        })?;
        let is_moof = box_type == BoxType::Moof;
        segments.push(SegmentDescriptor {
            byte_offset: seg.offset,
            byte_size: seg.size,
            box_type,
            frame_start: if is_moof { seg.frame_start.unwrap_or(0) } else { 0 },
            frame_samples: if is_moof { seg.frame_samples.unwrap_or(0) } else { 0 },
            is_sync: is_moof && seg.is_sync.unwrap_or(false),
        });
    }

    for (i, pair) in segments.windows(2).enumerate() {
        if pair[1].byte_offset <= pair[0].byte_offset {
            return Err(Error::malformed(format!(
                "segment {} offset {} does not follow offset {}",
                i + 1,
                pair[1].byte_offset,
                pair[0].byte_offset
            )));
        }
    }

    let mut last_sync_start: Option<u64> = None;
    for seg in segments.iter().filter(|s| s.is_sync) {
        if let Some(prev) = last_sync_start {
            if seg.frame_start < prev {
                return Err(Error::malformed(format!(
                    "sync fragment at offset {} starts at frame {} before frame {}",
                    seg.byte_offset, seg.frame_start, prev
                )));
            }
        }
        last_sync_start = Some(seg.frame_start);
    }

    Ok(SegmentIndex::from_parts(
        segments,
        raw.file.timescale.unwrap_or(DEFAULT_TIMESCALE),
        raw.file.start,
        raw.file.version,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "file": {"version": 2, "start": 0.0},
        "segments": [
            {"name": "ftyp", "offset": 0, "size": 24},
            {"name": "moov", "offset": 24, "size": 700},
            {"name": "moof", "offset": 724, "size": 120, "frame_start": 0, "frame_samples": 15, "is_sync": true},
            {"name": "mdat", "offset": 844, "size": 9000},
            {"name": "moof", "offset": 9844, "size": 120, "frame_start": 15, "frame_samples": 15, "is_sync": false},
            {"name": "mdat", "offset": 9964, "size": 4000}
        ]
    }"#;

    #[test]
    fn test_parse_valid_index() {
        let index = SegmentIndex::from_slice(SAMPLE.as_bytes()).unwrap();
        assert_eq!(index.len(), 6);
        assert_eq!(index.format_version(), 2);
        assert_eq!(index.timescale(), DEFAULT_TIMESCALE);
        assert_eq!(index.frame_count(), 30);
        assert_eq!(index.total_bytes(), 13964);
        let moof = index.get(2).unwrap();
        assert_eq!(moof.box_type, BoxType::Moof);
        assert!(moof.is_sync);
        // Frame fields are ignored on non-fragment boxes.
        assert_eq!(index.get(3).unwrap().frame_samples, 0);
    }

    #[test]
    fn test_missing_version_defaults_to_legacy() {
        let json = r#"{"segments": [{"name": "ftyp", "offset": 0, "size": 24}]}"#;
        let index = SegmentIndex::from_slice(json.as_bytes()).unwrap();
        assert_eq!(index.format_version(), 1);
        assert!(!index.supports_random_seek());
    }

    #[test]
    fn test_empty_index_is_malformed() {
        let json = r#"{"file": {"version": 2, "start": 0}, "segments": []}"#;
        let err = SegmentIndex::from_slice(json.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::MalformedIndex(_)));
    }

    #[test]
    fn test_non_monotonic_offsets_are_malformed() {
        let json = r#"{"file": {"version": 2}, "segments": [
            {"name": "ftyp", "offset": 0, "size": 24},
            {"name": "moov", "offset": 24, "size": 100},
            {"name": "moof", "offset": 24, "size": 100, "frame_start": 0, "frame_samples": 1, "is_sync": true}
        ]}"#;
        let err = SegmentIndex::from_slice(json.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("does not follow"));
    }

    #[test]
    fn test_decreasing_sync_frames_are_malformed() {
        let json = r#"{"file": {"version": 2}, "segments": [
            {"name": "moof", "offset": 0, "size": 10, "frame_start": 30, "frame_samples": 30, "is_sync": true},
            {"name": "mdat", "offset": 10, "size": 10},
            {"name": "moof", "offset": 20, "size": 10, "frame_start": 0, "frame_samples": 30, "is_sync": true},
            {"name": "mdat", "offset": 30, "size": 10}
        ]}"#;
        let err = SegmentIndex::from_slice(json.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::MalformedIndex(_)));
    }

    #[test]
    fn test_unknown_box_is_malformed() {
        let json = r#"{"segments": [{"name": "sidx", "offset": 0, "size": 24}]}"#;
        let err = SegmentIndex::from_slice(json.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("sidx"));
    }

    #[test]
    fn test_invalid_json_is_malformed() {
        let err = SegmentIndex::from_slice(b"{not json").unwrap_err();
        assert!(matches!(err, Error::MalformedIndex(_)));
    }
}
