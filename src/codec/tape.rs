use super::decoder::{DecoderConfig, EncodedChunk};
use std::collections::{BTreeMap, BTreeSet};
use tapedeck_common::TimeRanges;
use tapedeck_media::{Sample, TrackConfig};

/// One demuxed container placed at a time offset on the decode timeline.
///
/// Samples are keyed by composition time in track timescale units, so a
/// sample delivered twice (sequential prefetch and a seek fetch of the same
/// fragment) is stored once.
#[derive(Debug, Clone)]
pub struct Tape {
    track: TrackConfig,
    offset: f64,
    samples: BTreeMap<i64, Sample>,
    keyframes: BTreeSet<i64>,
    buffered: TimeRanges,
    frame_delta: Option<f64>,
}

impl Tape {
    pub fn new(track: TrackConfig, offset: f64) -> Self {
        Self {
            track,
            offset,
            samples: BTreeMap::new(),
            keyframes: BTreeSet::new(),
            buffered: TimeRanges::new(),
            frame_delta: None,
        }
    }

    pub fn track(&self) -> &TrackConfig {
        &self.track
    }

    pub fn decoder_config(&self) -> DecoderConfig {
        DecoderConfig::from(&self.track)
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn buffered(&self) -> &TimeRanges {
        &self.buffered
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn keyframe_count(&self) -> usize {
        self.keyframes.len()
    }

    /// Typical sample duration in seconds; 1/30 until a sample arrives.
    pub fn frame_delta(&self) -> f64 {
        self.frame_delta.unwrap_or(1.0 / 30.0)
    }

    /// End of the last buffered sample.
    pub fn end_time(&self) -> Option<f64> {
        self.buffered.end()
    }

    fn key_for(&self, time: f64) -> i64 {
        ((time - self.offset) * self.track.timescale as f64).round() as i64
    }

    fn time_of(&self, key: i64) -> f64 {
        if self.track.timescale == 0 {
            return self.offset;
        }
        self.offset + key as f64 / self.track.timescale as f64
    }

    /// Add demuxed samples; returns how many were new.
    pub fn add_samples(&mut self, samples: Vec<Sample>) -> usize {
        let mut added = 0;
        for sample in samples {
            let key = sample.cts;
            if self.samples.contains_key(&key) {
                continue;
            }
            let start = self.offset + sample.timestamp();
            let duration = sample.duration_secs();
            if self.frame_delta.is_none() && duration > 0.0 {
                self.frame_delta = Some(duration);
            }
            if sample.is_sync {
                self.keyframes.insert(key);
            }
            self.buffered.add(start, start + duration);
            self.samples.insert(key, sample);
            added += 1;
        }
        added
    }

    pub fn contains(&self, time: f64) -> bool {
        self.buffered.contains(time)
    }

    /// Key of the nearest keyframe at or before `time`.
    pub fn keyframe_at_or_before(&self, time: f64) -> Option<i64> {
        let key = self.key_for(time + self.frame_delta() / 2.0);
        self.keyframes.range(..=key).next_back().copied()
    }

    /// Key of the sample presented at `time`.
    pub fn sample_key_at(&self, time: f64) -> Option<i64> {
        let key = self.key_for(time + self.frame_delta() / 2.0);
        let (&found, sample) = self.samples.range(..=key).next_back()?;
        let end = self.time_of(found) + sample.duration_secs();
        (time < end).then_some(found)
    }

    /// Chunks from `from` onwards (inclusive) in decode order.
    pub fn chunks_from(&self, from: i64) -> impl Iterator<Item = (i64, EncodedChunk)> + '_ {
        self.samples.range(from..).map(|(&key, sample)| {
            (
                key,
                EncodedChunk {
                    timestamp: self.time_of(key),
                    duration: sample.duration_secs(),
                    is_key: sample.is_sync,
                    data: sample.data.clone(),
                },
            )
        })
    }

    /// Chunks strictly after `after`.
    pub fn chunks_after(&self, after: i64) -> impl Iterator<Item = (i64, EncodedChunk)> + '_ {
        self.chunks_from(after.saturating_add(1))
    }

    pub fn time_for_key(&self, key: i64) -> f64 {
        self.time_of(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn track() -> TrackConfig {
        TrackConfig {
            track_id: 1,
            timescale: 90000,
            codec: "avc1.64001f".into(),
            coded_width: 640,
            coded_height: 360,
            description: None,
            default_sample_duration: 3000,
            default_sample_size: 0,
            default_sample_flags: 0,
        }
    }

    fn sample(frame: u64, gop: u64) -> Sample {
        Sample {
            dts: frame * 3000,
            cts: (frame * 3000) as i64,
            duration: 3000,
            is_sync: frame % gop == 0,
            timescale: 90000,
            data: Bytes::copy_from_slice(&frame.to_be_bytes()),
        }
    }

    #[test]
    fn test_dedupes_by_timestamp() {
        let mut tape = Tape::new(track(), 0.0);
        assert_eq!(tape.add_samples((0..10).map(|f| sample(f, 5)).collect()), 10);
        assert_eq!(tape.add_samples((5..15).map(|f| sample(f, 5)).collect()), 5);
        assert_eq!(tape.len(), 15);
        assert_eq!(tape.keyframe_count(), 3);
        assert_eq!(tape.buffered().len(), 1);
        assert!((tape.end_time().unwrap() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_keyframe_never_after_query() {
        let mut tape = Tape::new(track(), 0.0);
        tape.add_samples((0..30).map(|f| sample(f, 10)).collect());
        for frame in 0..30u64 {
            let time = frame as f64 / 30.0;
            let key = tape.keyframe_at_or_before(time).unwrap();
            assert!(tape.time_for_key(key) <= time + 1e-9);
            assert_eq!(key, ((frame / 10) * 10 * 3000) as i64);
        }
    }

    #[test]
    fn test_offset_shifts_timeline() {
        let mut tape = Tape::new(track(), 10.0);
        tape.add_samples((0..5).map(|f| sample(f, 5)).collect());
        assert!(tape.contains(10.05));
        assert!(!tape.contains(0.05));
        assert_eq!(tape.sample_key_at(10.0 + 2.0 / 30.0), Some(6000));
        let (_, first) = tape.chunks_from(0).next().unwrap();
        assert_eq!(first.timestamp, 10.0);
        assert!(first.is_key);
    }
}
