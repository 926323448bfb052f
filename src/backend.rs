//! Playback backends: where downloaded bytes go and how frames become
//! available to the playback loop.

use crate::buffer::{AppendOutcome, BufferPool, PoolStats, SlotId};
use crate::codec::{CodecBuffer, CodecStats, DecoderFactory, Lane};
use crate::config::{BufferConfig, CodecConfig};
use crate::events::EventBus;
use crate::playback::{FrameSource, LoadResult, LoadedFrame};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tapedeck_common::Direction;

/// Which backend a session runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Buffer pool of byte slots.
    Mse,
    /// Demux and decode through a [`VideoDecoder`](crate::codec::VideoDecoder).
    WebCodecs,
    /// Single whole-file buffer, no random seek.
    Compatibility,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mse" => Ok(Self::Mse),
            "webcodecs" | "web_codecs" | "codec" => Ok(Self::WebCodecs),
            "compat" | "compatibility" => Ok(Self::Compatibility),
            other => Err(format!("unknown backend '{}'", other)),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mse => write!(f, "mse"),
            Self::WebCodecs => write!(f, "webcodecs"),
            Self::Compatibility => write!(f, "compatibility"),
        }
    }
}

/// Frame geometry of the loaded media.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timeline {
    pub fps: f64,
    pub num_frames: u64,
    pub start_bias: f64,
}

impl Timeline {
    pub fn time_for(&self, frame: u64) -> f64 {
        self.start_bias + frame as f64 / self.fps
    }

    /// Time range covered by frames `[first, end)`.
    pub fn range_for(&self, frames: Option<(u64, u64)>) -> Option<(f64, f64)> {
        frames.map(|(first, end)| (self.time_for(first), self.time_for(end)))
    }

    pub fn duration(&self) -> f64 {
        self.num_frames as f64 / self.fps
    }
}

/// Where ingested bytes ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    /// Stored in a buffer slot.
    Stored(Option<SlotId>),
    /// Demuxed into the decode pipeline; the count of new samples.
    Demuxed(usize),
    /// Every slot was full; the bytes were dropped.
    Dropped { bytes: u64 },
}

/// Origin of ingested bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    Sequential,
    Seek,
    OnDemand,
}

impl Feed {
    fn lane(self) -> Lane {
        match self {
            Feed::Sequential => Lane::Scrub,
            Feed::Seek => Lane::Seek,
            Feed::OnDemand => Lane::OnDemand,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum BackendStats {
    Mse(PoolStats),
    WebCodecs(CodecStats),
    Compatibility(PoolStats),
}

pub enum Backend {
    Mse(BufferPool),
    WebCodecs(CodecBuffer),
    Compatibility(BufferPool),
}

impl Backend {
    pub fn mse(config: &BufferConfig) -> Self {
        Self::Mse(BufferPool::new(config))
    }

    pub fn web_codecs(
        factory: Arc<dyn DecoderFactory>,
        config: &CodecConfig,
        events: Arc<EventBus>,
        timeline: Timeline,
    ) -> Self {
        Self::WebCodecs(CodecBuffer::new(
            factory,
            config.clone(),
            events,
            timeline.fps,
            timeline.start_bias,
        ))
    }

    pub fn compatibility() -> Self {
        Self::Compatibility(BufferPool::with_slots(1, u64::MAX))
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Mse(_) => BackendKind::Mse,
            Self::WebCodecs(_) => BackendKind::WebCodecs,
            Self::Compatibility(_) => BackendKind::Compatibility,
        }
    }

    pub fn can_seek(&self) -> bool {
        !matches!(self, Self::Compatibility(_))
    }

    pub fn can_set_rate(&self) -> bool {
        !matches!(self, Self::Compatibility(_))
    }

    pub fn stats(&self) -> BackendStats {
        match self {
            Self::Mse(pool) => BackendStats::Mse(pool.stats()),
            Self::WebCodecs(codec) => BackendStats::WebCodecs(codec.stats()),
            Self::Compatibility(pool) => BackendStats::Compatibility(pool.stats()),
        }
    }

    /// Store downloaded bytes. Buffer writes settle immediately: there is
    /// no media element to wait on.
    pub fn ingest(
        &mut self,
        feed: Feed,
        data: Bytes,
        file_offset: u64,
        range: Option<(f64, f64)>,
    ) -> crate::Result<Ingest> {
        match self {
            Self::Mse(pool) | Self::Compatibility(pool) => {
                let outcome = match feed {
                    Feed::Sequential => pool.append_to_active(data, range),
                    Feed::Seek | Feed::OnDemand => pool.append_to_seek(data, range),
                };
                settle_all(pool, outcome)
            }
            Self::WebCodecs(codec) => {
                let added = codec.append(feed.lane(), file_offset, &data)?;
                Ok(Ingest::Demuxed(added))
            }
        }
    }

    /// Percentage of `total_bytes` held in sequential buffers.
    pub fn buffered_percent(&self, total_bytes: u64, timeline: &Timeline) -> f64 {
        match self {
            Self::Mse(pool) | Self::Compatibility(pool) => pool.buffered_percent(total_bytes),
            Self::WebCodecs(codec) => {
                let buffered: f64 = codec
                    .tapes()
                    .iter()
                    .map(|t| t.buffered().total_duration())
                    .sum();
                let duration = timeline.duration();
                if duration <= 0.0 {
                    return 0.0;
                }
                (buffered / duration * 100.0).min(100.0)
            }
        }
    }

    /// Whether `time` can be shown without fetching.
    pub fn is_buffered(&self, time: f64, direction: Direction) -> bool {
        match self {
            Self::Mse(pool) | Self::Compatibility(pool) => {
                pool.select_buffer_for_time(time, direction).is_some()
            }
            Self::WebCodecs(codec) => codec.is_buffered(time),
        }
    }

    /// Clear everything for new media or a new rendition.
    pub fn reset(&mut self, start_bias: f64) {
        match self {
            Self::Mse(pool) | Self::Compatibility(pool) => pool.reset_for_new_media(),
            Self::WebCodecs(codec) => codec.reset(start_bias),
        }
    }

    /// Point the decode cursor at `time` ahead of a seek. Buffer pools have
    /// no cursor of their own.
    pub fn seek_to(&mut self, time: f64) -> crate::Result<()> {
        if let Self::WebCodecs(codec) = self {
            codec.set_current_time(time)?;
        }
        Ok(())
    }

    pub fn set_playing(&mut self, playing: bool) {
        if let Self::WebCodecs(codec) = self {
            codec.set_playing(playing);
        }
    }

    fn load(&mut self, frame: u64, time: f64) -> LoadResult {
        let loaded = LoadResult::Loaded(LoadedFrame { frame, time });
        match self {
            Self::Mse(pool) | Self::Compatibility(pool) => {
                if pool.select_buffer_for_time(time, Direction::Stopped).is_some() {
                    loaded
                } else {
                    LoadResult::NotBuffered
                }
            }
            Self::WebCodecs(codec) => {
                if codec.decoded_frame(frame).is_none() {
                    // Errors are already reported on the event bus.
                    if let Err(e) = codec.advance(time, Lane::Scrub) {
                        tracing::debug!("Decode at frame {} failed: {}", frame, e);
                    }
                }
                if codec.decoded_frame(frame).is_some() {
                    loaded
                } else {
                    LoadResult::NotBuffered
                }
            }
        }
    }
}

fn settle_all(pool: &mut BufferPool, outcome: AppendOutcome) -> crate::Result<Ingest> {
    match outcome {
        AppendOutcome::Started(ticket) => {
            let slot = ticket.slot;
            let mut next = pool.settle(ticket.slot, ticket.range)?;
            while let Some(ticket) = next {
                next = pool.settle(ticket.slot, ticket.range)?;
            }
            Ok(Ingest::Stored(Some(slot)))
        }
        AppendOutcome::Queued(slot) => Ok(Ingest::Stored(Some(slot))),
        AppendOutcome::Exhausted { dropped } => Ok(Ingest::Dropped { bytes: dropped }),
    }
}

// ---------------------------------------------------------------------------
// SharedBackend
// ---------------------------------------------------------------------------

/// Backend shared between the session (ingest) and the playback loop
/// (frame loads). Lock order is always loop, then backend.
#[derive(Clone)]
pub struct SharedBackend {
    inner: Arc<Mutex<Backend>>,
    timeline: Arc<Mutex<Timeline>>,
}

impl SharedBackend {
    pub fn new(backend: Backend, timeline: Timeline) -> Self {
        Self {
            inner: Arc::new(Mutex::new(backend)),
            timeline: Arc::new(Mutex::new(timeline)),
        }
    }

    pub fn timeline(&self) -> Timeline {
        *self.timeline.lock()
    }

    pub fn set_timeline(&self, timeline: Timeline) {
        *self.timeline.lock() = timeline;
    }

    pub fn kind(&self) -> BackendKind {
        self.inner.lock().kind()
    }

    /// Run `f` under the backend lock.
    pub fn with<R>(&self, f: impl FnOnce(&mut Backend) -> R) -> R {
        f(&mut self.inner.lock())
    }

    /// Swap in a different backend.
    pub fn replace(&self, backend: Backend) {
        *self.inner.lock() = backend;
    }
}

impl FrameSource for SharedBackend {
    fn load(&mut self, frame: u64, time: f64) -> LoadResult {
        if frame >= self.timeline().num_frames {
            return LoadResult::OutOfRange;
        }
        self.inner.lock().load(frame, time)
    }

    fn can_play(&self, frame: u64, _time: f64, direction: Direction) -> bool {
        let timeline = self.timeline();
        let next = match direction {
            Direction::Forward => frame + 1,
            Direction::Backward => match frame.checked_sub(1) {
                Some(f) => f,
                None => return false,
            },
            Direction::Stopped => frame,
        };
        if next >= timeline.num_frames {
            return false;
        }
        self.inner.lock().is_buffered(timeline.time_for(next), direction)
    }

    fn draw(&mut self, frame: LoadedFrame) {
        tracing::trace!("Draw frame {} at {:.3}s", frame.frame, frame.time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::HeadlessFactory;
    use assert_matches::assert_matches;
    use tapedeck_media::fmp4::SyntheticVideo;

    fn timeline(frames: u64) -> Timeline {
        Timeline {
            fps: 30.0,
            num_frames: frames,
            start_bias: 0.0,
        }
    }

    #[test]
    fn test_capabilities() {
        let mse = Backend::mse(&BufferConfig::default());
        assert!(mse.can_seek() && mse.can_set_rate());
        let compat = Backend::compatibility();
        assert!(!compat.can_seek());
        assert_eq!(compat.kind(), BackendKind::Compatibility);
        assert_eq!("WebCodecs".parse::<BackendKind>().unwrap(), BackendKind::WebCodecs);
        assert!("vhs".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_mse_frames_follow_buffered_ranges() {
        let mut shared = SharedBackend::new(Backend::mse(&BufferConfig::default()), timeline(90));
        let range = shared.timeline().range_for(Some((0, 30)));
        let ingest = shared
            .with(|b| b.ingest(Feed::Sequential, Bytes::from_static(b"abc"), 0, range))
            .unwrap();
        assert_matches!(ingest, Ingest::Stored(Some(slot)) if slot.index == 0);

        assert_matches!(shared.load(10, 10.0 / 30.0), LoadResult::Loaded(_));
        assert_eq!(shared.load(40, 40.0 / 30.0), LoadResult::NotBuffered);
        assert_eq!(shared.load(90, 3.0), LoadResult::OutOfRange);
        assert!(shared.can_play(10, 0.0, Direction::Forward));
        assert!(!shared.can_play(29, 0.0, Direction::Forward));
        assert!(!shared.can_play(0, 0.0, Direction::Backward));
    }

    #[test]
    fn test_compatibility_drops_nothing() {
        let mut backend = Backend::compatibility();
        let ingest = backend
            .ingest(Feed::Sequential, Bytes::from(vec![0u8; 1 << 20]), 0, Some((0.0, 3.0)))
            .unwrap();
        assert_matches!(ingest, Ingest::Stored(_));
        assert!(backend.is_buffered(1.5, Direction::Forward));
    }

    #[test]
    fn test_web_codecs_loads_decoded_frames() {
        let media = SyntheticVideo::new(30.0, 60).gop_len(30).frag_len(10).build().unwrap();
        let backend = Backend::web_codecs(
            Arc::new(HeadlessFactory::new(0)),
            &CodecConfig::default(),
            Arc::new(EventBus::default()),
            timeline(60),
        );
        let mut shared = SharedBackend::new(backend, timeline(60));
        let ingest = shared
            .with(|b| b.ingest(Feed::Sequential, media.bytes.clone(), 0, None))
            .unwrap();
        assert_eq!(ingest, Ingest::Demuxed(60));

        assert_matches!(shared.load(5, 5.0 / 30.0), LoadResult::Loaded(_));
        assert_matches!(shared.load(45, 45.0 / 30.0), LoadResult::Loaded(_));
        let percent = shared.with(|b| b.buffered_percent(0, &timeline(60)));
        assert!((percent - 100.0).abs() < 1e-6);
    }
}
