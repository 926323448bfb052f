//! Decode pipeline: demux appended bytes onto tapes and keep one decoder
//! per lane fed without flooding it.

use super::decoder::{DecodedFrame, DecoderFactory, EncodedChunk, VideoDecoder};
use super::error::DecodeError;
use super::tape::Tape;
use crate::config::CodecConfig;
use crate::events::{ErrorCode, EventBus, PlayerEvent};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tapedeck_media::{DemuxEvent, Demuxer, Sample, TrackConfig};

/// Decoded frames kept around the cursor.
const DECODED_CACHE_FRAMES: usize = 120;

const TIME_EPSILON: f64 = 1e-6;

/// Role of a decoder. Each lane demuxes and decodes independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    /// Bytes from seek fetches.
    Seek,
    /// Bytes from on-demand windows during playback.
    OnDemand,
    /// Bytes from sequential prefetch, decoded around the cursor for scrubbing.
    Scrub,
}

impl Lane {
    pub const ALL: [Lane; 3] = [Lane::Seek, Lane::OnDemand, Lane::Scrub];

    fn index(self) -> usize {
        match self {
            Lane::Seek => 0,
            Lane::OnDemand => 1,
            Lane::Scrub => 2,
        }
    }
}

/// Outcome of [`CodecBuffer::set_current_time`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOutcome {
    /// The time was buffered; decoding restarted from its keyframe.
    Resubmitted,
    /// Waiting for data covering the time.
    Pending,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CodecStats {
    pub tapes: usize,
    pub active_tape: usize,
    pub samples: usize,
    pub decoded_frames: usize,
    pub in_flight: usize,
    pub overflow: usize,
    pub decoders_recreated: u64,
    pub pending_seek: Option<f64>,
}

struct LaneState {
    decoder: Box<dyn VideoDecoder>,
    demuxer: Demuxer,
    /// Tape the decoder is configured for.
    configured: Option<usize>,
    /// Last sample key handed to the decoder (or the overflow queue).
    last_submitted: Option<i64>,
    in_flight: usize,
    overflow: VecDeque<EncodedChunk>,
}

impl LaneState {
    fn new(decoder: Box<dyn VideoDecoder>) -> Self {
        Self {
            decoder,
            demuxer: Demuxer::new(),
            configured: None,
            last_submitted: None,
            in_flight: 0,
            overflow: VecDeque::new(),
        }
    }

    /// Forget decode progress; the next submission starts at a keyframe.
    fn rewind(&mut self) {
        self.decoder.reset();
        self.configured = None;
        self.last_submitted = None;
        self.in_flight = 0;
        self.overflow.clear();
    }
}

fn drain_output(state: &mut LaneState, output: &mut Vec<DecodedFrame>) {
    while let Some(frame) = state.decoder.poll_output() {
        state.in_flight = state.in_flight.saturating_sub(1);
        output.push(frame);
    }
}

pub struct CodecBuffer {
    factory: Arc<dyn DecoderFactory>,
    config: CodecConfig,
    events: Arc<EventBus>,
    fps: f64,
    start_bias: f64,
    lanes: Vec<LaneState>,
    tapes: Vec<Tape>,
    active_tape: usize,
    pending_switch: Option<usize>,
    current_time: f64,
    playing: bool,
    pending_seek: Option<f64>,
    decoded: BTreeMap<u64, DecodedFrame>,
    decoders_recreated: u64,
}

impl CodecBuffer {
    pub fn new(
        factory: Arc<dyn DecoderFactory>,
        config: CodecConfig,
        events: Arc<EventBus>,
        fps: f64,
        start_bias: f64,
    ) -> Self {
        let lanes = Lane::ALL
            .iter()
            .map(|_| LaneState::new(factory.create()))
            .collect();
        Self {
            factory,
            config,
            events,
            fps,
            start_bias,
            lanes,
            tapes: Vec::new(),
            active_tape: 0,
            pending_switch: None,
            current_time: start_bias,
            playing: false,
            pending_seek: None,
            decoded: BTreeMap::new(),
            decoders_recreated: 0,
        }
    }

    pub fn tapes(&self) -> &[Tape] {
        &self.tapes
    }

    pub fn active_tape(&self) -> Option<&Tape> {
        self.tapes.get(self.active_tape)
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn pending_seek(&self) -> Option<f64> {
        self.pending_seek
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.playing = playing;
    }

    pub fn in_flight(&self, lane: Lane) -> usize {
        self.lanes[lane.index()].in_flight
    }

    pub fn overflow_len(&self, lane: Lane) -> usize {
        self.lanes[lane.index()].overflow.len()
    }

    pub fn decoded_frame(&self, frame: u64) -> Option<&DecodedFrame> {
        self.decoded.get(&frame)
    }

    /// Whether any tape has `time` buffered.
    pub fn is_buffered(&self, time: f64) -> bool {
        self.tapes.iter().any(|t| t.contains(time))
    }

    pub fn stats(&self) -> CodecStats {
        CodecStats {
            tapes: self.tapes.len(),
            active_tape: self.active_tape,
            samples: self.tapes.iter().map(Tape::len).sum(),
            decoded_frames: self.decoded.len(),
            in_flight: self.lanes.iter().map(|l| l.in_flight).sum(),
            overflow: self.lanes.iter().map(|l| l.overflow.len()).sum(),
            decoders_recreated: self.decoders_recreated,
            pending_seek: self.pending_seek,
        }
    }

    fn frame_for_time(&self, time: f64) -> u64 {
        ((time - self.start_bias) * self.fps).round().max(0.0) as u64
    }

    // ------------------------------------------------------------------------
    // Ingest
    // ------------------------------------------------------------------------

    /// Feed bytes at `file_offset` into `lane`'s demuxer and decode what
    /// becomes available. Returns the number of new samples.
    pub fn append(&mut self, lane: Lane, file_offset: u64, data: &[u8]) -> Result<usize, DecodeError> {
        let events = self.lanes[lane.index()]
            .demuxer
            .push_chunk(file_offset, data)
            .map_err(|e| self.report(lane, e.into()))?;

        let mut added = 0;
        for event in events {
            match event {
                DemuxEvent::Init(track) => self.open_tape(track),
                DemuxEvent::Samples(samples) => {
                    if self.tapes.is_empty() {
                        tracing::warn!("{:?} lane got samples before any init segment", lane);
                        continue;
                    }
                    added += self.place_samples(lane, samples);
                }
            }
        }

        if added > 0 {
            if let Some(time) = self.pending_seek {
                if self.is_buffered(time) {
                    tracing::debug!("Pending seek to {:.3}s resolved by new data", time);
                    self.set_current_time(time)?;
                    return Ok(added);
                }
            }
            self.decode_samples(lane)?;
        }
        Ok(added)
    }

    /// Add samples to the tape they belong to: one of the lane's track
    /// already covering the sample's time, else the newest tape of that
    /// track.
    fn place_samples(&mut self, lane: Lane, samples: Vec<Sample>) -> usize {
        let track = self.lanes[lane.index()].demuxer.track().cloned();
        let of_track = |t: &Tape| track.as_ref().map_or(true, |track| t.track() == track);

        let mut routed: BTreeMap<usize, Vec<Sample>> = BTreeMap::new();
        for sample in samples {
            let covering = self
                .tapes
                .iter()
                .position(|t| of_track(t) && t.contains(t.offset() + sample.timestamp()));
            let Some(idx) = covering
                .or_else(|| self.tapes.iter().rposition(of_track))
                .or_else(|| self.tapes.len().checked_sub(1))
            else {
                continue;
            };
            routed.entry(idx).or_default().push(sample);
        }

        let mut added = 0;
        for (idx, samples) in routed {
            added += self.tapes[idx].add_samples(samples);
        }
        added
    }

    /// Start a new tape for `track` unless one already holds it. A lane
    /// that re-reads an earlier init segment keeps feeding that tape.
    fn open_tape(&mut self, track: TrackConfig) {
        if self.tapes.iter().any(|t| *t.track() == track) {
            return;
        }
        let offset = match self.tapes.last() {
            Some(last) => last.end_time().unwrap_or(last.offset()),
            None => self.start_bias,
        };
        tracing::debug!(
            "Tape {} opened at {:.3}s ({} {}x{})",
            self.tapes.len(),
            offset,
            track.codec,
            track.coded_width,
            track.coded_height
        );
        // Lanes that only ever see fragments still need the track.
        for lane in &mut self.lanes {
            if lane.demuxer.track().is_none() {
                lane.demuxer = Demuxer::with_track(track.clone());
            }
        }
        self.tapes.push(Tape::new(track, offset));
    }

    // ------------------------------------------------------------------------
    // Decode
    // ------------------------------------------------------------------------

    /// Submit samples of the active tape to `lane`'s decoder, starting at
    /// the keyframe preceding the cursor.
    pub fn decode_samples(&mut self, lane: Lane) -> Result<(), DecodeError> {
        match self.submit(lane) {
            Err(e) if e.is_reclaimed() => {
                self.recreate(lane);
                self.submit(lane).map_err(|e| self.report(lane, e))
            }
            other => other.map_err(|e| self.report(lane, e)),
        }
    }

    fn submit(&mut self, lane: Lane) -> Result<(), DecodeError> {
        let tape_idx = self.active_tape;
        let Some(tape) = self.tapes.get(tape_idx) else {
            return Ok(());
        };
        let window_end = self.current_time + self.config.decode_window_deltas as f64 * tape.frame_delta();
        let max_in_flight = self.config.max_in_flight;
        let playing = self.playing;
        let state = &mut self.lanes[lane.index()];

        if state.configured != Some(tape_idx) {
            state.decoder.configure(&tape.decoder_config())?;
            state.configured = Some(tape_idx);
            state.last_submitted = None;
        }

        let start = match state.last_submitted {
            Some(last) => last.saturating_add(1),
            None => match tape.keyframe_at_or_before(self.current_time) {
                Some(key) => key,
                None => return Ok(()),
            },
        };

        let mut output = Vec::new();
        for (key, chunk) in tape.chunks_from(start) {
            if !playing && chunk.timestamp > window_end + TIME_EPSILON {
                break;
            }
            if state.in_flight >= max_in_flight {
                state.overflow.push_back(chunk);
            } else {
                state.decoder.decode(chunk)?;
                state.in_flight += 1;
                drain_output(state, &mut output);
            }
            state.last_submitted = Some(key);
        }

        self.store(output);
        Ok(())
    }

    /// Drain decoder output into the frame cache and refill from overflow.
    /// Returns the number of frames returned.
    pub fn frame_return(&mut self, lane: Lane) -> Result<usize, DecodeError> {
        let max_in_flight = self.config.max_in_flight;
        let mut output = Vec::new();
        let state = &mut self.lanes[lane.index()];
        drain_output(state, &mut output);

        while state.in_flight < max_in_flight {
            let Some(chunk) = state.overflow.pop_front() else {
                break;
            };
            match state.decoder.decode(chunk) {
                Ok(()) => {
                    state.in_flight += 1;
                    drain_output(state, &mut output);
                }
                Err(e) if e.is_reclaimed() => {
                    let returned = self.store(output);
                    self.recreate(lane);
                    self.submit(lane).map_err(|e| self.report(lane, e))?;
                    return Ok(returned);
                }
                Err(e) => {
                    self.store(output);
                    return Err(self.report(lane, e));
                }
            }
        }
        Ok(self.store(output))
    }

    /// Flush `lane`'s decoder, returning every frame it held.
    pub fn flush(&mut self, lane: Lane) -> Result<usize, DecodeError> {
        let mut output = Vec::new();
        let state = &mut self.lanes[lane.index()];
        if state.configured.is_none() {
            return Ok(0);
        }
        if let Err(e) = state.decoder.flush() {
            return Err(self.report(lane, e));
        }
        drain_output(state, &mut output);
        Ok(self.store(output))
    }

    fn store(&mut self, frames: Vec<DecodedFrame>) -> usize {
        let count = frames.len();
        for frame in frames {
            let number = self.frame_for_time(frame.timestamp);
            self.decoded.insert(number, frame);
        }
        self.trim_cache();
        count
    }

    fn trim_cache(&mut self) {
        let cursor = self.frame_for_time(self.current_time);
        while self.decoded.len() > DECODED_CACHE_FRAMES {
            let (Some(&first), Some(&last)) = (self.decoded.keys().next(), self.decoded.keys().next_back())
            else {
                break;
            };
            let victim = if cursor.abs_diff(first) >= cursor.abs_diff(last) {
                first
            } else {
                last
            };
            self.decoded.remove(&victim);
        }
    }

    fn recreate(&mut self, lane: Lane) {
        tracing::info!("{:?} decoder reclaimed, recreating", lane);
        let state = &mut self.lanes[lane.index()];
        state.rewind();
        state.decoder = self.factory.create();
        self.decoders_recreated += 1;
    }

    fn report(&self, lane: Lane, error: DecodeError) -> DecodeError {
        tracing::warn!("{:?} decoder error: {}", lane, error);
        self.events.emit(PlayerEvent::error(None, ErrorCode::Decode, error.to_string()));
        error
    }

    // ------------------------------------------------------------------------
    // Cursor
    // ------------------------------------------------------------------------

    /// Move the decode cursor. Inside buffered data the seek lane restarts
    /// from the preceding keyframe; otherwise the seek waits for data.
    pub fn set_current_time(&mut self, time: f64) -> Result<SeekOutcome, DecodeError> {
        self.current_time = time;
        let Some(tape_idx) = self.tapes.iter().position(|t| t.contains(time)) else {
            self.pending_seek = Some(time);
            return Ok(SeekOutcome::Pending);
        };

        self.pending_seek = None;
        if tape_idx != self.active_tape {
            self.decoded.clear();
            self.switch_to(tape_idx);
        }
        self.lanes[Lane::Seek.index()].rewind();
        self.decode_samples(Lane::Seek)?;
        Ok(SeekOutcome::Resubmitted)
    }

    /// Advance the cursor during playback, switching tapes at the end of
    /// the active one.
    pub fn advance(&mut self, time: f64, lane: Lane) -> Result<(), DecodeError> {
        self.current_time = time;
        self.check_tape_switch()?;
        self.decode_samples(lane)?;
        self.frame_return(lane)?;
        Ok(())
    }

    fn check_tape_switch(&mut self) -> Result<(), DecodeError> {
        if !self.playing || self.active_tape + 1 >= self.tapes.len() {
            return Ok(());
        }
        let Some(tape) = self.tapes.get(self.active_tape) else {
            return Ok(());
        };
        let end = tape.end_time().unwrap_or(tape.offset());
        if self.current_time + tape.frame_delta() < end - TIME_EPSILON {
            return Ok(());
        }

        let next = self.active_tape + 1;
        self.pending_switch = Some(next);
        for lane in Lane::ALL {
            self.drain_lane(lane)?;
        }
        self.switch_to(next);
        Ok(())
    }

    /// Decode everything `lane` holds for the active tape, overflow
    /// included. Returns the number of frames returned.
    fn drain_lane(&mut self, lane: Lane) -> Result<usize, DecodeError> {
        let mut returned = 0;
        loop {
            returned += self.flush(lane)?;
            let before = self.lanes[lane.index()].overflow.len();
            if before == 0 {
                return Ok(returned);
            }
            returned += self.frame_return(lane)?;
            if self.lanes[lane.index()].overflow.len() >= before {
                tracing::warn!("{:?} decoder stopped taking chunks with {} queued", lane, before);
                return Ok(returned);
            }
        }
    }

    fn switch_to(&mut self, tape_idx: usize) {
        tracing::debug!("Switching tape {} -> {}", self.active_tape, tape_idx);
        for lane in &mut self.lanes {
            lane.rewind();
        }
        self.active_tape = tape_idx;
        self.pending_switch = None;
    }

    /// Drop all tapes and decoder state for new media.
    pub fn reset(&mut self, start_bias: f64) {
        for lane in &mut self.lanes {
            lane.rewind();
            lane.demuxer.reset();
        }
        self.tapes.clear();
        self.active_tape = 0;
        self.pending_switch = None;
        self.pending_seek = None;
        self.decoded.clear();
        self.start_bias = start_bias;
        self.current_time = start_bias;
    }

    #[cfg(test)]
    fn lane_configured(&self, lane: Lane) -> Option<usize> {
        self.lanes[lane.index()].configured
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::HeadlessFactory;
    use tapedeck_media::fmp4::{SyntheticMedia, SyntheticVideo};

    fn media(frames: u64) -> SyntheticMedia {
        SyntheticVideo::new(30.0, frames)
            .gop_len(30)
            .frag_len(10)
            .build()
            .unwrap()
    }

    fn codec(factory: HeadlessFactory) -> (CodecBuffer, Arc<EventBus>) {
        let events = Arc::new(EventBus::default());
        let buffer = CodecBuffer::new(
            Arc::new(factory),
            CodecConfig::default(),
            events.clone(),
            30.0,
            0.0,
        );
        (buffer, events)
    }

    #[test]
    fn test_window_limits_submission_while_paused() {
        let media = media(120);
        let (mut codec, _) = codec(HeadlessFactory::new(0));
        codec.append(Lane::Scrub, 0, &media.bytes).unwrap();

        assert_eq!(codec.tapes().len(), 1);
        assert_eq!(codec.tapes()[0].len(), 120);
        // Keyframe 0 through 25 deltas past the cursor.
        assert_eq!(codec.stats().decoded_frames, 26);
        assert!(codec.decoded_frame(25).is_some());
        assert!(codec.decoded_frame(26).is_none());
    }

    #[test]
    fn test_in_flight_is_bounded() {
        let media = media(60);
        let (mut codec, _) = codec(HeadlessFactory::new(100));
        codec.set_playing(true);
        codec.append(Lane::OnDemand, 0, &media.bytes).unwrap();

        assert_eq!(codec.in_flight(Lane::OnDemand), 8);
        assert_eq!(codec.overflow_len(Lane::OnDemand), 52);
    }

    #[test]
    fn test_frame_return_drains_overflow() {
        let media = media(60);
        let (mut codec, _) = codec(HeadlessFactory::new(100));
        codec.set_playing(true);
        codec.append(Lane::OnDemand, 0, &media.bytes).unwrap();
        assert_eq!(codec.overflow_len(Lane::OnDemand), 52);

        assert_eq!(codec.flush(Lane::OnDemand).unwrap(), 8);
        assert!(codec.decoded_frame(7).is_some());
        assert_eq!(codec.in_flight(Lane::OnDemand), 0);

        assert_eq!(codec.frame_return(Lane::OnDemand).unwrap(), 0);
        assert_eq!(codec.in_flight(Lane::OnDemand), 8);
        assert_eq!(codec.overflow_len(Lane::OnDemand), 44);
    }

    #[test]
    fn test_seek_inside_buffer_resubmits_from_keyframe() {
        let media = media(120);
        let (mut codec, _) = codec(HeadlessFactory::new(0));
        codec.append(Lane::Scrub, 0, &media.bytes).unwrap();

        let outcome = codec.set_current_time(70.0 / 30.0).unwrap();
        assert_eq!(outcome, SeekOutcome::Resubmitted);
        // Keyframe 60 onwards.
        assert!(codec.decoded_frame(60).is_some());
        assert!(codec.decoded_frame(70).is_some());
        assert_eq!(codec.lane_configured(Lane::Seek), Some(0));
    }

    #[test]
    fn test_seek_outside_buffer_waits_for_data() {
        let media = media(120);
        let (mut codec, _) = codec(HeadlessFactory::new(0));
        let init_end = media.index.init_range().unwrap().end as usize;
        codec.append(Lane::Scrub, 0, &media.bytes[..init_end]).unwrap();

        assert_eq!(codec.set_current_time(3.0).unwrap(), SeekOutcome::Pending);
        assert_eq!(codec.pending_seek(), Some(3.0));

        // Seek fetch of the fragment holding frame 90, no init segment.
        let m = media.index.find_segment_for_frame(90, tapedeck_common::Direction::Stopped).unwrap();
        let span = media.index.seek_range(&m);
        codec
            .append(Lane::Seek, span.start, &media.bytes[span.start as usize..span.end as usize])
            .unwrap();
        assert_eq!(codec.pending_seek(), None);
        assert!(codec.decoded_frame(90).is_some());
    }

    #[test]
    fn test_reclaimed_decoder_is_recreated() {
        let media = media(60);
        let factory = HeadlessFactory::new(0);
        let (mut codec, events) = codec(factory.clone());
        let mut rx = events.subscribe();

        factory.inject_fault("Codec reclaimed due to inactivity");
        codec.append(Lane::Scrub, 0, &media.bytes).unwrap();
        assert_eq!(codec.stats().decoders_recreated, 1);
        assert!(codec.decoded_frame(0).is_some());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_other_decoder_errors_are_reported() {
        let media = media(60);
        let factory = HeadlessFactory::new(0);
        let (mut codec, events) = codec(factory.clone());
        let mut rx = events.subscribe();

        factory.inject_fault("corrupt slice");
        assert!(codec.append(Lane::Scrub, 0, &media.bytes).is_err());
        match rx.try_recv().unwrap() {
            PlayerEvent::Error { code, message, .. } => {
                assert_eq!(code, ErrorCode::Decode);
                assert!(message.contains("corrupt slice"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_tape_switch_at_end_while_playing() {
        let first = SyntheticVideo::new(30.0, 30).gop_len(30).frag_len(30).build().unwrap();
        let second = SyntheticVideo::new(30.0, 30)
            .gop_len(30)
            .frag_len(30)
            .dimensions(1280, 720)
            .build()
            .unwrap();
        let (mut codec, _) = codec(HeadlessFactory::new(0));
        codec.set_playing(true);
        codec.append(Lane::OnDemand, 0, &first.bytes).unwrap();
        codec
            .append(Lane::OnDemand, first.bytes.len() as u64, &second.bytes)
            .unwrap();
        assert_eq!(codec.tapes().len(), 2);
        assert!((codec.tapes()[1].offset() - 1.0).abs() < 1e-9);

        codec.advance(29.0 / 30.0, Lane::OnDemand).unwrap();
        assert_eq!(codec.active_tape().unwrap().track().coded_width, 1280);
        assert_eq!(codec.lane_configured(Lane::OnDemand), Some(1));
    }

    #[test]
    fn test_samples_land_on_their_own_tape() {
        let first = SyntheticVideo::new(30.0, 30).gop_len(10).frag_len(10).build().unwrap();
        let second = SyntheticVideo::new(30.0, 30)
            .gop_len(30)
            .frag_len(30)
            .dimensions(1280, 720)
            .build()
            .unwrap();
        let (mut codec, _) = codec(HeadlessFactory::new(0));

        // Init and the first fragment of one file, then a whole second file.
        let head_end = first.index.get(3).unwrap().byte_end() as usize;
        codec.append(Lane::Scrub, 0, &first.bytes[..head_end]).unwrap();
        codec
            .append(Lane::OnDemand, first.bytes.len() as u64, &second.bytes)
            .unwrap();
        assert_eq!(codec.tapes().len(), 2);
        assert_eq!(codec.tapes()[0].len(), 10);

        // A later fragment of the first file arrives on the seek lane.
        let start = first.index.get(4).unwrap().byte_offset;
        let end = first.index.get(5).unwrap().byte_end();
        let added = codec
            .append(Lane::Seek, start, &first.bytes[start as usize..end as usize])
            .unwrap();
        assert_eq!(added, 10);
        assert_eq!(codec.tapes().len(), 2);
        assert_eq!(codec.tapes()[0].len(), 20);
        assert_eq!(codec.tapes()[1].len(), 30);
    }

    #[test]
    fn test_tape_switch_decodes_queued_chunks() {
        let first = SyntheticVideo::new(30.0, 30).gop_len(30).frag_len(30).build().unwrap();
        let second = SyntheticVideo::new(30.0, 30)
            .gop_len(30)
            .frag_len(30)
            .dimensions(1280, 720)
            .build()
            .unwrap();
        let (mut codec, _) = codec(HeadlessFactory::new(100));
        codec.set_playing(true);
        codec.append(Lane::OnDemand, 0, &first.bytes).unwrap();
        codec
            .append(Lane::OnDemand, first.bytes.len() as u64, &second.bytes)
            .unwrap();
        assert_eq!(codec.in_flight(Lane::OnDemand), 8);
        assert_eq!(codec.overflow_len(Lane::OnDemand), 22);

        codec.advance(29.0 / 30.0, Lane::OnDemand).unwrap();
        assert_eq!(codec.active_tape().unwrap().track().coded_width, 1280);
        assert_eq!(codec.overflow_len(Lane::OnDemand), 0);
        assert!((0..30).all(|frame| codec.decoded_frame(frame).is_some()));
    }
}
