//! One playback session: a media descriptor, its download worker, a backend
//! and the playback driver, glued together by download events.
//!
//! The session owns the download event receiver. Callers drive it with
//! [`MediaSession::pump`] (or one of the `run_*` helpers); every worker
//! result is routed into the backend and reported on the event bus.

use crate::backend::{Backend, BackendKind, BackendStats, Feed, Ingest, SharedBackend, Timeline};
use crate::codec::{DecoderFactory, HeadlessFactory};
use crate::config::{Config, SessionConfig};
use crate::download::{
    load_index, DownloadEvent, DownloadHandle, DownloadWorker, MediaSource, RangeFetcher,
    SeekDispatch,
};
use crate::events::{ErrorCode, EventBus, PlayerEvent};
use crate::media::MediaDescriptor;
use crate::playback::{CursorCell, GotoOutcome, PlaybackCursor, PlaybackDriver, PlaybackLoop};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tapedeck_common::{Direction, PlaybackState, RequestId, SessionId};
use tapedeck_media::{ByteSpan, SegmentIndex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How a session should be opened.
#[derive(Clone)]
pub struct SessionOptions {
    /// Backend used when the rendition supports random seek.
    pub backend: BackendKind,
    /// Starting rendition; the first one when unset.
    pub rendition: Option<usize>,
    pub decoder_factory: Arc<dyn DecoderFactory>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            backend: BackendKind::Mse,
            rendition: None,
            decoder_factory: Arc::new(HeadlessFactory::default()),
        }
    }
}

/// What a seek request turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekStatus {
    /// The frame was already buffered and is on screen.
    Shown,
    /// Bytes for the frame were requested.
    Fetching(RequestId),
    /// The downloader refused because playback is moving.
    Deferred,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub session: SessionId,
    pub rendition: usize,
    pub state: PlaybackState,
    pub cursor: PlaybackCursor,
    pub buffered_percent: f64,
    pub prefetch_finished: bool,
    pub backend: BackendStats,
}

/// Result of resolving a rendition's index.
struct Opened {
    rendition: usize,
    index: Option<Arc<SegmentIndex>>,
    kind: BackendKind,
}

impl Opened {
    fn compatibility(descriptor: &MediaDescriptor) -> Self {
        Self {
            rendition: descriptor.lowest_rendition(),
            index: None,
            kind: BackendKind::Compatibility,
        }
    }

    fn start_bias(&self) -> f64 {
        self.index.as_ref().map(|i| i.start_bias()).unwrap_or(0.0)
    }
}

pub struct MediaSession {
    id: SessionId,
    config: Config,
    descriptor: MediaDescriptor,
    fetcher: Arc<dyn RangeFetcher>,
    events: Arc<EventBus>,
    options: SessionOptions,
    rendition: usize,
    index: Option<Arc<SegmentIndex>>,
    backend: SharedBackend,
    driver: PlaybackDriver<SharedBackend>,
    worker: Option<DownloadHandle>,
    downloads: Option<mpsc::Receiver<DownloadEvent>>,
    prefetch_buf: Option<usize>,
    prefetch_finished: bool,
    /// First segment not yet stored by sequential prefetch. A resumed
    /// prefetch restarts here.
    next_segment: usize,
    total_bytes: u64,
}

impl MediaSession {
    /// Open a session: resolve the rendition's index, pick a backend and
    /// start the download worker. Prefetch is not started.
    pub async fn load(
        descriptor: MediaDescriptor,
        fetcher: Arc<dyn RangeFetcher>,
        config: Config,
        events: Arc<EventBus>,
        options: SessionOptions,
    ) -> crate::Result<Self> {
        descriptor.validate()?;
        let id = SessionId::new();
        let rendition = options.rendition.unwrap_or(0);
        descriptor.rendition(rendition)?;

        let opened = open_rendition(
            &descriptor,
            fetcher.as_ref(),
            &events,
            rendition,
            options.backend,
        )
        .await?;

        let timeline = Timeline {
            fps: descriptor.fps,
            num_frames: descriptor.num_frames,
            start_bias: opened.start_bias(),
        };
        let backend = SharedBackend::new(
            make_backend(opened.kind, &config, &options, &events, timeline),
            timeline,
        );

        let session_config = SessionConfig::new(descriptor.fps, descriptor.num_frames)
            .with_playback(config.playback.clone());
        let cursor = Arc::new(CursorCell::new(descriptor.fps, timeline.start_bias));
        let playback =
            PlaybackLoop::with_cursor(session_config, backend.clone(), events.clone(), cursor);
        let driver = PlaybackDriver::new(playback);

        info!(
            "Session {} opened rendition {} on the {} backend",
            id, opened.rendition, opened.kind
        );

        let mut session = Self {
            id,
            config,
            descriptor,
            fetcher,
            events,
            options,
            rendition: opened.rendition,
            index: opened.index,
            backend,
            driver,
            worker: None,
            downloads: None,
            prefetch_buf: None,
            prefetch_finished: false,
            next_segment: 0,
            total_bytes: 0,
        };
        session.start_worker();
        Ok(session)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn rendition(&self) -> usize {
        self.rendition
    }

    pub fn descriptor(&self) -> &MediaDescriptor {
        &self.descriptor
    }

    pub fn index(&self) -> Option<&Arc<SegmentIndex>> {
        self.index.as_ref()
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn backend(&self) -> &SharedBackend {
        &self.backend
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    pub fn cursor(&self) -> PlaybackCursor {
        self.driver.cursor().load()
    }

    pub fn state(&self) -> PlaybackState {
        self.driver.state()
    }

    pub fn prefetch_finished(&self) -> bool {
        self.prefetch_finished
    }

    pub fn stats(&self) -> SessionStats {
        let timeline = self.backend.timeline();
        let (buffered_percent, backend) = self
            .backend
            .with(|b| (b.buffered_percent(self.total_bytes, &timeline), b.stats()));
        SessionStats {
            session: self.id,
            rendition: self.rendition,
            state: self.state(),
            cursor: self.cursor(),
            buffered_percent,
            prefetch_finished: self.prefetch_finished,
            backend,
        }
    }

    // ------------------------------------------------------------------------
    // Worker lifecycle
    // ------------------------------------------------------------------------

    fn start_worker(&mut self) {
        let rendition = &self.descriptor.renditions[self.rendition];
        let source = MediaSource {
            url: rendition.url.clone(),
            bit_rate: rendition.bit_rate,
            index: self.index.clone(),
        };
        self.total_bytes = self.index.as_ref().map(|i| i.total_bytes()).unwrap_or(0);
        self.prefetch_finished = false;
        self.prefetch_buf = None;
        self.next_segment = 0;

        let (handle, downloads) = DownloadWorker::spawn(
            self.fetcher.clone(),
            source,
            self.config.download.clone(),
            self.driver.cursor().direction_handle(),
        );
        self.worker = Some(handle);
        // Replacing the receiver discards anything the old worker queued.
        self.downloads = Some(downloads);

        self.events.emit(PlayerEvent::Ready {
            session: self.id,
            rendition: self.rendition,
            frame_count: self.descriptor.num_frames,
            random_seek: self.index.is_some(),
        });
    }

    async fn stop_worker(&mut self) {
        self.downloads = None;
        if let Some(worker) = self.worker.take() {
            worker.shutdown().await;
        }
    }

    fn worker(&self) -> crate::Result<&DownloadHandle> {
        self.worker
            .as_ref()
            .ok_or_else(|| crate::Error::invalid_state("session has no download worker"))
    }

    fn sequential_buf_idx(&self) -> usize {
        self.backend.with(|b| match b {
            Backend::Mse(pool) | Backend::Compatibility(pool) => pool.active().index,
            Backend::WebCodecs(_) => 0,
        })
    }

    fn seek_buf_idx(&self) -> usize {
        self.backend.with(|b| match b {
            Backend::Mse(pool) | Backend::Compatibility(pool) => pool.seek_slot().index,
            Backend::WebCodecs(_) => 1,
        })
    }

    /// Start sequential prefetch into the active buffer, resuming after
    /// the last block that was stored.
    pub fn start_prefetch(&mut self) -> crate::Result<()> {
        let buf_idx = self.sequential_buf_idx();
        let from = self.next_segment;
        self.worker()?.prefetch_from(buf_idx, from)?;
        self.prefetch_buf = Some(buf_idx);
        Ok(())
    }

    /// Stop sequential prefetch. Blocks already queued are still stored.
    pub fn stop_prefetch(&mut self) -> crate::Result<()> {
        self.worker()?.stop_prefetch()?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Download events
    // ------------------------------------------------------------------------

    /// Wait for one download event and route it. Returns `false` once the
    /// worker has gone away.
    pub async fn pump(&mut self) -> crate::Result<bool> {
        let Some(downloads) = self.downloads.as_mut() else {
            return Ok(false);
        };
        match downloads.recv().await {
            Some(event) => {
                self.handle_download(event).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Pump events until sequential prefetch finishes or `timeout` passes.
    /// Returns whether prefetch finished.
    pub async fn run_until_prefetched(&mut self, timeout: Duration) -> crate::Result<bool> {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.prefetch_finished {
            match tokio::time::timeout_at(deadline, self.pump()).await {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => break,
                Ok(Err(e)) => return Err(e),
                Err(_) => break,
            }
        }
        Ok(self.prefetch_finished)
    }

    /// Pump events for `duration` regardless of what arrives.
    pub async fn run_for(&mut self, duration: Duration) -> crate::Result<()> {
        let deadline = tokio::time::Instant::now() + duration;
        loop {
            match tokio::time::timeout_at(deadline, self.pump()).await {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => {
                    tokio::time::sleep_until(deadline).await;
                    return Ok(());
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => return Ok(()),
            }
        }
    }

    pub async fn handle_download(&mut self, event: DownloadEvent) -> crate::Result<()> {
        match event {
            DownloadEvent::Buffer {
                buf_idx,
                data,
                span,
                frames,
                segments,
                init,
            } => self.on_buffer(buf_idx, data, span, frames, segments, init),
            DownloadEvent::SeekResult {
                request,
                buf_idx,
                frame,
                time,
                data,
                span,
            } => {
                debug!("{}: seek data for frame {} ({} bytes)", request, frame, data.len());
                let bytes = data.len() as u64;
                let range = self
                    .index
                    .as_deref()
                    .and_then(|index| frames_in_span(index, span));
                let range = self.backend.timeline().range_for(range);
                self.ingest(Some(buf_idx), Feed::Seek, data, span, range);
                self.events.emit(PlayerEvent::SeekResult {
                    buf_idx,
                    frame,
                    time,
                    bytes,
                });
                // Redraw if the viewer is still parked on the requested frame.
                if self.state() == PlaybackState::Stopped && self.cursor().frame == frame {
                    self.driver.goto_frame(frame)?;
                }
            }
            DownloadEvent::OnDemand {
                direction,
                data,
                span,
                frames,
            } => {
                debug!("On-demand {:?} block {:?} frames {:?}", direction, span, frames);
                let range = self.backend.timeline().range_for(frames);
                self.ingest(None, Feed::OnDemand, data, span, range);
            }
            DownloadEvent::OnDemandFinished { direction } => {
                self.events.emit(PlayerEvent::OnDemandFinished { direction });
            }
            DownloadEvent::Finished { buf_idx } => {
                let remaining = self
                    .index
                    .as_ref()
                    .map(|i| i.len().saturating_sub(self.next_segment))
                    .unwrap_or(0);
                if remaining > 0 {
                    debug!("Prefetch run ended with {} segments unstored", remaining);
                    return Ok(());
                }
                self.prefetch_finished = true;
                self.events.emit(PlayerEvent::Finished { buf_idx });
                self.emit_progress();
            }
            DownloadEvent::Error {
                buf_idx,
                code,
                message,
            } => {
                self.events.emit(PlayerEvent::Error {
                    buf_idx,
                    code,
                    message: message.clone(),
                });
                let prefetch_failed = buf_idx.is_some()
                    && buf_idx == self.prefetch_buf
                    && !self.prefetch_finished
                    && code != ErrorCode::BuffersFull;
                if prefetch_failed {
                    warn!("Prefetch failed ({}), falling back", message);
                    self.fall_back_to_compatibility().await?;
                }
            }
        }
        Ok(())
    }

    fn on_buffer(
        &mut self,
        buf_idx: usize,
        data: bytes::Bytes,
        span: ByteSpan,
        frames: Option<(u64, u64)>,
        segments: Option<(usize, usize)>,
        init: bool,
    ) {
        if let Some((first, _)) = segments {
            if first != self.next_segment {
                debug!(
                    "Skipping block at segment {} from a stopped run, expecting {}",
                    first, self.next_segment
                );
                return;
            }
        }
        let timeline = self.backend.timeline();
        let range = match (timeline.range_for(frames), self.index.is_none()) {
            (Some(range), _) => Some(range),
            // A whole-file download covers the entire timeline.
            (None, true) => {
                self.total_bytes = self.total_bytes.max(span.end);
                Some((timeline.start_bias, timeline.start_bias + timeline.duration()))
            }
            (None, false) => None,
        };
        if init {
            debug!("Init segment arrived with block {:?}", span);
        }
        let bytes = data.len() as u64;
        let (landed, dropped) = self.ingest(Some(buf_idx), Feed::Sequential, data, span, range);
        // A dropped block is fetched again when prefetch resumes.
        if let (Some((_, end)), false) = (segments, dropped) {
            self.next_segment = end;
        }
        if let Some(slot) = landed {
            self.events.emit(PlayerEvent::Buffer {
                buf_idx: slot,
                bytes,
                frames,
            });
            self.emit_progress();
        }
    }

    /// Hand bytes to the backend. Returns the buffer index they landed in
    /// and whether they were dropped for lack of space.
    fn ingest(
        &mut self,
        buf_idx: Option<usize>,
        feed: Feed,
        data: bytes::Bytes,
        span: ByteSpan,
        range: Option<(f64, f64)>,
    ) -> (Option<usize>, bool) {
        match self.backend.with(|b| b.ingest(feed, data, span.start, range)) {
            Ok(Ingest::Stored(slot)) => (Some(slot.map(|s| s.index).or(buf_idx).unwrap_or(0)), false),
            Ok(Ingest::Demuxed(added)) => {
                debug!("{:?} feed demuxed {} new samples", feed, added);
                (Some(buf_idx.unwrap_or(0)), false)
            }
            Ok(Ingest::Dropped { bytes }) => {
                warn!("All buffers full, dropped {} bytes at {:?}", bytes, span);
                self.events.emit(PlayerEvent::error(
                    buf_idx,
                    ErrorCode::BuffersFull,
                    format!("all buffers full, dropped {} bytes", bytes),
                ));
                if feed == Feed::Sequential {
                    if let Some(worker) = self.worker.as_ref() {
                        if let Err(e) = worker.stop_prefetch() {
                            debug!("Could not stop prefetch: {}", e);
                        }
                    }
                }
                (None, true)
            }
            Err(e) => {
                // Decoder failures are reported by the codec pipeline itself.
                warn!("{:?} ingest of {:?} failed: {}", feed, span, e);
                (None, false)
            }
        }
    }

    fn emit_progress(&self) {
        let timeline = self.backend.timeline();
        let percent_complete = self
            .backend
            .with(|b| b.buffered_percent(self.total_bytes, &timeline));
        self.events
            .emit(PlayerEvent::BufferLoaded { percent_complete });
    }

    // ------------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------------

    pub fn play(&mut self, direction: Direction) -> crate::Result<()> {
        self.backend.with(|b| b.set_playing(true));
        self.driver.play(direction)?;
        Ok(())
    }

    pub fn pause(&mut self) {
        self.driver.pause();
        self.backend.with(|b| b.set_playing(false));
    }

    /// Show `frame`, fetching its bytes if they are not buffered.
    pub fn seek(&mut self, frame: u64) -> crate::Result<SeekStatus> {
        if !self.backend.with(|b| b.can_seek()) {
            return Err(crate::Error::invalid_state(
                "random seek is not available on this backend",
            ));
        }
        let time = self.backend.timeline().time_for(frame);
        self.backend.with(|b| b.seek_to(time))?;
        match self.driver.goto_frame(frame)? {
            GotoOutcome::Shown => Ok(SeekStatus::Shown),
            GotoOutcome::NeedsData => {
                let buf_idx = self.seek_buf_idx();
                match self.worker()?.fetch_for_seek(buf_idx, frame, time)? {
                    SeekDispatch::Sent(request) => Ok(SeekStatus::Fetching(request)),
                    SeekDispatch::Pending => Ok(SeekStatus::Deferred),
                }
            }
        }
    }

    pub fn set_rate(&mut self, factor: f64) -> crate::Result<()> {
        if !self.backend.with(|b| b.can_set_rate()) {
            return Err(crate::Error::invalid_state(
                "rate changes are not available on this backend",
            ));
        }
        self.driver.set_rate(factor)?;
        Ok(())
    }

    /// Open an on-demand window for scrubbing from `frame`.
    pub fn start_scrub(&mut self, frame: u64, direction: Direction) -> crate::Result<()> {
        let timeline = self.backend.timeline();
        self.worker()?.on_demand_window(
            direction,
            frame,
            timeline.fps,
            timeline.num_frames.saturating_sub(1),
        )?;
        Ok(())
    }

    /// Request the next on-demand chunk as the scrub position moves.
    pub fn scrub_to(&mut self, frame: u64, direction: Direction) -> crate::Result<()> {
        self.worker()?.on_demand_download(frame, direction)?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Rendition changes
    // ------------------------------------------------------------------------

    /// Switch to another rendition, keeping the cursor and resuming
    /// playback if it was running.
    pub async fn switch_rendition(&mut self, rendition: usize) -> crate::Result<()> {
        self.descriptor.rendition(rendition)?;
        let (state, direction) = self.driver.with_loop(|l| (l.state(), l.direction()));
        info!("Switching rendition {} -> {}", self.rendition, rendition);

        self.pause();
        self.stop_worker().await;

        let opened = open_rendition(
            &self.descriptor,
            self.fetcher.as_ref(),
            &self.events,
            rendition,
            self.options.backend,
        )
        .await?;
        self.install(opened);

        self.start_worker();
        self.start_prefetch()?;
        if state != PlaybackState::Stopped && direction.is_moving() {
            self.play(direction)?;
        }
        Ok(())
    }

    async fn fall_back_to_compatibility(&mut self) -> crate::Result<()> {
        if self.backend.kind() == BackendKind::Compatibility {
            return Ok(());
        }
        self.pause();
        self.stop_worker().await;
        self.install(Opened::compatibility(&self.descriptor));
        self.start_worker();
        self.start_prefetch()
    }

    /// Reset the backend for `opened`, swapping it when the kind changes.
    fn install(&mut self, opened: Opened) {
        let mut timeline = self.backend.timeline();
        timeline.start_bias = opened.start_bias();
        self.backend.set_timeline(timeline);

        if self.backend.kind() == opened.kind {
            self.backend.with(|b| b.reset(timeline.start_bias));
        } else {
            let backend =
                make_backend(opened.kind, &self.config, &self.options, &self.events, timeline);
            self.backend.replace(backend);
        }
        self.rendition = opened.rendition;
        self.index = opened.index;
    }

    /// Stop playback, cancel downloads and wait for the worker to exit.
    pub async fn shutdown(mut self) {
        self.driver.shutdown();
        self.stop_worker().await;
        info!("Session {} closed", self.id);
    }
}

/// Load `rendition`'s index and decide which backend can play it.
async fn open_rendition(
    descriptor: &MediaDescriptor,
    fetcher: &dyn RangeFetcher,
    events: &EventBus,
    rendition: usize,
    preferred: BackendKind,
) -> crate::Result<Opened> {
    let r = descriptor.rendition(rendition)?;
    if preferred == BackendKind::Compatibility {
        return Ok(Opened {
            rendition,
            index: None,
            kind: BackendKind::Compatibility,
        });
    }
    let Some(url) = r.segment_index_url.as_deref() else {
        info!("Rendition {} has no segment index, using compatibility mode", rendition);
        return Ok(Opened::compatibility(descriptor));
    };

    match load_index(fetcher, url).await {
        Ok(index) if index.supports_random_seek() => Ok(Opened {
            rendition,
            index: Some(Arc::new(index)),
            kind: preferred,
        }),
        Ok(index) => {
            info!(
                "Segment index version {} has no frame spans, using compatibility mode",
                index.format_version()
            );
            Ok(Opened::compatibility(descriptor))
        }
        Err(e) if e.is_malformed_index() => {
            events.emit(PlayerEvent::error(None, ErrorCode::MalformedIndex, e.to_string()));
            Err(e.into())
        }
        Err(e) => {
            warn!("Could not load segment index {}: {}", url, e);
            Ok(Opened::compatibility(descriptor))
        }
    }
}

fn make_backend(
    kind: BackendKind,
    config: &Config,
    options: &SessionOptions,
    events: &Arc<EventBus>,
    timeline: Timeline,
) -> Backend {
    match kind {
        BackendKind::Mse => Backend::mse(&config.buffer),
        BackendKind::WebCodecs => Backend::web_codecs(
            options.decoder_factory.clone(),
            &config.codec,
            events.clone(),
            timeline,
        ),
        BackendKind::Compatibility => Backend::compatibility(),
    }
}

/// Frames `[start, end)` carried by the fragments inside `span`.
fn frames_in_span(index: &SegmentIndex, span: ByteSpan) -> Option<(u64, u64)> {
    index
        .segments()
        .iter()
        .filter(|s| s.frame_samples > 0 && s.byte_offset >= span.start && s.byte_offset < span.end)
        .fold(None, |acc, s| match acc {
            None => Some((s.frame_start, s.frame_end())),
            Some((start, end)) => Some((start.min(s.frame_start), end.max(s.frame_end()))),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapedeck_media::fmp4::SyntheticVideo;

    #[test]
    fn test_frames_in_span() {
        let media = SyntheticVideo::new(30.0, 90).gop_len(30).frag_len(10).build().unwrap();
        let index = &media.index;
        let m = index.find_segment_for_frame(42, Direction::Stopped).unwrap();
        let span = index.seek_range(&m);
        assert_eq!(frames_in_span(index, span), Some((30, 50)));
        assert_eq!(frames_in_span(index, ByteSpan::new(0, 1)), None);
    }
}
