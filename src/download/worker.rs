//! Download worker task.
//!
//! The worker owns every in-flight fetch for one rendition. Callers talk to
//! it through a [`DownloadHandle`]; results, including failures, come back
//! only as [`DownloadEvent`] messages on a bounded channel, which also
//! throttles sequential prefetch when the consumer falls behind.

use super::on_demand::{OnDemandStep, OnDemandWindow, WindowParams};
use super::{DownloadError, RangeFetcher};
use crate::config::DownloadConfig;
use crate::events::ErrorCode;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tapedeck_common::{AtomicDirection, Direction, RequestId};
use tapedeck_media::{ByteSpan, SegmentBlock, SegmentIndex};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

/// Sequential blocks fetched ahead of the one being delivered.
const PREFETCH_PIPELINE_DEPTH: usize = 2;

/// Next segment sequential prefetch will fetch, stamped with the prefetch
/// run allowed to move it.
#[derive(Debug, Default)]
struct FillCursor {
    run: u64,
    segment: usize,
}

#[derive(Debug, Default, Clone)]
struct SharedFillCursor(Arc<Mutex<FillCursor>>);

impl SharedFillCursor {
    fn lock(&self) -> parking_lot::MutexGuard<'_, FillCursor> {
        self.0.lock()
    }

    fn advance(&self, run: u64, segment: usize) {
        let mut cursor = self.0.lock();
        if cursor.run == run {
            cursor.segment = segment;
        }
    }
}

/// The remote media a worker downloads from.
#[derive(Debug, Clone)]
pub struct MediaSource {
    pub url: String,
    /// Bits per second, used to size sequential blocks.
    pub bit_rate: u64,
    /// Without an index the whole file is fetched at once.
    pub index: Option<Arc<SegmentIndex>>,
}

/// Requests accepted by the worker.
#[derive(Debug, Clone)]
pub enum DownloadCommand {
    Prefetch {
        buf_idx: usize,
        /// Segment to restart from; `None` continues from the fill cursor.
        from: Option<usize>,
    },
    StopPrefetch,
    Seek {
        request: RequestId,
        buf_idx: usize,
        frame: u64,
        time: f64,
    },
    OnDemandStart {
        direction: Direction,
        frame: u64,
        fps: f64,
        max_frame: u64,
    },
    OnDemandDownload {
        frame: u64,
        direction: Direction,
    },
    Shutdown,
}

/// Results posted by the worker.
#[derive(Debug, Clone)]
pub enum DownloadEvent {
    /// A sequential block arrived.
    Buffer {
        buf_idx: usize,
        data: Bytes,
        span: ByteSpan,
        frames: Option<(u64, u64)>,
        /// Segment indices `[first, end)`; `None` for a whole-file fetch.
        segments: Option<(usize, usize)>,
        /// The block begins with the `ftyp`/`moov` boxes.
        init: bool,
    },
    SeekResult {
        request: RequestId,
        buf_idx: usize,
        frame: u64,
        time: f64,
        data: Bytes,
        span: ByteSpan,
    },
    OnDemand {
        direction: Direction,
        data: Bytes,
        span: ByteSpan,
        frames: Option<(u64, u64)>,
    },
    OnDemandFinished {
        direction: Direction,
    },
    Finished {
        buf_idx: usize,
    },
    Error {
        buf_idx: Option<usize>,
        code: ErrorCode,
        message: String,
    },
}

impl DownloadEvent {
    fn error(buf_idx: Option<usize>, e: &DownloadError) -> Self {
        Self::Error {
            buf_idx,
            code: e.code(),
            message: e.to_string(),
        }
    }
}

/// Outcome of [`DownloadHandle::fetch_for_seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekDispatch {
    Sent(RequestId),
    /// Playback is moving; nothing was sent.
    Pending,
}

// ---------------------------------------------------------------------------
// DownloadHandle
// ---------------------------------------------------------------------------

/// Caller side of a running [`DownloadWorker`].
pub struct DownloadHandle {
    commands: mpsc::UnboundedSender<DownloadCommand>,
    direction: Arc<AtomicDirection>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    fill_cursor: SharedFillCursor,
}

impl DownloadHandle {
    fn send(&self, command: DownloadCommand) -> Result<(), DownloadError> {
        self.commands
            .send(command)
            .map_err(|_| DownloadError::WorkerGone)
    }

    /// Start pipelined sequential downloads from the fill cursor.
    pub fn prefetch_sequential(&self, buf_idx: usize) -> Result<(), DownloadError> {
        self.send(DownloadCommand::Prefetch { buf_idx, from: None })
    }

    /// Start sequential downloads at `segment`, replacing any running
    /// prefetch. Used to refetch blocks the consumer could not store.
    pub fn prefetch_from(&self, buf_idx: usize, segment: usize) -> Result<(), DownloadError> {
        self.send(DownloadCommand::Prefetch {
            buf_idx,
            from: Some(segment),
        })
    }

    pub fn stop_prefetch(&self) -> Result<(), DownloadError> {
        self.send(DownloadCommand::StopPrefetch)
    }

    /// Fetch the bytes needed to show `frame`.
    ///
    /// Refused while the playback cursor is moving.
    pub fn fetch_for_seek(
        &self,
        buf_idx: usize,
        frame: u64,
        time: f64,
    ) -> Result<SeekDispatch, DownloadError> {
        if self.direction.load() != Direction::Stopped {
            tracing::debug!("Seek to frame {} deferred: playback is moving", frame);
            return Ok(SeekDispatch::Pending);
        }
        let request = RequestId::next();
        self.send(DownloadCommand::Seek {
            request,
            buf_idx,
            frame,
            time,
        })?;
        Ok(SeekDispatch::Sent(request))
    }

    /// Open a new on-demand window for scrubbing.
    pub fn on_demand_window(
        &self,
        direction: Direction,
        frame: u64,
        fps: f64,
        max_frame: u64,
    ) -> Result<(), DownloadError> {
        self.send(DownloadCommand::OnDemandStart {
            direction,
            frame,
            fps,
            max_frame,
        })
    }

    /// Pull the next on-demand chunk for a scrub at `frame`.
    pub fn on_demand_download(&self, frame: u64, direction: Direction) -> Result<(), DownloadError> {
        self.send(DownloadCommand::OnDemandDownload { frame, direction })
    }

    /// Next segment sequential prefetch will fetch.
    pub fn fill_cursor(&self) -> usize {
        self.fill_cursor.lock().segment
    }

    /// Stop the worker, cancel its fetches, and wait for it to exit.
    pub async fn shutdown(mut self) {
        let _ = self.commands.send(DownloadCommand::Shutdown);
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Download worker ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for DownloadHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// DownloadWorker
// ---------------------------------------------------------------------------

pub struct DownloadWorker {
    fetcher: Arc<dyn RangeFetcher>,
    source: MediaSource,
    config: DownloadConfig,
    events: mpsc::Sender<DownloadEvent>,
    cancel: CancellationToken,
    prefetch: Option<CancellationToken>,
    seek: Option<CancellationToken>,
    on_demand: Option<(OnDemandWindow, CancellationToken)>,
    fill_cursor: SharedFillCursor,
    tasks: JoinSet<()>,
}

impl DownloadWorker {
    /// Spawn a worker on the current runtime.
    ///
    /// `direction` is the playback cursor's direction, consulted by the
    /// handle's seek gate.
    pub fn spawn(
        fetcher: Arc<dyn RangeFetcher>,
        source: MediaSource,
        config: DownloadConfig,
        direction: Arc<AtomicDirection>,
    ) -> (DownloadHandle, mpsc::Receiver<DownloadEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity.max(1));
        let cancel = CancellationToken::new();
        let fill_cursor = SharedFillCursor::default();

        let worker = Self {
            fetcher,
            source,
            config,
            events: event_tx,
            cancel: cancel.clone(),
            prefetch: None,
            seek: None,
            on_demand: None,
            fill_cursor: fill_cursor.clone(),
            tasks: JoinSet::new(),
        };
        let task = tokio::spawn(worker.run(command_rx));

        let handle = DownloadHandle {
            commands: command_tx,
            direction,
            cancel,
            task: Some(task),
            fill_cursor,
        };
        (handle, event_rx)
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<DownloadCommand>) {
        tracing::debug!("Download worker started for {}", self.source.url);
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                command = commands.recv() => match command {
                    None | Some(DownloadCommand::Shutdown) => break,
                    Some(command) => self.handle(command),
                },
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            tracing::error!("Download task panicked: {}", e);
                        }
                    }
                }
            }
        }

        self.cancel.cancel();
        self.tasks.shutdown().await;
        tracing::debug!("Download worker stopped for {}", self.source.url);
    }

    fn handle(&mut self, command: DownloadCommand) {
        tracing::trace!(?command, "download command");
        match command {
            DownloadCommand::Prefetch { buf_idx, from } => self.start_prefetch(buf_idx, from),
            DownloadCommand::StopPrefetch => {
                if let Some(token) = self.prefetch.take() {
                    token.cancel();
                }
                self.fill_cursor.lock().run += 1;
            }
            DownloadCommand::Seek {
                request,
                buf_idx,
                frame,
                time,
            } => self.start_seek(request, buf_idx, frame, time),
            DownloadCommand::OnDemandStart {
                direction,
                frame,
                fps,
                max_frame,
            } => self.open_window(direction, frame, fps, max_frame),
            DownloadCommand::OnDemandDownload { frame, direction } => {
                self.on_demand_download(frame, direction)
            }
            DownloadCommand::Shutdown => self.cancel.cancel(),
        }
    }

    fn block_budget(&self) -> u64 {
        self.config.block_budget(self.source.bit_rate)
    }

    /// Post an event from a child task so the command loop never blocks on
    /// a full channel.
    fn post(&mut self, event: DownloadEvent) {
        let events = self.events.clone();
        let cancel = self.cancel.clone();
        self.tasks.spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                _ = events.send(event) => {}
            }
        });
    }

    // -- Sequential prefetch -------------------------------------------------

    fn start_prefetch(&mut self, buf_idx: usize, from: Option<usize>) {
        if let Some(old) = self.prefetch.take() {
            old.cancel();
        }
        let run = {
            let mut cursor = self.fill_cursor.lock();
            cursor.run += 1;
            if let Some(segment) = from {
                cursor.segment = segment;
            }
            cursor.run
        };
        let token = self.cancel.child_token();
        self.prefetch = Some(token.clone());

        let fetcher = self.fetcher.clone();
        let source = self.source.clone();
        let budget = self.block_budget();
        let fill_cursor = self.fill_cursor.clone();
        let events = self.events.clone();

        self.tasks.spawn(async move {
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => Err(DownloadError::Cancelled),
                r = prefetch(fetcher, &source, budget, buf_idx, &fill_cursor, run, &events) => r,
            };
            let event = match result {
                Ok(()) => {
                    tracing::info!("Prefetch of {} finished", source.url);
                    DownloadEvent::Finished { buf_idx }
                }
                Err(DownloadError::Cancelled) => {
                    tracing::debug!("Prefetch of {} cancelled", source.url);
                    return;
                }
                Err(DownloadError::WorkerGone) => return,
                Err(e) => {
                    tracing::warn!("Prefetch of {} failed: {}", source.url, e);
                    DownloadEvent::error(Some(buf_idx), &e)
                }
            };
            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                _ = events.send(event) => {}
            }
        });
    }

    // -- Seek ----------------------------------------------------------------

    fn start_seek(&mut self, request: RequestId, buf_idx: usize, frame: u64, time: f64) {
        let span = match self.seek_span(frame) {
            Ok(span) => span,
            Err(message) => {
                tracing::warn!("{} {}: {}", request, frame, message);
                self.post(DownloadEvent::Error {
                    buf_idx: Some(buf_idx),
                    code: ErrorCode::Internal,
                    message,
                });
                return;
            }
        };

        // A newer seek supersedes any still in flight.
        if let Some(old) = self.seek.take() {
            old.cancel();
        }
        let token = self.cancel.child_token();
        self.seek = Some(token.clone());

        let fetcher = self.fetcher.clone();
        let url = self.source.url.clone();
        let events = self.events.clone();
        tracing::debug!("{}: seek to frame {} fetching {:?}", request, frame, span);

        self.tasks.spawn(async move {
            let event = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                r = fetcher.fetch_range(&url, span) => match r {
                    Ok(data) => DownloadEvent::SeekResult { request, buf_idx, frame, time, data, span },
                    Err(e) => {
                        tracing::warn!("{}: seek fetch failed: {}", request, e);
                        DownloadEvent::error(Some(buf_idx), &e)
                    }
                },
            };
            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                _ = events.send(event) => {}
            }
        });
    }

    fn seek_span(&self, frame: u64) -> Result<ByteSpan, String> {
        let index = self
            .source
            .index
            .as_ref()
            .ok_or_else(|| "random seek needs a segment index".to_string())?;
        let m = index
            .find_segment_for_frame(frame, Direction::Stopped)
            .ok_or_else(|| format!("frame {} is not covered by the segment index", frame))?;
        Ok(index.seek_range(&m))
    }

    // -- On-demand -----------------------------------------------------------

    fn open_window(&mut self, direction: Direction, frame: u64, fps: f64, max_frame: u64) {
        if let Some((_, token)) = self.on_demand.take() {
            token.cancel();
        }
        let Some(index) = self.source.index.clone() else {
            tracing::debug!("On-demand downloads need a segment index");
            return;
        };
        let params = WindowParams {
            fps,
            max_frame,
            lookbehind_secs: self.config.on_demand_lookbehind_secs,
            lookahead_secs: self.config.on_demand_lookahead_secs,
            budget: self.block_budget(),
        };
        let window = OnDemandWindow::new(index, direction, frame, params);
        self.on_demand = Some((window, self.cancel.child_token()));
    }

    fn on_demand_download(&mut self, frame: u64, direction: Direction) {
        let reopen = match &self.on_demand {
            Some((window, _)) => window.direction() != direction,
            None => false,
        };
        if reopen {
            if let Some(params) = self.on_demand.as_ref().map(|(w, _)| w.params()) {
                self.open_window(direction, frame, params.fps, params.max_frame);
            }
        }

        let Some((window, token)) = self.on_demand.as_mut() else {
            tracing::debug!("On-demand download at {} without a window", frame);
            return;
        };
        let step = window.next_step(frame);
        let token = token.clone();
        match step {
            OnDemandStep::Fetch(block) => self.fetch_on_demand(direction, block, token),
            OnDemandStep::Finished => {
                tracing::debug!("On-demand {:?} reached the end of the media", direction);
                self.post(DownloadEvent::OnDemandFinished { direction });
            }
            OnDemandStep::Pause | OnDemandStep::Idle => {}
        }
    }

    fn fetch_on_demand(&mut self, direction: Direction, block: SegmentBlock, token: CancellationToken) {
        let fetcher = self.fetcher.clone();
        let url = self.source.url.clone();
        let events = self.events.clone();
        self.tasks.spawn(async move {
            let event = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                r = fetcher.fetch_range(&url, block.span) => match r {
                    Ok(data) => DownloadEvent::OnDemand {
                        direction,
                        data,
                        span: block.span,
                        frames: block.frames,
                    },
                    Err(e) => {
                        tracing::warn!("On-demand fetch {:?} failed: {}", block.span, e);
                        DownloadEvent::error(None, &e)
                    }
                },
            };
            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                _ = events.send(event) => {}
            }
        });
    }
}

/// Fetch sequential blocks from the fill cursor to the end of the media.
async fn prefetch(
    fetcher: Arc<dyn RangeFetcher>,
    source: &MediaSource,
    budget: u64,
    buf_idx: usize,
    fill_cursor: &SharedFillCursor,
    run: u64,
    events: &mpsc::Sender<DownloadEvent>,
) -> Result<(), DownloadError> {
    let Some(index) = source.index.as_deref() else {
        let data = fetcher.fetch_all(&source.url).await?;
        let span = ByteSpan::new(0, data.len() as u64);
        tracing::debug!("Fetched whole file {} ({} bytes)", source.url, data.len());
        return events
            .send(DownloadEvent::Buffer {
                buf_idx,
                data,
                span,
                frames: None,
                segments: None,
                init: true,
            })
            .await
            .map_err(|_| DownloadError::WorkerGone);
    };

    let first_media = index.first_media_segment();
    let mut blocks = Vec::new();
    let start = fill_cursor.lock().segment;
    let mut next = start;
    while let Some(block) = index.next_block(next, budget) {
        next = block.end;
        blocks.push(block);
    }
    tracing::debug!(
        "Prefetching {} blocks of {} from segment {}",
        blocks.len(),
        source.url,
        start
    );

    let mut fetches = futures::stream::iter(blocks.into_iter().map(|block| {
        let fetcher = fetcher.clone();
        let url = source.url.clone();
        async move {
            let data = fetcher.fetch_range(&url, block.span).await?;
            Ok::<_, DownloadError>((block, data))
        }
    }))
    .buffered(PREFETCH_PIPELINE_DEPTH);

    while let Some(result) = fetches.next().await {
        let (block, data) = result?;
        events
            .send(DownloadEvent::Buffer {
                buf_idx,
                data,
                span: block.span,
                frames: block.frames,
                segments: Some((block.first, block.end)),
                init: block.first < first_media,
            })
            .await
            .map_err(|_| DownloadError::WorkerGone)?;
        // Only a delivered block moves the cursor, and only for the run
        // that still owns it.
        fill_cursor.advance(run, block.end);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::StaticFetcher;
    use assert_matches::assert_matches;
    use tapedeck_media::fmp4::SyntheticVideo;
    use std::time::Duration;

    const URL: &str = "mem://video.mp4";

    fn setup(direction: Direction, with_index: bool) -> (DownloadHandle, mpsc::Receiver<DownloadEvent>, u64) {
        let config = DownloadConfig {
            min_block_bytes: 1,
            ..DownloadConfig::default()
        };
        setup_with(direction, with_index, config)
    }

    fn setup_with(
        direction: Direction,
        with_index: bool,
        config: DownloadConfig,
    ) -> (DownloadHandle, mpsc::Receiver<DownloadEvent>, u64) {
        let media = SyntheticVideo::new(30.0, 90).gop_len(30).frag_len(10).build().unwrap();
        let fetcher = StaticFetcher::new();
        fetcher.insert(URL, media.bytes.clone());
        let total = media.bytes.len() as u64;
        let source = MediaSource {
            url: URL.to_string(),
            bit_rate: 0,
            index: with_index.then(|| Arc::new(media.index)),
        };
        let (handle, events) = DownloadWorker::spawn(
            Arc::new(fetcher),
            source,
            config,
            Arc::new(AtomicDirection::new(direction)),
        );
        (handle, events, total)
    }

    #[tokio::test]
    async fn test_prefetch_delivers_every_byte_in_order() {
        let (handle, mut events, total) = setup(Direction::Stopped, true);
        handle.prefetch_sequential(0).unwrap();

        let mut next_byte = 0;
        let mut saw_init = false;
        loop {
            match events.recv().await.unwrap() {
                DownloadEvent::Buffer { span, data, init, .. } => {
                    assert_eq!(span.start, next_byte);
                    assert_eq!(data.len() as u64, span.len());
                    saw_init |= init;
                    next_byte = span.end;
                }
                DownloadEvent::Finished { buf_idx } => {
                    assert_eq!(buf_idx, 0);
                    break;
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert!(saw_init);
        assert_eq!(next_byte, total);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_stopped_prefetch_resumes_without_gaps() {
        let config = DownloadConfig {
            min_block_bytes: 1,
            event_channel_capacity: 1,
            ..DownloadConfig::default()
        };
        let (handle, mut events, total) = setup_with(Direction::Stopped, true, config);
        handle.prefetch_sequential(0).unwrap();

        // Blocks may repeat across the restart but must never skip bytes.
        let mut covered = 0;
        let mut take = |span: ByteSpan| {
            assert!(span.start <= covered, "gap from {} to {}", covered, span.start);
            covered = covered.max(span.end);
        };
        for _ in 0..2 {
            match events.recv().await.unwrap() {
                DownloadEvent::Buffer { span, .. } => take(span),
                other => panic!("unexpected event {:?}", other),
            }
        }
        handle.stop_prefetch().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        while let Ok(event) = events.try_recv() {
            match event {
                DownloadEvent::Buffer { span, .. } => take(span),
                other => panic!("unexpected event {:?}", other),
            }
        }

        handle.prefetch_sequential(0).unwrap();
        let mut last_segment = 0;
        loop {
            match events.recv().await.unwrap() {
                DownloadEvent::Buffer { span, segments, .. } => {
                    take(span);
                    last_segment = segments.unwrap().1;
                }
                DownloadEvent::Finished { .. } => break,
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(covered, total);
        assert_eq!(handle.fill_cursor(), last_segment);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_prefetch_from_restarts_at_segment() {
        let (handle, mut events, _) = setup(Direction::Stopped, true);
        handle.prefetch_from(0, 4).unwrap();
        assert_matches!(
            events.recv().await.unwrap(),
            DownloadEvent::Buffer { segments: Some((4, _)), init: false, .. }
        );
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_compatibility_mode_fetches_whole_file() {
        let (handle, mut events, total) = setup(Direction::Stopped, false);
        handle.prefetch_sequential(0).unwrap();
        assert_matches!(
            events.recv().await.unwrap(),
            DownloadEvent::Buffer { span, init: true, .. } if span.len() == total
        );
        assert_matches!(events.recv().await.unwrap(), DownloadEvent::Finished { buf_idx: 0 });
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_seek_gate() {
        let (handle, _events, _) = setup(Direction::Forward, true);
        assert_eq!(handle.fetch_for_seek(30, 45, 1.5).unwrap(), SeekDispatch::Pending);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_seek_fetches_gop() {
        let (handle, mut events, _) = setup(Direction::Stopped, true);
        let dispatch = handle.fetch_for_seek(30, 45, 1.5).unwrap();
        let SeekDispatch::Sent(sent) = dispatch else {
            panic!("seek was not sent");
        };
        match events.recv().await.unwrap() {
            DownloadEvent::SeekResult {
                request,
                frame,
                data,
                span,
                ..
            } => {
                assert_eq!(request, sent);
                assert_eq!(frame, 45);
                assert_eq!(data.len() as u64, span.len());
            }
            other => panic!("unexpected event {:?}", other),
        }
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_seek_without_index_reports_error() {
        let (handle, mut events, _) = setup(Direction::Stopped, false);
        handle.fetch_for_seek(30, 10, 0.3).unwrap();
        assert_matches!(
            events.recv().await.unwrap(),
            DownloadEvent::Error { buf_idx: Some(30), code: ErrorCode::Internal, .. }
        );
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_on_demand_reports_end_of_media() {
        let (handle, mut events, _) = setup(Direction::Stopped, true);
        handle.on_demand_window(Direction::Forward, 89, 30.0, 89).unwrap();
        // Nine 10-frame fragments, then the end of the media.
        for _ in 0..12 {
            handle.on_demand_download(89, Direction::Forward).unwrap();
        }
        let mut finished = 0;
        let mut chunks = 0;
        while finished == 0 {
            match events.recv().await.unwrap() {
                DownloadEvent::OnDemand { direction, .. } => {
                    assert_eq!(direction, Direction::Forward);
                    chunks += 1;
                }
                DownloadEvent::OnDemandFinished { direction } => {
                    assert_eq!(direction, Direction::Forward);
                    finished += 1;
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert!(chunks >= 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_commands_after_shutdown_fail() {
        let (handle, _events, _) = setup(Direction::Stopped, true);
        let commands = handle.commands.clone();
        handle.shutdown().await;
        assert!(commands.send(DownloadCommand::StopPrefetch).is_err());
    }
}
