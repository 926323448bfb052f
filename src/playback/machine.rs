use super::cursor::CursorCell;
use super::source::{FrameQueue, FrameSource, LoadResult, LoadedFrame};
use crate::config::SessionConfig;
use crate::events::{EventBus, PlayerEvent};
use crate::schedule::{MotionComp, RateCheck};
use std::sync::Arc;
use std::time::Duration;
use tapedeck_common::{Direction, Error, PlaybackState, Result};

/// Token identifying the timers of one playback run.
///
/// Every state transition issues a new one; work scheduled under an older
/// token is stale and must do nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

/// What the loader should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoaderAction {
    /// Tick again right away.
    Reschedule { restart_player: bool },
    /// Tick again after `delay`.
    Backoff {
        delay: Duration,
        restart_player: bool,
    },
    /// Nothing left to load in this direction.
    Finished { restart_player: bool },
    Stale,
}

impl LoaderAction {
    pub fn restart_player(&self) -> bool {
        match self {
            Self::Reschedule { restart_player }
            | Self::Backoff { restart_player, .. }
            | Self::Finished { restart_player } => *restart_player,
            Self::Stale => false,
        }
    }
}

/// What the player should do after a display tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerAction {
    /// Keep receiving display ticks. `shown` is the frame made visible.
    Rearm { shown: Option<u64> },
    /// Starved; stop until the loader restarts the player.
    Died,
    /// Reached the end of the media and stopped.
    Finished,
    Stale,
}

/// Outcome of [`PlaybackLoop::goto_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GotoOutcome {
    Shown,
    /// The frame's data must be fetched first.
    NeedsData,
}

/// Counters feeding the diagnostic tick.
#[derive(Debug, Clone, Copy, Default)]
struct Diagnostics {
    frames_advanced: u64,
    frames_loaded: u64,
    display_ticks: u64,
}

/// Loader + player + diagnostics state machine over a frame source.
///
/// All methods are synchronous; timing lives in the driver (tokio tasks)
/// or the simulation (virtual clock).
pub struct PlaybackLoop<S: FrameSource> {
    session: SessionConfig,
    mc: MotionComp,
    source: S,
    cursor: Arc<CursorCell>,
    events: Arc<EventBus>,
    state: PlaybackState,
    direction: Direction,
    rate: f64,
    generation: u64,
    queue: FrameQueue,
    /// Visible frame.
    visible: u64,
    /// Last frame handed to the queue.
    load_cursor: u64,
    animation_index: u64,
    player_alive: bool,
    load_finished: bool,
    diag: Diagnostics,
}

impl<S: FrameSource> PlaybackLoop<S> {
    pub fn new(session: SessionConfig, source: S, events: Arc<EventBus>) -> Self {
        Self::with_cursor(
            session.clone(),
            source,
            events,
            Arc::new(CursorCell::new(session.video_fps, 0.0)),
        )
    }

    pub fn with_cursor(
        session: SessionConfig,
        source: S,
        events: Arc<EventBus>,
        cursor: Arc<CursorCell>,
    ) -> Self {
        let mut mc = MotionComp::new(&session.playback);
        mc.compute_schedule(session.video_fps, 1.0);
        let queue = FrameQueue::new(session.playback.frame_queue_depth);
        Self {
            session,
            mc,
            source,
            cursor,
            events,
            state: PlaybackState::Stopped,
            direction: Direction::Stopped,
            rate: 1.0,
            generation: 0,
            queue,
            visible: 0,
            load_cursor: 0,
            animation_index: 0,
            player_alive: false,
            load_finished: false,
            diag: Diagnostics::default(),
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn session_config(&self) -> &SessionConfig {
        &self.session
    }

    pub fn generation(&self) -> Generation {
        Generation(self.generation)
    }

    pub fn cursor(&self) -> Arc<CursorCell> {
        self.cursor.clone()
    }

    pub fn visible_frame(&self) -> u64 {
        self.visible
    }

    pub fn motion(&self) -> &MotionComp {
        &self.mc
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn player_alive(&self) -> bool {
        self.player_alive
    }

    /// Milliseconds between display refreshes.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(self.mc.frame_interval() / 1000.0)
    }

    fn loader_backoff(&self) -> Duration {
        self.frame_interval() * self.session.playback.loader_backoff_intervals
    }

    fn is_current(&self, generation: Generation) -> bool {
        generation.0 == self.generation && self.state != PlaybackState::Stopped
    }

    fn bump(&mut self) -> Generation {
        self.generation += 1;
        Generation(self.generation)
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state == state {
            return;
        }
        tracing::debug!("Playback {:?} -> {:?} ({:?})", self.state, state, self.direction);
        self.state = state;
        self.events.emit(PlayerEvent::StateChange {
            state,
            direction: self.direction,
        });
    }

    fn time_for(&self, frame: u64) -> f64 {
        self.cursor.time_for(frame)
    }

    /// Calibrate the display rate from callback timestamps (ms).
    pub fn calibrate(&mut self, timestamps_ms: &[f64]) -> f64 {
        let monitor = self.mc.calibrate(timestamps_ms);
        self.mc.compute_schedule(self.session.video_fps, self.rate);
        monitor
    }

    /// Start playing in `direction` from the visible frame.
    pub fn play(&mut self, direction: Direction) -> Result<Generation> {
        if !direction.is_moving() {
            return Err(Error::invalid_input("play needs a direction"));
        }
        if self.state != PlaybackState::Stopped && self.direction == direction {
            return Ok(self.generation());
        }

        let generation = self.bump();
        self.direction = direction;
        self.cursor.set_direction(direction);
        self.queue.clear();
        self.load_cursor = self.visible;
        self.load_finished = false;
        self.animation_index = 0;
        self.player_alive = true;
        self.diag = Diagnostics::default();
        self.mc.compute_schedule(self.session.video_fps, self.rate);

        self.set_state(PlaybackState::Loading);
        tracing::info!(
            "Play {:?} from frame {} at x{}",
            direction,
            self.visible,
            self.rate
        );
        Ok(generation)
    }

    /// Stop playback, leaving the cursor on the visible frame, and redraw it.
    pub fn pause(&mut self) -> Generation {
        let generation = self.bump();
        self.direction = Direction::Stopped;
        self.cursor.set_direction(Direction::Stopped);
        self.cursor.set_frame(self.visible);
        self.queue.clear();
        self.player_alive = false;
        self.set_state(PlaybackState::Stopped);

        let time = self.time_for(self.visible);
        if let LoadResult::Loaded(frame) = self.source.load(self.visible, time) {
            self.source.draw(frame);
        }
        generation
    }

    /// Jump to `frame`. Only allowed while stopped.
    pub fn goto_frame(&mut self, frame: u64) -> Result<GotoOutcome> {
        if self.state != PlaybackState::Stopped {
            return Err(Error::invalid_state(format!(
                "goto_frame({}) while {:?}",
                frame, self.state
            )));
        }
        if frame >= self.session.num_frames {
            return Err(Error::invalid_input(format!(
                "frame {} beyond last frame {}",
                frame,
                self.session.last_frame()
            )));
        }

        self.visible = frame;
        self.load_cursor = frame;
        self.cursor.set_frame(frame);
        let time = self.time_for(frame);
        self.events.emit(PlayerEvent::FrameChange { frame, time });

        match self.source.load(frame, time) {
            LoadResult::Loaded(loaded) => {
                self.source.draw(loaded);
                Ok(GotoOutcome::Shown)
            }
            LoadResult::NotBuffered | LoadResult::OutOfRange => Ok(GotoOutcome::NeedsData),
        }
    }

    /// Change the playback rate. Returns the new generation when running
    /// timers must be restarted.
    pub fn set_rate(&mut self, factor: f64) -> Result<Option<Generation>> {
        if !(factor.is_finite() && factor > 0.0) {
            return Err(Error::invalid_input(format!("invalid rate {}", factor)));
        }
        self.rate = factor;
        self.mc.compute_schedule(self.session.video_fps, factor);
        if self.state == PlaybackState::Stopped {
            return Ok(None);
        }
        self.animation_index = 0;
        Ok(Some(self.bump()))
    }

    fn next_load_frame(&self) -> Option<u64> {
        let increment = self.mc.frame_increment(self.session.video_fps, self.rate);
        match self.direction {
            Direction::Forward => {
                let next = self.load_cursor + increment;
                if next <= self.session.last_frame() {
                    Some(next)
                } else if self.load_cursor < self.session.last_frame() {
                    // Land exactly on the last frame.
                    Some(self.session.last_frame())
                } else {
                    None
                }
            }
            Direction::Backward => {
                if self.load_cursor == 0 {
                    None
                } else {
                    Some(self.load_cursor.saturating_sub(increment))
                }
            }
            Direction::Stopped => None,
        }
    }

    fn should_restart_player(&mut self) -> bool {
        if self.player_alive || self.queue.is_empty() {
            return false;
        }
        self.player_alive = true;
        tracing::debug!("Restarting player at frame {}", self.visible);
        true
    }

    /// Load the next frame into the off-screen queue.
    pub fn on_loader_tick(&mut self, generation: Generation) -> LoaderAction {
        if !self.is_current(generation) {
            return LoaderAction::Stale;
        }
        if self.load_finished {
            return LoaderAction::Finished {
                restart_player: self.should_restart_player(),
            };
        }
        if !self.queue.has_room() {
            return LoaderAction::Backoff {
                delay: self.loader_backoff(),
                restart_player: self.should_restart_player(),
            };
        }

        let Some(next) = self.next_load_frame() else {
            self.load_finished = true;
            return LoaderAction::Finished {
                restart_player: self.should_restart_player(),
            };
        };

        match self.source.load(next, self.time_for(next)) {
            LoadResult::Loaded(frame) => {
                self.queue.push(frame);
                self.load_cursor = next;
                self.diag.frames_loaded += 1;
                LoaderAction::Reschedule {
                    restart_player: self.should_restart_player(),
                }
            }
            LoadResult::NotBuffered => LoaderAction::Backoff {
                delay: self.loader_backoff(),
                restart_player: self.should_restart_player(),
            },
            LoadResult::OutOfRange => {
                self.load_finished = true;
                LoaderAction::Finished {
                    restart_player: self.should_restart_player(),
                }
            }
        }
    }

    /// Handle one display refresh at `now_ms`.
    pub fn on_display_tick(&mut self, generation: Generation, now_ms: f64) -> PlayerAction {
        if !self.is_current(generation) || !self.player_alive {
            return PlayerAction::Stale;
        }
        self.mc.observe_display_tick(now_ms);
        self.diag.display_ticks += 1;

        let index = self.animation_index;
        if !self.mc.time_to_update(index) {
            self.animation_index += 1;
            return PlayerAction::Rearm { shown: None };
        }

        match self.queue.pop() {
            Some(frame) => {
                self.animation_index += 1;
                self.diag.frames_advanced += frame.frame.abs_diff(self.visible);
                self.visible = frame.frame;
                self.cursor.set_frame(frame.frame);
                self.source.draw(frame);
                self.events.emit(PlayerEvent::FrameChange {
                    frame: frame.frame,
                    time: frame.time,
                });
                self.set_state(PlaybackState::Playing);
                PlayerAction::Rearm {
                    shown: Some(frame.frame),
                }
            }
            None if self.load_finished => {
                tracing::info!("Reached end of media at frame {}", self.visible);
                self.pause();
                PlayerAction::Finished
            }
            None => {
                // Keep the update slot for when data arrives.
                if self.source.can_play(self.load_cursor, self.time_for(self.load_cursor), self.direction) {
                    return PlayerAction::Rearm { shown: None };
                }
                tracing::debug!("Player starved at frame {}", self.visible);
                self.player_alive = false;
                self.set_state(PlaybackState::Loading);
                PlayerAction::Died
            }
        }
    }

    /// Periodic diagnostics over the last `elapsed`: realized rate against
    /// target, feeding the safe-mode check and display recalibration.
    pub fn on_diagnostic_tick(&mut self, generation: Generation, elapsed: Duration) -> Option<RateCheck> {
        if !self.is_current(generation) {
            return None;
        }
        let diag = std::mem::take(&mut self.diag);
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return None;
        }

        self.mc.recalibrate();

        let realized = diag.frames_advanced as f64 / secs;
        let load_fps = diag.frames_loaded as f64 / secs;
        let display_fps = diag.display_ticks as f64 / secs;
        tracing::debug!(
            "Diagnostics: realized {:.1} fps, loaded {:.1} fps, display {:.1} Hz, target {:.1}",
            realized,
            load_fps,
            display_fps,
            self.mc.target_fps()
        );

        // Buffering is not a display problem.
        if self.state != PlaybackState::Playing {
            return None;
        }

        let check = self.mc.periodic_rate_check(realized);
        if check == RateCheck::SafeModeEntered {
            self.events.emit(PlayerEvent::SafeMode {
                target_fps: self.mc.target_fps(),
                realized_fps: realized,
            });
        }
        Some(check)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::InstantSource;
    use assert_matches::assert_matches;

    fn playback(frames: u64) -> PlaybackLoop<InstantSource> {
        PlaybackLoop::new(
            SessionConfig::new(30.0, frames),
            InstantSource::new(frames),
            Arc::new(EventBus::default()),
        )
    }

    #[test]
    fn test_stale_generation_is_ignored() {
        let mut pl = playback(100);
        let old = pl.play(Direction::Forward).unwrap();
        pl.pause();
        assert_eq!(pl.on_loader_tick(old), LoaderAction::Stale);
        assert_eq!(pl.on_display_tick(old, 0.0), PlayerAction::Stale);
        assert!(pl.on_diagnostic_tick(old, Duration::from_secs(2)).is_none());
    }

    #[test]
    fn test_loader_fills_queue_then_backs_off() {
        let mut pl = playback(100);
        let generation = pl.play(Direction::Forward).unwrap();
        for _ in 0..4 {
            assert_matches!(pl.on_loader_tick(generation), LoaderAction::Reschedule { .. });
        }
        let LoaderAction::Backoff { delay, .. } = pl.on_loader_tick(generation) else {
            panic!("expected backoff");
        };
        // Four display intervals at 60 Hz.
        assert_eq!(delay.as_millis(), 66);
    }

    #[test]
    fn test_player_shows_frames_on_schedule() {
        let mut pl = playback(100);
        let generation = pl.play(Direction::Forward).unwrap();
        pl.on_loader_tick(generation);
        pl.on_loader_tick(generation);

        assert_eq!(pl.on_display_tick(generation, 0.0), PlayerAction::Rearm { shown: Some(1) });
        assert_eq!(pl.state(), PlaybackState::Playing);
        assert_eq!(pl.on_display_tick(generation, 16.7), PlayerAction::Rearm { shown: None });
        assert_eq!(pl.on_display_tick(generation, 33.3), PlayerAction::Rearm { shown: Some(2) });
        assert_eq!(pl.cursor().frame(), 2);
    }

    #[test]
    fn test_pause_redraws_visible_frame() {
        let mut pl = playback(100);
        let generation = pl.play(Direction::Forward).unwrap();
        pl.on_loader_tick(generation);
        pl.on_loader_tick(generation);
        pl.on_display_tick(generation, 0.0);

        pl.pause();
        assert_eq!(pl.state(), PlaybackState::Stopped);
        assert_eq!(pl.cursor().load().frame, 1);
        assert_eq!(pl.cursor().direction(), Direction::Stopped);
        assert_eq!(pl.source().drawn, vec![1, 1]);
    }

    #[test]
    fn test_goto_only_when_stopped() {
        let mut pl = playback(100);
        assert_eq!(pl.goto_frame(50).unwrap(), GotoOutcome::Shown);
        assert_eq!(pl.visible_frame(), 50);
        assert!(pl.goto_frame(100).is_err());

        pl.play(Direction::Backward).unwrap();
        assert!(pl.goto_frame(10).is_err());
    }

    #[test]
    fn test_goto_unbuffered_needs_data() {
        let mut pl = PlaybackLoop::new(
            SessionConfig::new(30.0, 100),
            InstantSource::new(100).available_below(10),
            Arc::new(EventBus::default()),
        );
        assert_eq!(pl.goto_frame(50).unwrap(), GotoOutcome::NeedsData);
    }

    #[test]
    fn test_player_dies_and_loader_restarts_it() {
        let mut pl = PlaybackLoop::new(
            SessionConfig::new(30.0, 100),
            InstantSource::new(100).available_below(2),
            Arc::new(EventBus::default()),
        );
        let generation = pl.play(Direction::Forward).unwrap();
        assert_matches!(pl.on_loader_tick(generation), LoaderAction::Reschedule { .. });
        assert_matches!(pl.on_loader_tick(generation), LoaderAction::Backoff { .. });

        assert_eq!(pl.on_display_tick(generation, 0.0), PlayerAction::Rearm { shown: Some(1) });
        pl.on_display_tick(generation, 16.7);
        assert_eq!(pl.on_display_tick(generation, 33.3), PlayerAction::Died);
        assert_eq!(pl.state(), PlaybackState::Loading);

        pl.source_mut().make_available(None);
        assert_eq!(
            pl.on_loader_tick(generation),
            LoaderAction::Reschedule { restart_player: true }
        );
        assert!(pl.player_alive());
    }

    #[test]
    fn test_backward_stops_at_zero() {
        let mut pl = playback(10);
        pl.goto_frame(2).unwrap();
        let generation = pl.play(Direction::Backward).unwrap();
        assert_matches!(pl.on_loader_tick(generation), LoaderAction::Reschedule { .. });
        assert_matches!(pl.on_loader_tick(generation), LoaderAction::Reschedule { .. });
        assert_matches!(pl.on_loader_tick(generation), LoaderAction::Finished { .. });

        let mut shown = Vec::new();
        for tick in 0..10 {
            match pl.on_display_tick(generation, tick as f64 * 16.7) {
                PlayerAction::Rearm { shown: Some(f) } => shown.push(f),
                PlayerAction::Finished => break,
                _ => {}
            }
        }
        assert_eq!(shown, vec![1, 0]);
        assert_eq!(pl.state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_set_rate_bumps_generation_while_playing() {
        let mut pl = playback(100);
        assert_eq!(pl.set_rate(2.0).unwrap(), None);
        let generation = pl.play(Direction::Forward).unwrap();
        let next = pl.set_rate(0.5).unwrap().unwrap();
        assert!(next > generation);
        assert!(pl.set_rate(0.0).is_err());
        assert_eq!(pl.on_loader_tick(generation), LoaderAction::Stale);
    }

    #[test]
    fn test_vanishing_rate_holds_frame() {
        let mut pl = playback(100);
        pl.play(Direction::Forward).unwrap();
        let generation = pl.set_rate(1e-12).unwrap().unwrap();
        assert_matches!(pl.on_loader_tick(generation), LoaderAction::Reschedule { .. });
        let shown = (0..10)
            .filter(|&tick| {
                matches!(
                    pl.on_display_tick(generation, tick as f64 * 16.7),
                    PlayerAction::Rearm { shown: Some(_) }
                )
            })
            .count();
        assert_eq!(shown, 1);
    }

    #[test]
    fn test_diagnostics_trip_safe_mode() {
        let events = Arc::new(EventBus::default());
        let mut rx = events.subscribe();
        let mut pl = PlaybackLoop::new(
            SessionConfig::new(30.0, 1000),
            InstantSource::new(1000),
            events,
        );
        let generation = pl.play(Direction::Forward).unwrap();
        pl.on_loader_tick(generation);
        pl.on_display_tick(generation, 0.0);
        assert_eq!(pl.state(), PlaybackState::Playing);

        // One frame per two seconds is far below 30 fps.
        for _ in 0..3 {
            pl.on_diagnostic_tick(generation, Duration::from_secs(2));
        }
        assert!(pl.motion().safe_mode());

        let mut saw_safe_mode = false;
        while let Ok(event) = rx.try_recv() {
            saw_safe_mode |= matches!(event, PlayerEvent::SafeMode { .. });
        }
        assert!(saw_safe_mode);
    }
}
