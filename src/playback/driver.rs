//! Tokio timers driving a [`PlaybackLoop`].
//!
//! Three tasks per run: the player ticks at the display interval, the
//! loader fills the frame queue as fast as data allows, and diagnostics
//! wake every rate-check interval. A run ends when its token is cancelled
//! or its generation goes stale.

use super::cursor::CursorCell;
use super::machine::{Generation, GotoOutcome, LoaderAction, PlaybackLoop, PlayerAction};
use super::source::FrameSource;
use parking_lot::Mutex;
use std::sync::Arc;
use tapedeck_common::{Direction, PlaybackState, Result};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

struct Shared<S: FrameSource> {
    playback: Mutex<PlaybackLoop<S>>,
    epoch: Instant,
}

impl<S: FrameSource> Shared<S> {
    fn now_ms(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64() * 1000.0
    }
}

pub struct PlaybackDriver<S: FrameSource + 'static> {
    shared: Arc<Shared<S>>,
    cursor: Arc<CursorCell>,
    run: Mutex<Option<CancellationToken>>,
    shutdown: CancellationToken,
}

impl<S: FrameSource + 'static> PlaybackDriver<S> {
    pub fn new(playback: PlaybackLoop<S>) -> Self {
        let cursor = playback.cursor();
        Self {
            shared: Arc::new(Shared {
                playback: Mutex::new(playback),
                epoch: Instant::now(),
            }),
            cursor,
            run: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn cursor(&self) -> Arc<CursorCell> {
        self.cursor.clone()
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.playback.lock().state()
    }

    /// Run `f` against the loop under its lock.
    pub fn with_loop<R>(&self, f: impl FnOnce(&mut PlaybackLoop<S>) -> R) -> R {
        f(&mut self.shared.playback.lock())
    }

    /// Calibrate the display rate from callback timestamps (ms).
    pub fn calibrate(&self, timestamps_ms: &[f64]) -> f64 {
        self.shared.playback.lock().calibrate(timestamps_ms)
    }

    pub fn play(&self, direction: Direction) -> Result<()> {
        let mut playback = self.shared.playback.lock();
        let before = playback.generation();
        let generation = playback.play(direction)?;
        if generation != before {
            self.start_run(generation);
        }
        Ok(())
    }

    pub fn pause(&self) {
        let mut playback = self.shared.playback.lock();
        playback.pause();
        self.cancel_run();
    }

    pub fn goto_frame(&self, frame: u64) -> Result<GotoOutcome> {
        self.shared.playback.lock().goto_frame(frame)
    }

    pub fn set_rate(&self, factor: f64) -> Result<()> {
        let mut playback = self.shared.playback.lock();
        if let Some(generation) = playback.set_rate(factor)? {
            self.start_run(generation);
        }
        Ok(())
    }

    /// Cancel all timers and stop playback.
    pub fn shutdown(&self) {
        self.pause();
        self.shutdown.cancel();
    }

    // ------------------------------------------------------------------------
    // Timer tasks
    // ------------------------------------------------------------------------

    fn cancel_run(&self) {
        if let Some(token) = self.run.lock().take() {
            token.cancel();
        }
    }

    /// Called with the loop lock held, so no task of the new run can
    /// observe the old token.
    fn start_run(&self, generation: Generation) {
        self.cancel_run();
        let token = self.shutdown.child_token();
        *self.run.lock() = Some(token.clone());

        spawn_player(self.shared.clone(), generation, token.clone());
        spawn_loader(self.shared.clone(), generation, token.clone());
        spawn_diagnostics(self.shared.clone(), generation, token);
    }
}

impl<S: FrameSource + 'static> Drop for PlaybackDriver<S> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn spawn_player<S: FrameSource + 'static>(
    shared: Arc<Shared<S>>,
    generation: Generation,
    token: CancellationToken,
) {
    tokio::spawn(async move {
        let mut period = shared.playback.lock().frame_interval();
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = interval.tick() => {}
            }
            let now = shared.now_ms();
            let (action, current) = {
                let mut playback = shared.playback.lock();
                let action = playback.on_display_tick(generation, now);
                (action, playback.frame_interval())
            };
            // Calibration may have moved the display rate under us.
            if current != period {
                tracing::debug!("Display interval {:?} -> {:?}", period, current);
                period = current;
                interval = tokio::time::interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            }
            match action {
                PlayerAction::Rearm { .. } => {}
                PlayerAction::Died => {
                    tracing::debug!("Player task parked until data arrives");
                    break;
                }
                PlayerAction::Finished | PlayerAction::Stale => break,
            }
        }
    });
}

fn spawn_loader<S: FrameSource + 'static>(
    shared: Arc<Shared<S>>,
    generation: Generation,
    token: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            if token.is_cancelled() {
                break;
            }
            let action = shared.playback.lock().on_loader_tick(generation);
            if action.restart_player() {
                spawn_player(shared.clone(), generation, token.clone());
            }
            match action {
                LoaderAction::Reschedule { .. } => tokio::task::yield_now().await,
                LoaderAction::Backoff { delay, .. } => {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                LoaderAction::Finished { .. } | LoaderAction::Stale => break,
            }
        }
    });
}

fn spawn_diagnostics<S: FrameSource + 'static>(
    shared: Arc<Shared<S>>,
    generation: Generation,
    token: CancellationToken,
) {
    tokio::spawn(async move {
        let period = shared
            .playback
            .lock()
            .session_config()
            .playback
            .rate_check_interval();
        let start = Instant::now() + period;
        let mut interval = tokio::time::interval_at(start, period);
        let mut last = Instant::now();

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = interval.tick() => {}
            }
            let elapsed = last.elapsed();
            last = Instant::now();

            let mut playback = shared.playback.lock();
            if playback.generation() != generation || playback.state() == PlaybackState::Stopped {
                break;
            }
            playback.on_diagnostic_tick(generation, elapsed);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::events::EventBus;
    use crate::playback::InstantSource;
    use std::time::Duration;

    fn driver(frames: u64) -> PlaybackDriver<InstantSource> {
        PlaybackDriver::new(PlaybackLoop::new(
            SessionConfig::new(30.0, frames),
            InstantSource::new(frames),
            Arc::new(EventBus::default()),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_plays_to_end_and_stops() {
        let driver = driver(30);
        driver.play(Direction::Forward).unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(driver.state(), PlaybackState::Stopped);
        assert_eq!(driver.cursor().frame(), 29);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_freezes_cursor() {
        let driver = driver(1000);
        driver.play(Direction::Forward).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        driver.pause();

        let frame = driver.cursor().frame();
        assert!(frame > 0);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(driver.cursor().frame(), frame);
        assert_eq!(driver.state(), PlaybackState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_calibration_retimes_player() {
        let driver = driver(1000);
        driver.play(Direction::Forward).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        // A 30 Hz display shows a 30 fps video on every refresh.
        let stamps: Vec<f64> = (0..20).map(|i| i as f64 * 33.333).collect();
        assert_eq!(driver.calibrate(&stamps), 30.0);
        let before = driver.cursor().frame();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let advanced = driver.cursor().frame() - before;
        assert!((25..=36).contains(&advanced), "advanced {} frames", advanced);
        driver.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_change_keeps_playing() {
        let driver = driver(1000);
        driver.play(Direction::Forward).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        driver.set_rate(2.0).unwrap();
        let before = driver.cursor().frame();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(driver.cursor().frame() > before + 30);
        driver.shutdown();
    }
}
