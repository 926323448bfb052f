//! Deterministic virtual-clock run of a [`PlaybackLoop`].
//!
//! Used by the `simulate` command and by tests that need exact frame
//! counts: display refreshes, loader wakeups and diagnostics are replayed
//! in timestamp order without touching a real clock.

use super::machine::{Generation, LoaderAction, PlaybackLoop, PlayerAction};
use super::source::FrameSource;
use crate::schedule::RateCheck;
use serde::Serialize;
use std::time::Duration;
use tapedeck_common::{Direction, PlaybackState, Result};

/// Loader ticks allowed back to back before the clock must advance.
const MAX_LOADER_BURST: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    /// Real display refresh rate.
    pub display_hz: f64,
    pub seconds: f64,
    /// Drop every n-th display callback, as an overloaded display would.
    pub drop_every: Option<u64>,
    /// Calibrate against the display before playing.
    pub calibrate: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            display_hz: 60.0,
            seconds: 10.0,
            drop_every: None,
            calibrate: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SimulationStats {
    pub display_ticks: u64,
    pub dropped_ticks: u64,
    pub frame_changes: u64,
    pub loader_backoffs: u64,
    pub player_deaths: u64,
    pub rate_misses: u64,
    pub safe_mode_entered: bool,
    pub monitor_fps: f64,
    pub final_frame: u64,
    pub finished: bool,
}

pub struct Simulation<S: FrameSource> {
    playback: PlaybackLoop<S>,
    config: SimulationConfig,
}

impl<S: FrameSource> Simulation<S> {
    pub fn new(playback: PlaybackLoop<S>, config: SimulationConfig) -> Self {
        Self { playback, config }
    }

    pub fn playback(&self) -> &PlaybackLoop<S> {
        &self.playback
    }

    pub fn into_inner(self) -> PlaybackLoop<S> {
        self.playback
    }

    /// Play in `direction` until the media ends or the time runs out.
    pub fn run(&mut self, direction: Direction) -> Result<SimulationStats> {
        let tick_ms = 1000.0 / self.config.display_hz;
        let total_ticks = (self.config.seconds * self.config.display_hz).round() as u64;
        let mut stats = SimulationStats::default();

        if self.config.calibrate {
            let samples = self.playback.session_config().playback.calibration_samples;
            let stamps: Vec<f64> = (0..samples).map(|i| i as f64 * tick_ms).collect();
            self.playback.calibrate(&stamps);
        }
        stats.monitor_fps = self.playback.motion().monitor_fps();

        let generation = self.playback.play(direction)?;
        let diag_period = self.playback.session_config().playback.rate_check_interval();
        let diag_ms = diag_period.as_secs_f64() * 1000.0;

        let mut loader_at = Some(0.0_f64);
        let mut diag_at = diag_ms;

        for tick in 0..total_ticks {
            let now = tick as f64 * tick_ms;

            // Loader wakeups due before this refresh.
            while let Some(at) = loader_at {
                if at > now {
                    break;
                }
                loader_at = self.run_loader(generation, at, &mut stats);
            }

            if now >= diag_at {
                let check = self
                    .playback
                    .on_diagnostic_tick(generation, Duration::from_secs_f64(diag_ms / 1000.0));
                match check {
                    Some(RateCheck::Miss(_)) => stats.rate_misses += 1,
                    Some(RateCheck::SafeModeEntered) => {
                        stats.rate_misses += 1;
                        stats.safe_mode_entered = true;
                    }
                    _ => {}
                }
                diag_at += diag_ms;
            }

            if self
                .config
                .drop_every
                .is_some_and(|n| n > 0 && (tick + 1) % n == 0)
            {
                stats.dropped_ticks += 1;
                continue;
            }

            stats.display_ticks += 1;
            match self.playback.on_display_tick(generation, now) {
                PlayerAction::Rearm { shown: Some(_) } => stats.frame_changes += 1,
                PlayerAction::Rearm { shown: None } | PlayerAction::Stale => {}
                PlayerAction::Died => {
                    stats.player_deaths += 1;
                    // The loader retries on its own schedule.
                    loader_at.get_or_insert(now);
                }
                PlayerAction::Finished => {
                    stats.finished = true;
                    break;
                }
            }
        }

        if self.playback.state() != PlaybackState::Stopped {
            self.playback.pause();
        }
        stats.final_frame = self.playback.visible_frame();
        stats.monitor_fps = self.playback.motion().monitor_fps();
        Ok(stats)
    }

    /// One loader wakeup at `at`; returns when it wants to run next.
    fn run_loader(
        &mut self,
        generation: Generation,
        at: f64,
        stats: &mut SimulationStats,
    ) -> Option<f64> {
        for _ in 0..MAX_LOADER_BURST {
            match self.playback.on_loader_tick(generation) {
                LoaderAction::Reschedule { .. } => continue,
                LoaderAction::Backoff { delay, .. } => {
                    stats.loader_backoffs += 1;
                    return Some(at + delay.as_secs_f64() * 1000.0);
                }
                LoaderAction::Finished { .. } | LoaderAction::Stale => return None,
            }
        }
        Some(at + self.playback.motion().frame_interval())
    }
}
