//! Motion compensation: mapping video frames onto display refreshes.
//!
//! The display calls back once per refresh. A video at 24 fps on a 60 Hz
//! display cannot change frame on every callback, nor on a fixed every-Nth
//! one, so updates follow a three-slot pattern `[regular, large, regular]`
//! whose `large` slot absorbs the fractional remainder.
//!
//! When the realized frame rate stays below target for three rate checks in
//! a row the scheduler enters safe mode for good, halving its update rate.

pub mod calibrate;

use crate::config::PlaybackConfig;
use serde::Serialize;
use std::collections::VecDeque;

/// Starting (and maximum) rate-check score.
pub const MAX_FPS_SCORE: u8 = 3;

/// Most refreshes one schedule slot may span. Very slow rates hold each
/// frame for this many refreshes instead of overflowing the pattern.
pub const MAX_SLOT_REFRESHES: f64 = 1_000_000.0;

/// Snapshot of the current schedule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScheduleState {
    pub monitor_fps: f64,
    /// Milliseconds between display refreshes.
    pub frame_interval: f64,
    pub update_slot_pattern: [u32; 3],
    pub updates_at: [u32; 3],
    pub length_of_schedule: u32,
    pub target_fps: f64,
    pub safe_mode: bool,
    pub fps_score: u8,
}

/// Outcome of [`MotionComp::periodic_rate_check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateCheck {
    /// Realized rate met the threshold.
    Healthy,
    /// Below threshold; the score dropped to the contained value.
    Miss(u8),
    /// This check tripped safe mode.
    SafeModeEntered,
    /// Already in safe mode; nothing changes any more.
    SafeMode,
}

#[derive(Debug, Clone)]
pub struct MotionComp {
    monitor_fps: f64,
    pattern: [u32; 3],
    updates_at: [u32; 3],
    length: u32,
    video_fps: f64,
    rate: f64,
    safe_mode: bool,
    fps_score: u8,
    threshold: f64,
    window: VecDeque<f64>,
    window_len: usize,
}

impl MotionComp {
    pub fn new(config: &PlaybackConfig) -> Self {
        let mut mc = Self {
            monitor_fps: config.default_monitor_fps,
            pattern: [1, 1, 1],
            updates_at: [0, 1, 2],
            length: 3,
            video_fps: config.default_monitor_fps,
            rate: 1.0,
            safe_mode: false,
            fps_score: MAX_FPS_SCORE,
            threshold: config.safe_mode_threshold,
            window: VecDeque::with_capacity(config.calibration_samples),
            window_len: config.calibration_samples.max(2),
        };
        mc.compute_schedule(mc.video_fps, 1.0);
        mc
    }

    pub fn monitor_fps(&self) -> f64 {
        self.monitor_fps
    }

    /// Milliseconds between display refreshes.
    pub fn frame_interval(&self) -> f64 {
        1000.0 / self.monitor_fps
    }

    pub fn safe_mode(&self) -> bool {
        self.safe_mode
    }

    pub fn fps_score(&self) -> u8 {
        self.fps_score
    }

    /// Frames per second the schedule is aiming for.
    pub fn target_fps(&self) -> f64 {
        self.video_fps * self.rate
    }

    pub fn state(&self) -> ScheduleState {
        ScheduleState {
            monitor_fps: self.monitor_fps,
            frame_interval: self.frame_interval(),
            update_slot_pattern: self.pattern,
            updates_at: self.updates_at,
            length_of_schedule: self.length,
            target_fps: self.target_fps(),
            safe_mode: self.safe_mode,
            fps_score: self.fps_score,
        }
    }

    /// Set the monitor rate from display callback timestamps (ms) and
    /// recompute the schedule. Returns the monitor rate in effect.
    pub fn calibrate(&mut self, timestamps_ms: &[f64]) -> f64 {
        match calibrate::estimate_refresh_rate(timestamps_ms) {
            Some(fps) if fps != self.monitor_fps => {
                tracing::info!("Display calibrated at {} Hz (was {})", fps, self.monitor_fps);
                self.monitor_fps = fps;
                self.compute_schedule(self.video_fps, self.rate);
            }
            Some(_) => {}
            None => tracing::debug!(
                "Calibration with {} timestamps inconclusive, keeping {} Hz",
                timestamps_ms.len(),
                self.monitor_fps
            ),
        }
        self.monitor_fps
    }

    /// Record a display callback for periodic recalibration.
    pub fn observe_display_tick(&mut self, timestamp_ms: f64) {
        if self.window.len() == self.window_len {
            self.window.pop_front();
        }
        self.window.push_back(timestamp_ms);
    }

    /// Recalibrate from the rolling window of observed display ticks.
    pub fn recalibrate(&mut self) -> f64 {
        let stamps: Vec<f64> = self.window.iter().copied().collect();
        self.calibrate(&stamps)
    }

    /// Derive the update pattern for `video_fps` played at `rate_factor`.
    pub fn compute_schedule(&mut self, video_fps: f64, rate_factor: f64) -> ScheduleState {
        self.video_fps = video_fps;
        self.rate = rate_factor;

        let effective = video_fps * rate_factor.min(1.0);
        let mut cycles = if effective > 0.0 {
            self.monitor_fps / effective
        } else {
            1.0
        };
        if self.safe_mode {
            cycles *= 2.0;
        }
        if cycles < 1.0 {
            // More frames than refreshes: frame_increment skips frames and
            // every refresh shows one.
            cycles *= (effective / self.monitor_fps).ceil();
        }
        if cycles > MAX_SLOT_REFRESHES {
            tracing::debug!("Clamping {} refreshes per slot to {}", cycles, MAX_SLOT_REFRESHES);
            cycles = MAX_SLOT_REFRESHES;
        }

        let regular = (cycles.floor() as u32).max(1);
        let remainder = (cycles - regular as f64).max(0.0);
        let large = (regular + (remainder * 3.0).round() as u32).max(1);

        self.pattern = [regular, large, regular];
        self.updates_at = [0, regular, regular + large];
        self.length = regular * 2 + large;

        tracing::debug!(
            "Schedule for {} fps x{} at {} Hz: pattern {:?}, length {}{}",
            video_fps,
            rate_factor,
            self.monitor_fps,
            self.pattern,
            self.length,
            if self.safe_mode { " (safe mode)" } else { "" }
        );
        self.state()
    }

    /// Whether the display callback numbered `animation_index` should show
    /// a new frame.
    pub fn time_to_update(&self, animation_index: u64) -> bool {
        let pos = (animation_index % self.length as u64) as u32;
        self.updates_at.contains(&pos)
    }

    /// Frames to advance per update.
    pub fn frame_increment(&self, video_fps: f64, rate_factor: f64) -> u64 {
        let per_refresh = (video_fps / self.monitor_fps).ceil().max(1.0);
        let mut increment = per_refresh * rate_factor.max(1.0);
        if self.safe_mode {
            increment *= 2.0;
        }
        (increment.round() as u64).max(1)
    }

    /// Score one rate check. Three consecutive misses trip safe mode, which
    /// is never left again.
    pub fn periodic_rate_check(&mut self, realized_fps: f64) -> RateCheck {
        if self.safe_mode {
            return RateCheck::SafeMode;
        }
        let target = self.target_fps();
        if realized_fps >= self.threshold * target {
            self.fps_score = (self.fps_score + 1).min(MAX_FPS_SCORE);
            return RateCheck::Healthy;
        }

        self.fps_score = self.fps_score.saturating_sub(1);
        tracing::debug!(
            "Rate check missed: {:.1} fps against target {:.1}, score {}",
            realized_fps,
            target,
            self.fps_score
        );
        if self.fps_score > 0 {
            return RateCheck::Miss(self.fps_score);
        }

        tracing::warn!(
            "Entering safe mode: realized {:.1} fps, target {:.1}",
            realized_fps,
            target
        );
        self.safe_mode = true;
        self.compute_schedule(self.video_fps, self.rate);
        RateCheck::SafeModeEntered
    }
}

impl Default for MotionComp {
    fn default() -> Self {
        Self::new(&PlaybackConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mc(monitor: f64) -> MotionComp {
        MotionComp::new(&PlaybackConfig {
            default_monitor_fps: monitor,
            ..PlaybackConfig::default()
        })
    }

    fn updates_per(mc: &MotionComp, ticks: u64) -> usize {
        (0..ticks).filter(|&i| mc.time_to_update(i)).count()
    }

    #[test]
    fn test_30_on_60() {
        let mut mc = mc(60.0);
        let state = mc.compute_schedule(30.0, 1.0);
        assert_eq!(state.update_slot_pattern, [2, 2, 2]);
        assert_eq!(state.updates_at, [0, 2, 4]);
        assert_eq!(state.length_of_schedule, 6);
        assert_eq!(updates_per(&mc, 600), 300);
        assert_eq!(mc.frame_increment(30.0, 1.0), 1);
    }

    #[test]
    fn test_tiny_rate_clamps_slot_length() {
        let mut mc = mc(60.0);
        for rate in [1e-12, f64::MIN_POSITIVE] {
            let state = mc.compute_schedule(30.0, rate);
            let regular = MAX_SLOT_REFRESHES as u32;
            assert_eq!(state.update_slot_pattern, [regular, regular, regular]);
            assert_eq!(state.length_of_schedule, regular * 3);
            assert!(mc.time_to_update(0));
            assert!(!mc.time_to_update(1));
        }

        mc.safe_mode = true;
        let state = mc.compute_schedule(30.0, 1e-12);
        let sum: u32 = state.update_slot_pattern.iter().sum();
        assert_eq!(sum, state.length_of_schedule);
    }

    #[test]
    fn test_24_on_60_uses_large_slot() {
        let mut mc = mc(60.0);
        let state = mc.compute_schedule(24.0, 1.0);
        assert_eq!(state.update_slot_pattern, [2, 4, 2]);
        assert_eq!(state.updates_at, [0, 2, 6]);
        assert_eq!(state.length_of_schedule, 8);
    }

    #[test]
    fn test_60_on_60_updates_every_tick() {
        let mut mc = mc(60.0);
        mc.compute_schedule(60.0, 1.0);
        assert_eq!(updates_per(&mc, 60), 60);
    }

    #[test]
    fn test_fast_video_skips_frames() {
        let mut mc = mc(60.0);
        let state = mc.compute_schedule(120.0, 1.0);
        assert_eq!(state.length_of_schedule, 3);
        assert_eq!(updates_per(&mc, 60), 60);
        assert_eq!(mc.frame_increment(120.0, 1.0), 2);
    }

    #[test]
    fn test_slow_rate_stretches_schedule() {
        let mut mc = mc(60.0);
        let state = mc.compute_schedule(30.0, 0.5);
        assert_eq!(state.update_slot_pattern, [4, 4, 4]);
        assert_eq!(mc.frame_increment(30.0, 0.5), 1);
        assert_eq!(mc.frame_increment(30.0, 2.0), 2);
    }

    #[test]
    fn test_safe_mode_after_three_misses() {
        let mut mc = mc(60.0);
        mc.compute_schedule(30.0, 1.0);
        assert_eq!(mc.periodic_rate_check(10.0), RateCheck::Miss(2));
        assert_eq!(mc.periodic_rate_check(10.0), RateCheck::Miss(1));
        assert_eq!(mc.periodic_rate_check(10.0), RateCheck::SafeModeEntered);
        assert!(mc.safe_mode());

        // Cycles double: 4 refreshes per update, two frames per update.
        assert_eq!(mc.state().update_slot_pattern, [4, 4, 4]);
        assert_eq!(mc.frame_increment(30.0, 1.0), 2);

        // Irreversible.
        assert_eq!(mc.periodic_rate_check(30.0), RateCheck::SafeMode);
        assert!(mc.safe_mode());
    }

    #[test]
    fn test_recovery_caps_score() {
        let mut mc = mc(60.0);
        mc.compute_schedule(30.0, 1.0);
        assert_eq!(mc.periodic_rate_check(10.0), RateCheck::Miss(2));
        assert_eq!(mc.periodic_rate_check(29.0), RateCheck::Healthy);
        assert_eq!(mc.fps_score(), 3);
        assert_eq!(mc.periodic_rate_check(29.0), RateCheck::Healthy);
        assert_eq!(mc.fps_score(), 3);
        // Threshold is 0.9 * 30 = 27.
        assert_eq!(mc.periodic_rate_check(27.5), RateCheck::Healthy);
        assert_eq!(mc.periodic_rate_check(26.5), RateCheck::Miss(2));
    }

    #[test]
    fn test_calibration_recomputes_schedule() {
        let mut mc = mc(60.0);
        mc.compute_schedule(30.0, 1.0);
        let stamps: Vec<f64> = (0..20).map(|i| i as f64 * 8.333).collect();
        assert_eq!(mc.calibrate(&stamps), 120.0);
        assert_eq!(mc.state().update_slot_pattern, [4, 4, 4]);
        assert!((mc.frame_interval() - 8.333).abs() < 0.01);
    }

    #[test]
    fn test_rolling_window_recalibration() {
        let mut mc = MotionComp::default();
        for i in 0..100 {
            mc.observe_display_tick(i as f64 * 33.333);
        }
        assert_eq!(mc.recalibrate(), 30.0);
    }
}
