use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub download: DownloadConfig,

    #[serde(default)]
    pub buffer: BufferConfig,

    #[serde(default)]
    pub playback: PlaybackConfig,

    #[serde(default)]
    pub codec: CodecConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DownloadConfig {
    /// Per-request timeout for ranged fetches
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Retries after the first attempt for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Lower bound on a sequential block, in bytes
    #[serde(default = "default_min_block_bytes")]
    pub min_block_bytes: u64,

    /// Seconds of media per sequential block at the rendition bitrate
    #[serde(default = "default_block_seconds")]
    pub block_seconds: u64,

    /// How far behind the scrub target an on-demand window starts
    #[serde(default = "default_lookbehind")]
    pub on_demand_lookbehind_secs: f64,

    /// How far ahead of the scrub position on-demand downloads may run
    #[serde(default = "default_lookahead")]
    pub on_demand_lookahead_secs: f64,

    /// Capacity of the worker's outgoing event channel
    #[serde(default = "default_event_capacity")]
    pub event_channel_capacity: usize,

    /// Sent as `Authorization: Bearer <token>` when present
    #[serde(default)]
    pub bearer_token: Option<String>,
}

fn default_request_timeout() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_initial_backoff() -> u64 {
    100
}
fn default_max_backoff() -> u64 {
    5000
}
fn default_min_block_bytes() -> u64 {
    1024 * 1024
}
fn default_block_seconds() -> u64 {
    16
}
fn default_lookbehind() -> f64 {
    2.0
}
fn default_lookahead() -> f64 {
    8.0
}
fn default_event_capacity() -> usize {
    8
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            min_block_bytes: default_min_block_bytes(),
            block_seconds: default_block_seconds(),
            on_demand_lookbehind_secs: default_lookbehind(),
            on_demand_lookahead_secs: default_lookahead(),
            event_channel_capacity: default_event_capacity(),
            bearer_token: None,
        }
    }
}

impl DownloadConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Byte budget of one sequential block for a rendition of `bit_rate`
    /// bits per second.
    pub fn block_budget(&self, bit_rate: u64) -> u64 {
        let by_rate = bit_rate / 8 * self.block_seconds;
        self.min_block_bytes.max(by_rate)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BufferConfig {
    /// Number of regular slots, not counting the seek slot
    #[serde(default = "default_slot_count")]
    pub slot_count: usize,

    #[serde(default = "default_slot_capacity")]
    pub slot_capacity_bytes: u64,
}

fn default_slot_count() -> usize {
    30
}
fn default_slot_capacity() -> u64 {
    64 * 1024 * 1024
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            slot_count: default_slot_count(),
            slot_capacity_bytes: default_slot_capacity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PlaybackConfig {
    /// Display rate assumed until calibration completes
    #[serde(default = "default_monitor_fps")]
    pub default_monitor_fps: f64,

    #[serde(default = "default_rate_check_interval")]
    pub rate_check_interval_ms: u64,

    /// Display timestamps collected for a calibration
    #[serde(default = "default_calibration_samples")]
    pub calibration_samples: usize,

    /// Decoded frames the loader may hold ahead of the player
    #[serde(default = "default_frame_queue_depth")]
    pub frame_queue_depth: usize,

    /// Fraction of the target rate below which a rate check counts as a miss
    #[serde(default = "default_safe_mode_threshold")]
    pub safe_mode_threshold: f64,

    /// Loader backoff, in frame intervals, when the queue is full
    #[serde(default = "default_loader_backoff")]
    pub loader_backoff_intervals: u32,
}

fn default_monitor_fps() -> f64 {
    60.0
}
fn default_rate_check_interval() -> u64 {
    2000
}
fn default_calibration_samples() -> usize {
    20
}
fn default_frame_queue_depth() -> usize {
    4
}
fn default_safe_mode_threshold() -> f64 {
    0.9
}
fn default_loader_backoff() -> u32 {
    4
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            default_monitor_fps: default_monitor_fps(),
            rate_check_interval_ms: default_rate_check_interval(),
            calibration_samples: default_calibration_samples(),
            frame_queue_depth: default_frame_queue_depth(),
            safe_mode_threshold: default_safe_mode_threshold(),
            loader_backoff_intervals: default_loader_backoff(),
        }
    }
}

impl PlaybackConfig {
    pub fn rate_check_interval(&self) -> Duration {
        Duration::from_millis(self.rate_check_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CodecConfig {
    /// Maximum chunks submitted to a decoder without a returned frame
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Submission window around the cursor, in frame deltas, while paused
    #[serde(default = "default_decode_window")]
    pub decode_window_deltas: u32,

    /// Frames the headless decoder holds back before emitting output
    #[serde(default)]
    pub hold_back: usize,
}

fn default_max_in_flight() -> usize {
    8
}
fn default_decode_window() -> u32 {
    25
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            decode_window_deltas: default_decode_window(),
            hold_back: 0,
        }
    }
}

/// Per-media parameters handed to the scheduler and the playback loop.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub video_fps: f64,
    pub num_frames: u64,
    pub playback: PlaybackConfig,
}

impl SessionConfig {
    pub fn new(video_fps: f64, num_frames: u64) -> Self {
        Self {
            video_fps,
            num_frames,
            playback: PlaybackConfig::default(),
        }
    }

    pub fn with_playback(mut self, playback: PlaybackConfig) -> Self {
        self.playback = playback;
        self
    }

    /// Highest valid frame number.
    pub fn last_frame(&self) -> u64 {
        self.num_frames.saturating_sub(1)
    }

    /// Media duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.video_fps <= 0.0 {
            return 0.0;
        }
        self.num_frames as f64 / self.video_fps
    }
}
