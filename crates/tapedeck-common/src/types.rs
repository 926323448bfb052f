//! Core type definitions for playback direction and loop state.
//!
//! All enums serialize in snake_case so they can travel inside the events the
//! UI layer consumes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of travel of the playback cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Playing toward the end of the media.
    Forward,
    /// Playing toward the start of the media.
    Backward,
    /// Not moving.
    #[default]
    Stopped,
}

impl Direction {
    /// Signed step multiplier: `1`, `-1`, or `0`.
    pub fn sign(self) -> i64 {
        match self {
            Self::Forward => 1,
            Self::Backward => -1,
            Self::Stopped => 0,
        }
    }

    /// Whether the cursor is moving.
    pub fn is_moving(self) -> bool {
        !matches!(self, Self::Stopped)
    }

    /// Opposite direction (stopped stays stopped).
    pub fn reversed(self) -> Self {
        match self {
            Self::Forward => Self::Backward,
            Self::Backward => Self::Forward,
            Self::Stopped => Self::Stopped,
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Self::Stopped => 0,
            Self::Forward => 1,
            Self::Backward => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Forward,
            2 => Self::Backward,
            _ => Self::Stopped,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward => write!(f, "forward"),
            Self::Backward => write!(f, "backward"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// State of the playback loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// No timers armed; the visible frame equals the cursor.
    #[default]
    Stopped,
    /// Waiting for data before the first frame can be shown.
    Loading,
    /// Loader and player callbacks are armed.
    Playing,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Loading => write!(f, "loading"),
            Self::Playing => write!(f, "playing"),
        }
    }
}

/// Packed, lock-free view of a direction for cross-task readers.
#[derive(Debug, Default)]
pub struct AtomicDirection(std::sync::atomic::AtomicU8);

impl AtomicDirection {
    /// Create a new atomic direction.
    pub fn new(direction: Direction) -> Self {
        Self(std::sync::atomic::AtomicU8::new(direction.as_u8()))
    }

    /// Load the current direction.
    pub fn load(&self) -> Direction {
        Direction::from_u8(self.0.load(std::sync::atomic::Ordering::Acquire))
    }

    /// Store a new direction.
    pub fn store(&self, direction: Direction) {
        self.0
            .store(direction.as_u8(), std::sync::atomic::Ordering::Release);
    }
}
