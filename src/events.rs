//! Player event system.
//!
//! [`EventBus`] wraps a `tokio::sync::broadcast` channel with a bounded
//! ring-buffer of recent events so that a UI attaching late can catch up on
//! what the session already reported.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tapedeck_common::{Direction, PlaybackState, SessionId};
use tokio::sync::broadcast;

/// Maximum number of events retained in the ring buffer.
const MAX_RECENT_EVENTS: usize = 100;

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Classification carried by [`PlayerEvent::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Transport failure (connection refused, reset, DNS).
    Network,
    /// Request exceeded its timeout.
    Timeout,
    /// Server answered with a non-success status.
    HttpStatus,
    /// Segment index cannot be used; fatal to the session.
    MalformedIndex,
    /// Every buffer slot is full; the write was dropped.
    BuffersFull,
    /// Decoder failure that could not be recovered.
    Decode,
    /// Anything else.
    Internal,
}

// ---------------------------------------------------------------------------
// PlayerEvent
// ---------------------------------------------------------------------------

/// Events emitted by the playback core for the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayerEvent {
    // -- Loading -------------------------------------------------------------
    Ready {
        session: SessionId,
        rendition: usize,
        frame_count: u64,
        random_seek: bool,
    },
    Buffer {
        buf_idx: usize,
        bytes: u64,
        frames: Option<(u64, u64)>,
    },
    SeekResult {
        buf_idx: usize,
        frame: u64,
        time: f64,
        bytes: u64,
    },
    Finished {
        buf_idx: usize,
    },
    OnDemandFinished {
        direction: Direction,
    },
    BufferLoaded {
        percent_complete: f64,
    },
    Error {
        buf_idx: Option<usize>,
        code: ErrorCode,
        message: String,
    },

    // -- Playback ------------------------------------------------------------
    FrameChange {
        frame: u64,
        time: f64,
    },
    SafeMode {
        target_fps: f64,
        realized_fps: f64,
    },
    StateChange {
        state: PlaybackState,
        direction: Direction,
    },
}

impl PlayerEvent {
    /// Create an Error event.
    pub fn error(buf_idx: Option<usize>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            buf_idx,
            code,
            message: message.into(),
        }
    }

    /// Whether this is a frame change.
    pub fn is_frame_change(&self) -> bool {
        matches!(self, Self::FrameChange { .. })
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast channel with a bounded ring buffer of recent events.
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
    recent: RwLock<VecDeque<PlayerEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given broadcast capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            recent: RwLock::new(VecDeque::with_capacity(MAX_RECENT_EVENTS)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }

    /// Broadcast an event and store it in the ring buffer.
    pub fn emit(&self, event: PlayerEvent) {
        tracing::trace!(?event, "player event");
        {
            let mut recent = self.recent.write();
            if recent.len() >= MAX_RECENT_EVENTS {
                recent.pop_back();
            }
            recent.push_front(event.clone());
        }

        // Ignore send errors (no subscribers).
        let _ = self.tx.send(event);
    }

    /// Return the `n` most recent events (newest first).
    pub fn recent_events(&self, n: usize) -> Vec<PlayerEvent> {
        self.recent.read().iter().take(n).cloned().collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}
