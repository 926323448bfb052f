use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tapedeck_common::{AtomicDirection, Direction};

/// Position of the visible frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlaybackCursor {
    pub frame: u64,
    pub time: f64,
    pub direction: Direction,
}

/// Lock-free published cursor.
///
/// The loop is the only writer. The frame is a single atomic word and the
/// time is derived from it, so readers never see a frame paired with
/// another frame's time.
#[derive(Debug)]
pub struct CursorCell {
    frame: AtomicU64,
    direction: Arc<AtomicDirection>,
    fps: f64,
    start_bias: f64,
}

impl CursorCell {
    pub fn new(fps: f64, start_bias: f64) -> Self {
        Self {
            frame: AtomicU64::new(0),
            direction: Arc::new(AtomicDirection::new(Direction::Stopped)),
            fps,
            start_bias,
        }
    }

    pub fn load(&self) -> PlaybackCursor {
        let frame = self.frame.load(Ordering::Acquire);
        PlaybackCursor {
            frame,
            time: self.time_for(frame),
            direction: self.direction.load(),
        }
    }

    pub fn frame(&self) -> u64 {
        self.frame.load(Ordering::Acquire)
    }

    pub fn direction(&self) -> Direction {
        self.direction.load()
    }

    /// Shared direction flag, read by the download seek gate.
    pub fn direction_handle(&self) -> Arc<AtomicDirection> {
        self.direction.clone()
    }

    pub(crate) fn set_frame(&self, frame: u64) {
        self.frame.store(frame, Ordering::Release);
    }

    pub(crate) fn set_direction(&self, direction: Direction) {
        self.direction.store(direction);
    }

    /// Presentation time of `frame`.
    pub fn time_for(&self, frame: u64) -> f64 {
        if self.fps <= 0.0 {
            return self.start_bias;
        }
        self.start_bias + frame as f64 / self.fps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_follows_frame() {
        let cell = CursorCell::new(30.0, 0.5);
        cell.set_frame(60);
        let cursor = cell.load();
        assert_eq!(cursor.frame, 60);
        assert_eq!(cursor.time, 2.5);
        assert_eq!(cursor.direction, Direction::Stopped);
    }

    #[test]
    fn test_direction_handle_is_shared() {
        let cell = CursorCell::new(30.0, 0.0);
        let handle = cell.direction_handle();
        cell.set_direction(Direction::Backward);
        assert_eq!(handle.load(), Direction::Backward);
    }

    #[test]
    fn test_readers_see_monotonic_frames() {
        let cell = Arc::new(CursorCell::new(30.0, 0.0));
        let reader = {
            let cell = cell.clone();
            std::thread::spawn(move || {
                let mut last = 0;
                for _ in 0..10_000 {
                    let cursor = cell.load();
                    assert!(cursor.frame >= last);
                    assert_eq!(cursor.time, cursor.frame as f64 / 30.0);
                    last = cursor.frame;
                }
            })
        };
        for frame in 0..10_000 {
            cell.set_frame(frame);
        }
        reader.join().unwrap();
    }
}
