use std::collections::VecDeque;
use tapedeck_common::Direction;

/// A frame ready to be made visible.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadedFrame {
    pub frame: u64,
    pub time: f64,
}

/// Result of asking a backend for a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadResult {
    Loaded(LoadedFrame),
    /// The frame exists but its data has not arrived yet.
    NotBuffered,
    /// Past either end of the media.
    OutOfRange,
}

/// Backend the playback loop pulls frames from.
pub trait FrameSource: Send {
    /// Prepare `frame` for display off-screen.
    fn load(&mut self, frame: u64, time: f64) -> LoadResult;

    /// Whether playback in `direction` from `frame` has data to continue.
    fn can_play(&self, frame: u64, time: f64, direction: Direction) -> bool;

    /// Make a loaded frame visible.
    fn draw(&mut self, frame: LoadedFrame);
}

/// Off-screen frames waiting for their display slot.
#[derive(Debug, Clone)]
pub struct FrameQueue {
    frames: VecDeque<LoadedFrame>,
    depth: usize,
}

impl FrameQueue {
    pub fn new(depth: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(depth),
            depth: depth.max(1),
        }
    }

    pub fn has_room(&self) -> bool {
        self.frames.len() < self.depth
    }

    pub fn push(&mut self, frame: LoadedFrame) {
        self.frames.push_back(frame);
    }

    pub fn pop(&mut self) -> Option<LoadedFrame> {
        self.frames.pop_front()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

/// Source with every frame in `[0, num_frames)` available.
#[derive(Debug, Clone)]
pub struct InstantSource {
    num_frames: u64,
    /// Frames below this are available; `None` means all.
    available_below: Option<u64>,
    pub drawn: Vec<u64>,
}

impl InstantSource {
    pub fn new(num_frames: u64) -> Self {
        Self {
            num_frames,
            available_below: None,
            drawn: Vec::new(),
        }
    }

    /// Only frames below `frame` load until [`make_available`](Self::make_available).
    pub fn available_below(mut self, frame: u64) -> Self {
        self.available_below = Some(frame);
        self
    }

    pub fn make_available(&mut self, below: Option<u64>) {
        self.available_below = below;
    }

    fn has(&self, frame: u64) -> bool {
        self.available_below.map_or(true, |limit| frame < limit)
    }
}

impl FrameSource for InstantSource {
    fn load(&mut self, frame: u64, time: f64) -> LoadResult {
        if frame >= self.num_frames {
            return LoadResult::OutOfRange;
        }
        if !self.has(frame) {
            return LoadResult::NotBuffered;
        }
        LoadResult::Loaded(LoadedFrame { frame, time })
    }

    fn can_play(&self, frame: u64, _time: f64, direction: Direction) -> bool {
        let next = match direction {
            Direction::Forward => frame + 1,
            Direction::Backward => frame.saturating_sub(1),
            Direction::Stopped => frame,
        };
        next < self.num_frames && self.has(next)
    }

    fn draw(&mut self, frame: LoadedFrame) {
        self.drawn.push(frame.frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_depth() {
        let mut queue = FrameQueue::new(2);
        queue.push(LoadedFrame { frame: 1, time: 0.0 });
        assert!(queue.has_room());
        queue.push(LoadedFrame { frame: 2, time: 0.0 });
        assert!(!queue.has_room());
        assert_eq!(queue.pop().unwrap().frame, 1);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_instant_source_availability() {
        let mut source = InstantSource::new(10).available_below(5);
        assert!(matches!(source.load(4, 0.0), LoadResult::Loaded(_)));
        assert_eq!(source.load(5, 0.0), LoadResult::NotBuffered);
        assert_eq!(source.load(10, 0.0), LoadResult::OutOfRange);
        assert!(!source.can_play(4, 0.0, Direction::Forward));
        source.make_available(None);
        assert!(source.can_play(4, 0.0, Direction::Forward));
        assert!(!source.can_play(9, 0.0, Direction::Forward));
    }
}
