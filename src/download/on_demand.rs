//! On-demand download window for scrubbing.
//!
//! While the user scrubs, bytes are pulled around the scrub position instead
//! of sequentially from the start. The window opens a short distance behind
//! the target (in the direction of travel), always on a sync `moof` so the
//! decoder never starts mid-GOP, and grows one chunk per request until it
//! runs too far ahead of the scrub position.

use std::sync::Arc;
use tapedeck_common::Direction;
use tapedeck_media::{BoxType, SegmentBlock, SegmentIndex};

/// What the worker should do for one on-demand request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDemandStep {
    /// Fetch this block.
    Fetch(SegmentBlock),
    /// The window is far enough ahead of the scrub position.
    Pause,
    /// The window reached the start or end of the media; reported once.
    Finished,
    /// Nothing left to do.
    Idle,
}

/// Parameters for a new window.
#[derive(Debug, Clone, Copy)]
pub struct WindowParams {
    pub fps: f64,
    pub max_frame: u64,
    pub lookbehind_secs: f64,
    pub lookahead_secs: f64,
    pub budget: u64,
}

#[derive(Debug, Clone)]
pub struct OnDemandWindow {
    index: Arc<SegmentIndex>,
    direction: Direction,
    params: WindowParams,
    /// Forward: next segment to fetch. Backward: one past the last segment
    /// not yet fetched.
    cursor: usize,
    /// Frame at the leading edge of what has been fetched.
    edge_frame: u64,
    finished: bool,
    reported: bool,
}

impl OnDemandWindow {
    /// Open a window for scrubbing in `direction` towards `target`.
    pub fn new(
        index: Arc<SegmentIndex>,
        direction: Direction,
        target: u64,
        params: WindowParams,
    ) -> Self {
        let target = target.min(params.max_frame);
        let lookbehind = (params.lookbehind_secs * params.fps).round().max(0.0) as u64;
        let first_media = index.first_media_segment();

        let (cursor, edge_frame) = match direction {
            Direction::Backward => {
                let anchor = (target + lookbehind).min(params.max_frame);
                let end = index
                    .find_segment_for_frame(anchor, Direction::Backward)
                    .map(|m| segment_after_pair(&index, m.match_index))
                    .unwrap_or(index.len());
                (end, anchor + 1)
            }
            Direction::Forward | Direction::Stopped => {
                let anchor = target.saturating_sub(lookbehind);
                match index.closest_preceding_keyframe(anchor) {
                    Some(kf) => (kf.this_segment, kf.keyframe),
                    None => (first_media, 0),
                }
            }
        };

        tracing::debug!(
            "On-demand window {:?} from frame {} (segment {}, edge {})",
            direction,
            target,
            cursor,
            edge_frame
        );

        Self {
            index,
            direction,
            params,
            cursor,
            edge_frame,
            finished: false,
            reported: false,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn params(&self) -> WindowParams {
        self.params
    }

    /// Frame at the leading edge of the fetched region.
    pub fn edge_frame(&self) -> u64 {
        self.edge_frame
    }

    fn lookahead_frames(&self) -> u64 {
        (self.params.lookahead_secs * self.params.fps).round().max(1.0) as u64
    }

    /// Decide the next action for a scrub currently at `scrub_frame`.
    pub fn next_step(&mut self, scrub_frame: u64) -> OnDemandStep {
        if self.finished {
            if self.reported {
                return OnDemandStep::Idle;
            }
            self.reported = true;
            return OnDemandStep::Finished;
        }

        let step = match self.direction {
            Direction::Backward => self.step_backward(scrub_frame),
            Direction::Forward | Direction::Stopped => self.step_forward(scrub_frame),
        };
        if step == OnDemandStep::Finished {
            self.finished = true;
            self.reported = true;
        }
        step
    }

    fn step_forward(&mut self, scrub_frame: u64) -> OnDemandStep {
        if self.cursor >= self.index.len() || self.edge_frame > self.params.max_frame {
            return OnDemandStep::Finished;
        }
        if self.edge_frame > scrub_frame + self.lookahead_frames() {
            return OnDemandStep::Pause;
        }
        let Some(block) = self.index.next_block(self.cursor, self.params.budget) else {
            return OnDemandStep::Finished;
        };
        self.cursor = block.end;
        if let Some((_, end)) = block.frames {
            self.edge_frame = end;
        }
        OnDemandStep::Fetch(block)
    }

    fn step_backward(&mut self, scrub_frame: u64) -> OnDemandStep {
        let first_media = self.index.first_media_segment();
        if self.cursor <= first_media {
            return OnDemandStep::Finished;
        }
        if self.edge_frame + self.lookahead_frames() < scrub_frame {
            return OnDemandStep::Pause;
        }

        // Whole GOPs ending at the cursor, adding earlier GOPs until the
        // block reaches the budget.
        let end = self.cursor;
        let mut start = self
            .index
            .previous_sync_fragment(end)
            .unwrap_or(first_media);
        while let Some(block) = self.index.block(start, end) {
            if block.span.len() >= self.params.budget {
                break;
            }
            match self.index.previous_sync_fragment(start) {
                Some(earlier) => start = earlier,
                None => break,
            }
        }
        let Some(block) = self.index.block(start, end) else {
            return OnDemandStep::Finished;
        };
        self.cursor = start;
        if let Some((first, _)) = block.frames {
            self.edge_frame = first;
        }
        OnDemandStep::Fetch(block)
    }
}

/// Index one past the `mdat` that follows the `moof` at `moof_index`.
fn segment_after_pair(index: &SegmentIndex, moof_index: usize) -> usize {
    match index.get(moof_index + 1) {
        Some(seg) if seg.box_type == BoxType::Mdat => moof_index + 2,
        _ => moof_index + 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapedeck_media::fmp4::SyntheticVideo;

    fn media_index() -> Arc<SegmentIndex> {
        // 300 frames, GOP of 30, fragments of 10 frames.
        let media = SyntheticVideo::new(30.0, 300)
            .gop_len(30)
            .frag_len(10)
            .build()
            .unwrap();
        Arc::new(media.index)
    }

    fn params(budget: u64) -> WindowParams {
        WindowParams {
            fps: 30.0,
            max_frame: 299,
            lookbehind_secs: 2.0,
            lookahead_secs: 2.0,
            budget,
        }
    }

    fn first_sync_frame(index: &SegmentIndex, block: &SegmentBlock) -> (u64, bool) {
        let seg = index.get(block.first).unwrap();
        (seg.frame_start, seg.is_sync)
    }

    #[test]
    fn test_forward_window_starts_on_keyframe_behind_target() {
        let index = media_index();
        let mut window = OnDemandWindow::new(index.clone(), Direction::Forward, 150, params(1));

        let OnDemandStep::Fetch(block) = window.next_step(150) else {
            panic!("expected a fetch");
        };
        // 2 s behind frame 150 is frame 90, itself a keyframe.
        assert_eq!(first_sync_frame(&index, &block), (90, true));
        assert_eq!(block.frames, Some((90, 100)));
    }

    #[test]
    fn test_forward_window_snaps_mid_gop_anchor() {
        let index = media_index();
        let mut window = OnDemandWindow::new(index.clone(), Direction::Forward, 125, params(1));
        let OnDemandStep::Fetch(block) = window.next_step(125) else {
            panic!("expected a fetch");
        };
        // Anchor 65 lies in the GOP starting at 60.
        assert_eq!(first_sync_frame(&index, &block), (60, true));
    }

    #[test]
    fn test_forward_window_pauses_beyond_lookahead() {
        let index = media_index();
        let mut window = OnDemandWindow::new(index, Direction::Forward, 0, params(1));
        let mut fetched = 0;
        loop {
            match window.next_step(0) {
                OnDemandStep::Fetch(_) => fetched += 1,
                OnDemandStep::Pause => break,
                other => panic!("unexpected {:?}", other),
            }
        }
        // Lookahead of 60 frames in 10-frame fragments; the 7th fetch
        // carries the edge past it.
        assert_eq!(fetched, 7);
        assert!(window.edge_frame() > 60);

        // Scrubbing forward resumes downloads.
        assert!(matches!(window.next_step(30), OnDemandStep::Fetch(_)));
    }

    #[test]
    fn test_forward_window_finishes_once() {
        let index = media_index();
        let mut window = OnDemandWindow::new(index, Direction::Forward, 299, params(u64::MAX));
        assert!(matches!(window.next_step(299), OnDemandStep::Fetch(_)));
        assert_eq!(window.next_step(299), OnDemandStep::Finished);
        assert_eq!(window.next_step(299), OnDemandStep::Idle);
    }

    #[test]
    fn test_backward_chunks_are_whole_gops() {
        let index = media_index();
        let mut window = OnDemandWindow::new(index.clone(), Direction::Backward, 200, params(1));

        let mut starts = Vec::new();
        let mut last_end = None;
        loop {
            match window.next_step(0) {
                OnDemandStep::Fetch(block) => {
                    let (frame, sync) = first_sync_frame(&index, &block);
                    assert!(sync, "backward chunk starts mid-GOP at frame {}", frame);
                    if let Some(end) = last_end {
                        assert_eq!(block.end, end, "chunks must be contiguous");
                    }
                    last_end = Some(block.first);
                    starts.push(frame);
                }
                OnDemandStep::Finished => break,
                other => panic!("unexpected {:?}", other),
            }
        }
        // Anchor is frame 260, in the GOP starting at 240.
        assert_eq!(starts, vec![240, 210, 180, 150, 120, 90, 60, 30, 0]);
    }

    #[test]
    fn test_backward_pauses_when_far_behind_scrub() {
        let index = media_index();
        let mut window = OnDemandWindow::new(index, Direction::Backward, 299, params(1));
        let scrub = 299;
        let mut fetched = 0;
        while let OnDemandStep::Fetch(_) = window.next_step(scrub) {
            fetched += 1;
        }
        assert!(fetched >= 1);
        assert!(window.edge_frame() + 60 < scrub);
    }
}
