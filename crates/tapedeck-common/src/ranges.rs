//! Buffered time ranges.
//!
//! A [`TimeRanges`] value is an ordered list of disjoint half-open intervals
//! `[start, end)` in seconds. Adding an interval that touches or overlaps an
//! existing one merges them, so the set only ever grows through `add`.

/// Tolerance used when deciding whether two intervals touch.
const ADJACENCY_EPSILON: f64 = 1e-6;

/// Ordered set of disjoint `[start, end)` intervals in seconds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeRanges {
    ranges: Vec<(f64, f64)>,
}

impl TimeRanges {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `[start, end)`, merging with touching or overlapping intervals.
    ///
    /// Empty or inverted intervals and non-finite bounds are ignored.
    pub fn add(&mut self, start: f64, end: f64) {
        if !start.is_finite() || !end.is_finite() || end <= start {
            return;
        }

        let mut new_start = start;
        let mut new_end = end;
        let mut merged = Vec::with_capacity(self.ranges.len() + 1);
        let mut inserted = false;

        for &(s, e) in &self.ranges {
            if e + ADJACENCY_EPSILON < new_start {
                merged.push((s, e));
            } else if new_end + ADJACENCY_EPSILON < s {
                if !inserted {
                    merged.push((new_start, new_end));
                    inserted = true;
                }
                merged.push((s, e));
            } else {
                new_start = new_start.min(s);
                new_end = new_end.max(e);
            }
        }
        if !inserted {
            merged.push((new_start, new_end));
        }

        self.ranges = merged;
    }

    /// Remove `[start, end)` from the set, splitting intervals as needed.
    pub fn remove(&mut self, start: f64, end: f64) {
        if end <= start {
            return;
        }
        let mut kept = Vec::with_capacity(self.ranges.len() + 1);
        for &(s, e) in &self.ranges {
            if e <= start || s >= end {
                kept.push((s, e));
                continue;
            }
            if s < start {
                kept.push((s, start));
            }
            if e > end {
                kept.push((end, e));
            }
        }
        self.ranges = kept;
    }

    /// Whether `time` falls inside any interval.
    pub fn contains(&self, time: f64) -> bool {
        self.find(time).is_some()
    }

    /// The interval containing `time`, if any.
    pub fn find(&self, time: f64) -> Option<(f64, f64)> {
        self.ranges
            .iter()
            .copied()
            .find(|&(s, e)| time >= s && time < e)
    }

    /// Whether `[start, end)` is fully covered by a single interval.
    pub fn covers(&self, start: f64, end: f64) -> bool {
        self.ranges
            .iter()
            .any(|&(s, e)| start >= s - ADJACENCY_EPSILON && end <= e + ADJACENCY_EPSILON)
    }

    /// Sum of all interval lengths in seconds.
    pub fn total_duration(&self) -> f64 {
        self.ranges.iter().map(|(s, e)| e - s).sum()
    }

    /// Earliest buffered time.
    pub fn start(&self) -> Option<f64> {
        self.ranges.first().map(|r| r.0)
    }

    /// Latest buffered time (exclusive).
    pub fn end(&self) -> Option<f64> {
        self.ranges.last().map(|r| r.1)
    }

    /// Number of disjoint intervals.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Drop every interval.
    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    /// Iterate over intervals in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.ranges.iter().copied()
    }
}
