//! Display refresh-rate calibration.

use std::collections::HashMap;

/// Refresh rates a calibration snaps to.
pub const KNOWN_REFRESH_RATES: [f64; 4] = [240.0, 120.0, 60.0, 30.0];

/// Most frequent inter-frame delta, in whole milliseconds.
///
/// Ties go to the shorter delta. Returns `None` with fewer than two
/// timestamps or no positive delta.
pub fn delta_mode(timestamps_ms: &[f64]) -> Option<u64> {
    let mut histogram: HashMap<u64, usize> = HashMap::new();
    for pair in timestamps_ms.windows(2) {
        let delta = (pair[1] - pair[0]).round();
        if delta.is_finite() && delta >= 1.0 {
            *histogram.entry(delta as u64).or_default() += 1;
        }
    }
    histogram
        .into_iter()
        .max_by(|(da, ca), (db, cb)| ca.cmp(cb).then(db.cmp(da)))
        .map(|(delta, _)| delta)
}

/// Nearest known refresh rate to `fps`.
pub fn snap_refresh_rate(fps: f64) -> f64 {
    KNOWN_REFRESH_RATES
        .iter()
        .copied()
        .min_by(|a, b| (a - fps).abs().total_cmp(&(b - fps).abs()))
        .unwrap_or(60.0)
}

/// Refresh rate implied by display callback timestamps.
pub fn estimate_refresh_rate(timestamps_ms: &[f64]) -> Option<f64> {
    let delta = delta_mode(timestamps_ms)?;
    Some(snap_refresh_rate(1000.0 / delta as f64))
}
