//! Adaptive checkpoint interval.
//!
//! Checkpoints come faster right after a tool change and while the machine
//! is moving or heating quickly; otherwise the base interval applies.

use super::HistoryBuffer;
use tracing::debug;

/// Window after a tool change during which the interval is throttled.
pub const TOOL_CHANGE_WINDOW: f64 = 20.0;
/// Interval fraction applied immediately after a tool change.
pub const TOOL_CHANGE_MIN_FACTOR: f64 = 0.3;
/// Manhattan movement (mm) between the two newest snapshots that counts as fast.
pub const FAST_MOVE_MM: f64 = 10.0;
/// Hot-end swing (°C) between the two newest snapshots that counts as fast.
pub const FAST_TEMP_SWING: f64 = 5.0;
/// Multiplier applied per fast signal.
pub const ACTIVITY_FACTOR: f64 = 0.75;
/// Normal lower bound on the interval.
pub const MIN_INTERVAL: f64 = 5.0;
/// Lower bound within `RECENT_TOOL_CHANGE` seconds of a tool change.
pub const MIN_INTERVAL_AFTER_TOOL_CHANGE: f64 = 3.0;
pub const RECENT_TOOL_CHANGE: f64 = 5.0;

/// Compute the next checkpoint wait.
///
/// `since_tool_change` is `None` when no tool change happened during this job.
pub fn adaptive_interval(
    base_interval: f64,
    since_tool_change: Option<f64>,
    history: &HistoryBuffer,
) -> f64 {
    match compute(base_interval, since_tool_change, history) {
        Some(interval) => interval,
        None => {
            debug!(base_interval, "Interval computation failed, using base interval");
            base_interval
        }
    }
}

fn compute(
    base_interval: f64,
    since_tool_change: Option<f64>,
    history: &HistoryBuffer,
) -> Option<f64> {
    if !base_interval.is_finite() {
        return None;
    }

    // A negative elapsed time means a clock anomaly; treat as "just now".
    let since = since_tool_change.map(|s| s.max(0.0));

    let mut reduction: f64 = 1.0;
    if let Some(elapsed) = since.filter(|e| *e < TOOL_CHANGE_WINDOW) {
        let factor =
            TOOL_CHANGE_MIN_FACTOR + (1.0 - TOOL_CHANGE_MIN_FACTOR) * (elapsed / TOOL_CHANGE_WINDOW);
        reduction = reduction.min(factor);
    }

    let mut interval = base_interval * reduction;

    if let Some((previous, newest)) = history.latest_pair() {
        let moved = newest.position.manhattan_distance(&previous.position);
        if moved > FAST_MOVE_MM {
            interval *= ACTIVITY_FACTOR;
        }
        let swing = (newest.hotend_temp - previous.hotend_temp).abs();
        if swing > FAST_TEMP_SWING {
            interval *= ACTIVITY_FACTOR;
        }
    }

    let floor = match since {
        Some(elapsed) if elapsed < RECENT_TOOL_CHANGE => MIN_INTERVAL_AFTER_TOOL_CHANGE,
        _ => MIN_INTERVAL,
    };

    if !interval.is_finite() {
        return None;
    }
    Some(interval.max(floor))
}
