//! Execution-lag estimation and checkpoint delay selection.
//!
//! Epistemic foundation:
//! - K_i: Physical execution trails logical progress by the queue depth
//! - K_i: Persisting a snapshot older than the lag means the machine has
//!   provably passed that point
//! - B_i: Lag inputs may be unavailable → fallback to the configured delay
//! - I^B: The selector never fails; it always yields a usable index

use tracing::debug;

/// Logical vs. physical time sample from the lag provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LagSample {
    /// Time at which the last queued operation will have been issued
    pub logical_time: f64,
    /// Estimated time the machine is physically executing now
    pub estimated_execution_time: f64,
}

impl LagSample {
    pub fn lag(&self) -> f64 {
        self.logical_time - self.estimated_execution_time
    }
}

/// Chooses how many snapshots back from the newest to persist.
#[derive(Debug, Clone, Copy)]
pub struct DelaySelector {
    history_capacity: usize,
    fallback_delay: usize,
}

impl DelaySelector {
    pub fn new(history_capacity: usize, fallback_delay: usize) -> Self {
        let max_delay = history_capacity.saturating_sub(1);
        Self {
            history_capacity,
            fallback_delay: fallback_delay.min(max_delay),
        }
    }

    fn max_delay(&self) -> usize {
        self.history_capacity.saturating_sub(1)
    }

    /// `max(1, floor(lag / interval) + 1)`, capped at `capacity - 1`.
    ///
    /// Falls back to the configured delay when the sample is missing or the
    /// arithmetic is not meaningful (zero interval, non-finite lag).
    pub fn select(&self, sample: Option<LagSample>, interval: f64) -> usize {
        let Some(sample) = sample else {
            debug!(delay = self.fallback_delay, "No lag sample, using fallback delay");
            return self.fallback_delay;
        };

        let lag = sample.lag();
        if !lag.is_finite() || !interval.is_finite() || interval <= 0.0 {
            debug!(
                lag,
                interval,
                delay = self.fallback_delay,
                "Lag not usable, using fallback delay"
            );
            return self.fallback_delay;
        }

        let intervals = (lag / interval).floor() + 1.0;
        let needed = if intervals < 1.0 {
            1
        } else {
            // Saturating float→int cast; the cap below bounds it anyway.
            intervals as usize
        };
        let delay = needed.min(self.max_delay());

        debug!(lag, interval, needed, delay, "Computed checkpoint delay");
        delay
    }
}
