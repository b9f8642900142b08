//! Mutable scheduler state.
//!
//! K_i: One owner (the scheduler); status queries get copies.
//! K_i: Idle→Active clears history and the failure streak.

use crate::checkpoint::HistoryBuffer;
use crate::models::CheckpointSummary;
use crate::providers::LayerTracker;

/// Upper bound on the failure backoff, in seconds.
pub const MAX_BACKOFF_SECS: f64 = 30.0;

#[derive(Debug, Clone)]
pub struct SchedulerState {
    /// A job is running
    pub active: bool,
    /// Checkpointing is administratively enabled
    pub enabled: bool,
    /// A resume is being prepared; saving is suppressed
    pub resuming: bool,
    pub history: HistoryBuffer,
    pub layers: LayerTracker,
    /// Consecutive ticks without a valid snapshot
    pub consecutive_failures: u32,
    pub last_save_time: f64,
    pub last_save_attempt: f64,
    pub last_layer_change: Option<f64>,
    pub last_tool_change: Option<f64>,
    /// Summary of the last checkpoint this process persisted
    pub last_checkpoint: Option<CheckpointSummary>,
}

impl SchedulerState {
    pub fn new(history_capacity: usize, enabled: bool) -> Self {
        Self {
            active: false,
            enabled,
            resuming: false,
            history: HistoryBuffer::new(history_capacity),
            layers: LayerTracker::default(),
            consecutive_failures: 0,
            last_save_time: 0.0,
            last_save_attempt: 0.0,
            last_layer_change: None,
            last_tool_change: None,
            last_checkpoint: None,
        }
    }

    /// Apply the job-state signal. Returns true on an Idle→Active edge.
    pub fn set_active(&mut self, active: bool) -> bool {
        if active == self.active {
            return false;
        }
        self.active = active;
        if active {
            self.history.clear();
            self.consecutive_failures = 0;
            self.layers = LayerTracker::default();
            self.last_tool_change = None;
            self.last_layer_change = None;
        }
        active
    }

    pub fn record_valid(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    /// `min(30, 2^failures)` seconds, or zero without failures.
    pub fn backoff_secs(&self) -> f64 {
        if self.consecutive_failures == 0 {
            return 0.0;
        }
        let exp = self.consecutive_failures.min(16) as i32;
        2f64.powi(exp).min(MAX_BACKOFF_SECS)
    }

    /// Whether the failure backoff still blocks a save at `now`.
    pub fn in_backoff(&self, now: f64) -> bool {
        self.consecutive_failures > 0 && now - self.last_save_attempt < self.backoff_secs()
    }

    /// Seconds since the last tool change during this job.
    pub fn since_tool_change(&self, now: f64) -> Option<f64> {
        self.last_tool_change.map(|t| now - t)
    }

    /// Forget counters and layer tracking (explicit reset).
    pub fn reset_counters(&mut self) {
        self.layers = LayerTracker::default();
        self.consecutive_failures = 0;
        self.last_save_time = 0.0;
        self.last_save_attempt = 0.0;
        self.last_checkpoint = None;
    }
}
