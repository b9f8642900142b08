//! Checkpoint scheduler: capture → validate → select → persist.
//!
//! Epistemic foundation:
//! - K_i: Idle/Active follows the host's job-state signal
//! - K_i: A persisted checkpoint is always drawn from history at a delay that
//!   covers the measured execution lag
//! - B_i: Collection, validation and persistence may each fail → absorbed,
//!   counted, retried next tick
//! - I^B: No single failure stops the scheduler; every tick reschedules

use super::state::SchedulerState;
use crate::checkpoint::{
    adaptive_interval, CheckpointStore, DelaySelector, KeyValueStore, SnapshotValidator,
};
use crate::models::{
    CheckpointSummary, PersistedCheckpoint, PlrError, RecoveryConfig, Result, ValidationError,
};
use crate::providers::{Providers, SnapshotCollector};
use crate::recovery::restore_original;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

/// Poll period while idle, disabled, or without time-based saving.
pub const IDLE_POLL_SECS: f64 = 1.0;

/// Why a save attempt did not persist anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotActive,
    Disabled,
    Resuming,
    InsufficientHistory { requested: usize, available: usize },
}

/// Result of one save attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    Saved(CheckpointSummary),
    Skipped(SkipReason),
    /// The selected snapshot failed re-validation
    Rejected(ValidationError),
}

/// Point-in-time copy of scheduler state for status queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub active: bool,
    pub enabled: bool,
    pub resuming: bool,
    pub debug: bool,
    pub time_based: bool,
    pub save_interval: f64,
    pub save_on_layer: bool,
    pub current_layer: i64,
    pub history_len: usize,
    pub history_capacity: usize,
    pub save_delay: usize,
    pub consecutive_failures: u32,
    pub last_checkpoint: Option<CheckpointSummary>,
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "Enabled"
    } else {
        "Disabled"
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "PowerLossRecovery Status:")?;
        writeln!(f, "Active: {}", self.active)?;
        writeln!(f, "Power Loss Recovery: {}", on_off(self.enabled))?;
        if self.resuming {
            writeln!(f, "Resume in progress: saving suspended")?;
        }
        writeln!(f, "Debug Mode: {}", on_off(self.debug))?;
        if self.time_based {
            writeln!(f, "Time-based saving: Enabled ({}s interval)", self.save_interval)?;
        } else {
            writeln!(f, "Time-based saving: Disabled")?;
        }
        if self.save_on_layer {
            writeln!(
                f,
                "Layer-based saving: Enabled (current layer: {})",
                self.current_layer
            )?;
        } else {
            writeln!(f, "Layer-based saving: Disabled")?;
        }
        writeln!(
            f,
            "History size: {} (current: {})",
            self.history_capacity, self.history_len
        )?;
        write!(f, "Save delay: {} states", self.save_delay)?;
        if let Some(checkpoint) = &self.last_checkpoint {
            write!(f, "\n\nCurrently Saved State:\n{checkpoint}")?;
        }
        Ok(())
    }
}

/// Periodic and event-driven checkpoint engine.
pub struct CheckpointScheduler {
    config: RecoveryConfig,
    providers: Providers,
    collector: SnapshotCollector,
    validator: SnapshotValidator,
    delay: DelaySelector,
    store: CheckpointStore<dyn KeyValueStore>,
    state: SchedulerState,
    job_dir: Option<PathBuf>,
}

impl CheckpointScheduler {
    pub fn new(
        config: RecoveryConfig,
        providers: Providers,
        store: CheckpointStore<dyn KeyValueStore>,
    ) -> Self {
        let collector = SnapshotCollector::new(providers.clone(), config.part_cooling_fans.clone());
        let validator = SnapshotValidator::new(config.tools.clone());
        let delay = DelaySelector::new(config.history_size, config.save_delay);
        let state = SchedulerState::new(config.history_size, config.enabled);

        Self {
            config,
            providers,
            collector,
            validator,
            delay,
            store,
            state,
            job_dir: None,
        }
    }

    /// Directory whose resume backups are restored when a job finishes.
    pub fn with_job_dir(mut self, dir: PathBuf) -> Self {
        self.job_dir = Some(dir);
        self
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    pub(crate) fn providers(&self) -> &Providers {
        &self.providers
    }

    /// Current adaptive interval.
    pub fn current_interval(&self, now: f64) -> f64 {
        adaptive_interval(
            self.config.save_interval,
            self.state.since_tool_change(now),
            &self.state.history,
        )
    }

    /// One periodic iteration. Returns seconds until the next tick.
    pub fn tick(&mut self, now: f64) -> f64 {
        match self.try_tick(now) {
            Ok(delay) => delay,
            Err(e) if e.is_transient() => {
                warn!(error = %e, "Checkpoint tick failed, retrying");
                IDLE_POLL_SECS
            }
            Err(e) => {
                error!(error = %e, "Checkpoint tick failed");
                IDLE_POLL_SECS
            }
        }
    }

    fn try_tick(&mut self, now: f64) -> Result<f64> {
        let printing = self.providers.job.is_job_active(now);
        if printing != self.state.active {
            if self.state.set_active(printing) {
                info!("Job started - checkpointing active");
            } else {
                info!("Job ended - checkpointing idle");
            }
        }

        if self.state.active {
            if !self.state.enabled {
                return Ok(IDLE_POLL_SECS);
            }

            self.capture(now);

            let mut should_save = false;
            if self.config.time_based_enabled() {
                let interval = self.current_interval(now);
                should_save = now - self.state.last_save_time >= interval;
            }

            if should_save && self.state.in_backoff(now) {
                debug!(
                    failures = self.state.consecutive_failures,
                    backoff_secs = self.state.backoff_secs(),
                    "Save suppressed by failure backoff"
                );
                should_save = false;
            }

            if should_save {
                self.state.last_save_attempt = now;
                self.save_checkpoint(now)?;
            }
        }

        if !self.config.time_based_enabled() || !self.state.active {
            return Ok(IDLE_POLL_SECS);
        }
        Ok(self.current_interval(now))
    }

    /// Collect a snapshot and append it to history if valid.
    fn capture(&mut self, now: f64) {
        let Some(snapshot) = self.collector.collect(now, self.state.layers) else {
            self.state.record_failure();
            debug!(
                failures = self.state.consecutive_failures,
                "No snapshot collected"
            );
            return;
        };

        match self.validator.validate(&snapshot) {
            Ok(()) => {
                self.state.history.push(snapshot);
                self.state.record_valid();
                debug!(history_len = self.state.history.len(), "Collected valid snapshot");
            }
            Err(e) => {
                self.state.record_failure();
                debug!(
                    error = %e,
                    failures = self.state.consecutive_failures,
                    "Invalid snapshot collected"
                );
            }
        }
    }

    /// Persist the delayed snapshot from history.
    pub fn save_checkpoint(&mut self, now: f64) -> Result<SaveOutcome> {
        if !self.state.active {
            debug!("Not saving - job not active");
            return Ok(SaveOutcome::Skipped(SkipReason::NotActive));
        }
        if self.state.resuming {
            debug!("Not saving - resume in progress");
            return Ok(SaveOutcome::Skipped(SkipReason::Resuming));
        }
        if !self.state.enabled {
            debug!("Not saving - checkpointing disabled");
            return Ok(SaveOutcome::Skipped(SkipReason::Disabled));
        }

        let delay = self
            .delay
            .select(self.providers.lag_sample(now), self.config.save_interval);

        let snapshot = match self.state.history.peek_from_end(delay) {
            Ok(snapshot) => snapshot.clone(),
            Err(PlrError::InsufficientHistory {
                requested,
                available,
            }) => {
                info!(
                    requested,
                    available, "Insufficient history to save delayed checkpoint"
                );
                return Ok(SaveOutcome::Skipped(SkipReason::InsufficientHistory {
                    requested,
                    available,
                }));
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = self.validator.validate(&snapshot) {
            warn!(error = %e, "Selected snapshot invalid, not saving");
            return Ok(SaveOutcome::Rejected(e));
        }

        let checkpoint = PersistedCheckpoint::new(snapshot, self.providers.queue_status(now));
        self.store.save(&checkpoint)?;

        let summary = checkpoint.summary();
        self.state.last_save_time = now;
        self.state.record_valid();
        self.state.last_checkpoint = Some(summary.clone());

        info!(
            delay,
            collected_at = summary.collection_time,
            progress_pct = summary.file_progress.progress_pct,
            "Checkpoint saved"
        );
        Ok(SaveOutcome::Saved(summary))
    }

    /// Capture then save, outside the periodic cadence.
    fn forced_save(&mut self, now: f64, trigger: &'static str) {
        if !self.state.enabled {
            debug!(trigger, "Checkpointing disabled - event not captured");
            return;
        }
        self.capture(now);
        self.state.last_save_attempt = now;
        match self.save_checkpoint(now) {
            Ok(outcome) => debug!(trigger, ?outcome, "Event-triggered save"),
            Err(e) => warn!(trigger, error = %e, "Event-triggered save failed"),
        }
    }

    /// Layer boundary. Returns true if the periodic tick should fire now.
    pub fn on_layer_change(&mut self, now: f64, layer: Option<i64>, layer_height: Option<f64>) -> bool {
        if !self.config.save_on_layer || !self.state.active {
            return false;
        }

        if let Some(layer) = layer {
            self.state.layers.layer = layer;
        }
        if let Some(height) = layer_height {
            self.state.layers.height = height;
        }
        self.state.last_layer_change = Some(now);
        debug!(
            layer = self.state.layers.layer,
            height = self.state.layers.height,
            "Layer changed"
        );

        self.forced_save(now, "layer");
        self.config.time_based_enabled()
    }

    /// Tool activation. Returns true if the periodic tick should fire now.
    pub fn on_tool_activated(&mut self, now: f64) -> bool {
        if !self.state.active {
            debug!("Tool activation while idle - ignored");
            return false;
        }
        self.state.last_tool_change = Some(now);
        self.forced_save(now, "tool");
        self.config.time_based_enabled()
    }

    /// Job completed or failed: lift the resume guard and put back any
    /// job file a resume rewrote.
    pub fn on_job_finished(&mut self, filename: Option<&str>) {
        self.state.resuming = false;
        let (Some(dir), Some(name)) = (self.job_dir.as_deref(), filename) else {
            return;
        };
        match restore_original(dir, name) {
            Ok(true) => debug!(file = name, "Original job file restored"),
            Ok(false) => {}
            Err(e) => warn!(file = name, error = %e, "Restoring original job file failed"),
        }
    }

    pub fn enable(&mut self) {
        self.state.enabled = true;
        info!("Power loss recovery enabled");
    }

    pub fn disable(&mut self) {
        self.state.enabled = false;
        info!("Power loss recovery disabled");
    }

    pub fn set_resuming(&mut self, resuming: bool) {
        self.state.resuming = resuming;
        debug!(resuming, "Resume flag updated");
    }

    /// Save immediately from existing history.
    pub fn force_save_now(&mut self, now: f64) -> Result<SaveOutcome> {
        self.state.last_save_attempt = now;
        self.save_checkpoint(now)
    }

    /// Clear the persisted checkpoint and in-memory counters.
    pub fn reset(&mut self) -> Result<()> {
        self.store.clear()?;
        self.state.reset_counters();
        info!("State reset completed");
        Ok(())
    }

    pub fn status(&self) -> StatusReport {
        let stored = match self.store.load(&self.validator) {
            Ok(stored) => stored.map(|c| c.summary()),
            Err(e) => {
                warn!(error = %e, "Error reading saved checkpoint");
                self.state.last_checkpoint.clone()
            }
        };

        StatusReport {
            active: self.state.active,
            enabled: self.state.enabled,
            resuming: self.state.resuming,
            debug: self.config.debug,
            time_based: self.config.time_based_enabled(),
            save_interval: self.config.save_interval,
            save_on_layer: self.config.save_on_layer,
            current_layer: self.state.layers.layer,
            history_len: self.state.history.len(),
            history_capacity: self.state.history.capacity(),
            save_delay: self.config.save_delay,
            consecutive_failures: self.state.consecutive_failures,
            last_checkpoint: stored,
        }
    }
}
