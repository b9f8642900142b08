//! Host collaborator interfaces.
//!
//! Epistemic foundation:
//! - K_i: The core only sees narrow capability traits; the host owns the protocol
//! - B_i: Every query may fail → Option at each boundary
//! - I^R: Optional capabilities (lag) are injected as `Option`
//!
//! Every query takes the instant `at` so a snapshot reads all quantities
//! against one timestamp.

mod collector;
#[cfg(test)]
pub(crate) mod testing;

pub use collector::*;

use crate::checkpoint::LagSample;
use crate::models::{Position, QueueStatus, Result, Temperatures};
use std::sync::Arc;

/// Monotonic time source, in seconds.
pub trait Clock: Send + Sync {
    fn monotonic(&self) -> f64;
}

/// Clock driven by the tokio timer, so paused test time applies.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn monotonic(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Whether a job is running, and which file it reads.
pub trait JobStateProvider: Send + Sync {
    fn is_job_active(&self, at: f64) -> bool;
    fn job_filename(&self, at: f64) -> Option<String>;
}

/// Read position within the job file.
pub trait ProgressProvider: Send + Sync {
    fn file_position(&self, at: f64) -> Option<u64>;
    fn file_size(&self, at: f64) -> Option<u64>;
}

/// Toolhead state.
pub trait PositionProvider: Send + Sync {
    fn position(&self, at: f64) -> Option<Position>;
    fn coordinate_offsets(&self, at: f64) -> Option<Position>;
    fn active_tool(&self, at: f64) -> Option<String>;
    /// Axes currently homed, e.g. `"xyz"`.
    fn homed_axes(&self, at: f64) -> Option<String>;
}

/// Heaters and auxiliary actuators (fans).
pub trait ThermalProvider: Send + Sync {
    /// Chamber reads 0.0 when the machine has no chamber sensor.
    fn temperatures(&self, at: f64) -> Option<Temperatures>;
    fn auxiliary_actuator_intensity(&self, name: &str, at: f64) -> Option<f64>;
}

/// Logical vs. physical execution timing.
pub trait LagProvider: Send + Sync {
    fn logical_time(&self, at: f64) -> Option<f64>;
    fn estimated_execution_time(&self, at: f64) -> Option<f64>;
    fn queue_depth_summary(&self, at: f64) -> Option<QueueStatus>;

    fn lag_sample(&self, at: f64) -> Option<LagSample> {
        Some(LagSample {
            logical_time: self.logical_time(at)?,
            estimated_execution_time: self.estimated_execution_time(at)?,
        })
    }
}

/// Textual instruction sink.
pub trait CommandExecutor: Send + Sync {
    /// Queue one instruction line.
    fn run(&self, line: &str) -> Result<()>;
    /// Block until every queued instruction has completed.
    fn wait_until_idle(&self) -> Result<()>;
}

/// Executor that writes each instruction to stdout for the host to consume.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutExecutor;

impl CommandExecutor for StdoutExecutor {
    fn run(&self, line: &str) -> Result<()> {
        println!("{line}");
        Ok(())
    }

    fn wait_until_idle(&self) -> Result<()> {
        println!("M400");
        Ok(())
    }
}

/// The capability set injected into the scheduler.
#[derive(Clone)]
pub struct Providers {
    pub clock: Arc<dyn Clock>,
    pub job: Arc<dyn JobStateProvider>,
    pub progress: Arc<dyn ProgressProvider>,
    pub position: Arc<dyn PositionProvider>,
    pub thermal: Arc<dyn ThermalProvider>,
    pub lag: Option<Arc<dyn LagProvider>>,
}

impl Providers {
    pub fn now(&self) -> f64 {
        self.clock.monotonic()
    }

    pub fn lag_sample(&self, at: f64) -> Option<LagSample> {
        self.lag.as_ref()?.lag_sample(at)
    }

    /// Queue status, zeroed when unavailable.
    pub fn queue_status(&self, at: f64) -> QueueStatus {
        self.lag
            .as_ref()
            .and_then(|lag| lag.queue_depth_summary(at))
            .unwrap_or_default()
    }
}
