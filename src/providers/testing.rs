//! Test doubles for the host collaborator traits.

use super::{
    Clock, CommandExecutor, JobStateProvider, LagProvider, PositionProvider, ProgressProvider,
    Providers, ThermalProvider,
};
use crate::checkpoint::{KeyValueStore, MemoryStore};
use crate::models::{PlrError, Position, QueueStatus, Result, Temperatures};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
struct MachineState {
    now: f64,
    active: bool,
    filename: Option<String>,
    file_position: u64,
    file_size: u64,
    position: Position,
    offsets: Position,
    tool: String,
    homed: String,
    temps: Temperatures,
    fail_temps: bool,
    fans: BTreeMap<String, f64>,
    lag: Option<(f64, f64)>,
    queue: QueueStatus,
    instants: Vec<f64>,
}

/// Scriptable machine implementing every provider trait.
#[derive(Clone)]
pub struct FakeMachine {
    state: Arc<Mutex<MachineState>>,
}

impl FakeMachine {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MachineState {
                now: 0.0,
                active: false,
                filename: Some("job.gcode".to_string()),
                file_position: 0,
                file_size: 1_000,
                position: Position::new(0.0, 0.0, 0.0),
                offsets: Position::default(),
                tool: "extruder".to_string(),
                homed: "xyz".to_string(),
                temps: Temperatures {
                    hotend: 210.0,
                    bed: 60.0,
                    chamber: 0.0,
                },
                fail_temps: false,
                fans: BTreeMap::new(),
                lag: None,
                queue: QueueStatus::default(),
                instants: Vec::new(),
            })),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut MachineState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    fn record(&self, at: f64) {
        self.with(|s| {
            if s.instants.last() != Some(&at) {
                s.instants.push(at);
            }
        });
    }

    pub fn providers(&self) -> Providers {
        let me = Arc::new(self.clone());
        Providers {
            clock: me.clone(),
            job: me.clone(),
            progress: me.clone(),
            position: me.clone(),
            thermal: me.clone(),
            lag: Some(me as Arc<dyn LagProvider>),
        }
    }

    pub fn set_now(&self, now: f64) {
        self.with(|s| s.now = now);
    }

    pub fn set_active(&self, active: bool) {
        self.with(|s| s.active = active);
    }

    pub fn set_file(&self, position: u64, size: u64) {
        self.with(|s| {
            s.file_position = position;
            s.file_size = size;
        });
    }

    pub fn set_position(&self, x: f64, y: f64, z: f64) {
        self.with(|s| s.position = Position::new(x, y, z));
    }

    pub fn set_tool(&self, tool: &str) {
        self.with(|s| s.tool = tool.to_string());
    }

    pub fn set_homed(&self, axes: &str) {
        self.with(|s| s.homed = axes.to_string());
    }

    pub fn set_hotend(&self, temp: f64) {
        self.with(|s| s.temps.hotend = temp);
    }

    pub fn set_fan(&self, name: &str, speed: f64) {
        self.with(|s| {
            s.fans.insert(name.to_string(), speed);
        });
    }

    pub fn set_lag(&self, logical: f64, executed: f64) {
        self.with(|s| s.lag = Some((logical, executed)));
    }

    pub fn set_queue(&self, queue: QueueStatus) {
        self.with(|s| s.queue = queue);
    }

    pub fn fail_temperatures(&self, fail: bool) {
        self.with(|s| s.fail_temps = fail);
    }

    /// Distinct instants the providers were queried at, in order.
    pub fn queried_instants(&self) -> Vec<f64> {
        self.with(|s| s.instants.clone())
    }
}

impl Clock for FakeMachine {
    fn monotonic(&self) -> f64 {
        self.with(|s| s.now)
    }
}

impl JobStateProvider for FakeMachine {
    fn is_job_active(&self, _at: f64) -> bool {
        self.with(|s| s.active)
    }

    fn job_filename(&self, at: f64) -> Option<String> {
        self.record(at);
        self.with(|s| s.filename.clone())
    }
}

impl ProgressProvider for FakeMachine {
    fn file_position(&self, at: f64) -> Option<u64> {
        self.record(at);
        self.with(|s| Some(s.file_position))
    }

    fn file_size(&self, at: f64) -> Option<u64> {
        self.record(at);
        self.with(|s| Some(s.file_size))
    }
}

impl PositionProvider for FakeMachine {
    fn position(&self, at: f64) -> Option<Position> {
        self.record(at);
        self.with(|s| Some(s.position))
    }

    fn coordinate_offsets(&self, at: f64) -> Option<Position> {
        self.record(at);
        self.with(|s| Some(s.offsets))
    }

    fn active_tool(&self, at: f64) -> Option<String> {
        self.record(at);
        self.with(|s| Some(s.tool.clone()))
    }

    fn homed_axes(&self, _at: f64) -> Option<String> {
        self.with(|s| Some(s.homed.clone()))
    }
}

impl ThermalProvider for FakeMachine {
    fn temperatures(&self, at: f64) -> Option<Temperatures> {
        self.record(at);
        self.with(|s| (!s.fail_temps).then_some(s.temps))
    }

    fn auxiliary_actuator_intensity(&self, name: &str, at: f64) -> Option<f64> {
        self.record(at);
        self.with(|s| s.fans.get(name).copied())
    }
}

impl LagProvider for FakeMachine {
    fn logical_time(&self, _at: f64) -> Option<f64> {
        self.with(|s| s.lag.map(|(logical, _)| logical))
    }

    fn estimated_execution_time(&self, _at: f64) -> Option<f64> {
        self.with(|s| s.lag.map(|(_, executed)| executed))
    }

    fn queue_depth_summary(&self, _at: f64) -> Option<QueueStatus> {
        self.with(|s| Some(s.queue))
    }
}

/// Executor that records every instruction.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    lines: Mutex<Vec<String>>,
    fail_on: Mutex<Option<String>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    /// Fail any instruction starting with `prefix`.
    pub fn fail_on(&self, prefix: &str) {
        *self.fail_on.lock().unwrap() = Some(prefix.to_string());
    }
}

impl CommandExecutor for RecordingExecutor {
    fn run(&self, line: &str) -> Result<()> {
        if let Some(prefix) = self.fail_on.lock().unwrap().as_deref() {
            if line.starts_with(prefix) {
                return Err(PlrError::Command(format!("rejected: {line}")));
            }
        }
        self.lines.lock().unwrap().push(line.to_string());
        Ok(())
    }

    fn wait_until_idle(&self) -> Result<()> {
        self.lines.lock().unwrap().push("<idle>".to_string());
        Ok(())
    }
}

/// Memory store whose writes can be switched to fail.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl KeyValueStore for FlakyStore {
    fn put(&self, key: &str, value: &str) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PlrError::io(
                "writing variables",
                std::io::Error::new(std::io::ErrorKind::Other, "simulated write failure"),
            ));
        }
        self.inner.put(key, value)
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key)
    }
}
