//! Resume orchestration.
//!
//! Epistemic foundation:
//! - K_i: Resume starts from the persisted checkpoint only, never from memory
//! - K_i: Checkpointing is suspended from resume-file creation until Z resume completes
//! - B_i: Restoration steps are independent → one failing step does not stop the rest
//! - I^R: Hook lines and the chamber heater come from configuration

mod rewriter;

pub use rewriter::*;

use crate::checkpoint::{CheckpointStore, KeyValueStore, SnapshotValidator};
use crate::models::{PlrError, RecoveryConfig, Result, Snapshot};
use crate::providers::{CommandExecutor, Providers};
use crate::scheduler::SchedulerHandle;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Stepper whose calibrated height is stored.
pub const Z_STEPPER: &str = "stepper_z";

/// `PLR_Z_HOME` mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZHomeMode {
    /// Store the given height and move there
    Calibrate,
    /// Move to the stored height and restore machine context
    Resume,
}

impl FromStr for ZHomeMode {
    type Err = PlrError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CALIBRATE" => Ok(Self::Calibrate),
            "RESUME" => Ok(Self::Resume),
            _ => Err(PlrError::InvalidInput(
                "MODE must be either CALIBRATE or RESUME".to_string(),
            )),
        }
    }
}

/// What a resume produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumeReport {
    pub file_name: String,
    pub path: PathBuf,
    pub offset: u64,
    pub progress_pct: f64,
    pub active_tool: String,
    pub chamber_temp: f64,
}

impl fmt::Display for ResumeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let basename = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        writeln!(f, "Created and started power loss recovery file: {basename}")?;
        writeln!(f, "Original file: {}", self.file_name)?;
        writeln!(
            f,
            "Resume position: {} ({:.1}%)",
            self.offset, self.progress_pct
        )?;
        writeln!(f, "Active extruder: {}", self.active_tool)?;
        write!(f, "Chamber temperature: {:.1}°C", self.chamber_temp)
    }
}

pub struct Recovery {
    config: RecoveryConfig,
    gcode_dir: PathBuf,
    store: CheckpointStore<dyn KeyValueStore>,
    validator: SnapshotValidator,
    rewriter: ResumeRewriter,
    executor: Arc<dyn CommandExecutor>,
    providers: Option<Providers>,
    scheduler: Option<SchedulerHandle>,
}

impl Recovery {
    pub fn new(
        config: RecoveryConfig,
        gcode_dir: PathBuf,
        store: CheckpointStore<dyn KeyValueStore>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        let validator = SnapshotValidator::new(config.tools.clone());
        let rewriter = ResumeRewriter::new(
            config.chamber_heater().map(str::to_string),
            config.restart_lines(),
        );
        Self {
            config,
            gcode_dir,
            store,
            validator,
            rewriter,
            executor,
            providers: None,
            scheduler: None,
        }
    }

    /// Live machine state, needed for the Z-homed check.
    pub fn with_providers(mut self, providers: Providers) -> Self {
        self.providers = Some(providers);
        self
    }

    /// Scheduler to suspend while a resume is in progress.
    pub fn with_scheduler(mut self, handle: SchedulerHandle) -> Self {
        self.scheduler = Some(handle);
        self
    }

    /// Suspend checkpointing. A scheduler that cannot be told blocks the resume.
    fn acquire_guard(&self) -> Result<()> {
        match &self.scheduler {
            Some(handle) => handle.notify_resuming(true),
            None => Ok(()),
        }
    }

    fn release_guard(&self) {
        if let Some(handle) = &self.scheduler {
            if let Err(e) = handle.notify_resuming(false) {
                warn!(error = %e, "Could not lift resume guard");
            }
        }
    }

    fn run_line(&self, line: &str) -> Result<()> {
        debug!(line, "Issuing instruction");
        self.executor.run(line)
    }

    /// The stored checkpoint, re-validated.
    pub fn saved_checkpoint(&self) -> Result<Snapshot> {
        self.store
            .load(&self.validator)?
            .map(|checkpoint| checkpoint.snapshot)
            .ok_or(PlrError::NoCheckpoint)
    }

    /// Rewrite the checkpointed job file and start it.
    pub fn resume_job(&self) -> Result<ResumeReport> {
        self.acquire_guard()?;
        let result = self.try_resume_job();
        if result.is_err() {
            self.release_guard();
        }
        result
    }

    fn try_resume_job(&self) -> Result<ResumeReport> {
        let snapshot = self.saved_checkpoint()?;
        let original = self.gcode_dir.join(&snapshot.file_name);
        if !original.is_file() {
            return Err(PlrError::FileNotFound(original));
        }

        let offset = snapshot.file_progress.position;
        let path = self
            .rewriter
            .rewrite(&original, offset, &ResumeContext::from(&snapshot))?;

        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| PlrError::Internal(format!("No file name in {}", path.display())))?;

        if let Err(e) = self.run_line(&format!("SDCARD_PRINT_FILE FILENAME=\"{basename}\"")) {
            warn!(error = %e, "Starting resume job failed, restoring original");
            if let Err(restore_err) = restore_original(&self.gcode_dir, &snapshot.file_name) {
                warn!(error = %restore_err, "Restoring original after failed start");
            }
            return Err(e);
        }

        info!(file = %snapshot.file_name, offset, "Resume job started");
        Ok(ResumeReport {
            file_name: snapshot.file_name,
            path,
            offset,
            progress_pct: snapshot.file_progress.progress_pct,
            active_tool: snapshot.active_tool,
            chamber_temp: snapshot.chamber_temp,
        })
    }

    /// Put the original job file back after completion or cancellation.
    pub fn restore_original(&self, filename: &str) -> Result<bool> {
        restore_original(&self.gcode_dir, filename)
    }

    /// `PLR_Z_HOME`: calibrate or restore the Z height. Returns the target Z.
    pub fn z_home(&self, mode: ZHomeMode, z: Option<f64>) -> Result<f64> {
        let before = match mode {
            ZHomeMode::Calibrate => self.config.before_calibrate_lines(),
            ZHomeMode::Resume => self.config.before_resume_lines(),
        };
        for line in &before {
            self.run_line(line)
                .map_err(|e| PlrError::Command(format!("Pre-operation hook failed: {e}")))?;
            self.executor.wait_until_idle()?;
        }

        let providers = self
            .providers
            .as_ref()
            .ok_or_else(|| PlrError::InvalidInput("Homing state unavailable".to_string()))?;
        let homed = providers
            .position
            .homed_axes(providers.now())
            .unwrap_or_default();
        if !homed.to_ascii_lowercase().contains('z') {
            return Err(PlrError::InvalidInput("Must home Z first".to_string()));
        }

        let target = match mode {
            ZHomeMode::Calibrate => {
                let z = z.ok_or_else(|| {
                    PlrError::InvalidInput("Z is required in CALIBRATE mode".to_string())
                })?;
                self.store.save_z_offset(Z_STEPPER, z)?;
                z
            }
            ZHomeMode::Resume => self
                .store
                .load_z_offset(Z_STEPPER)?
                .ok_or_else(|| PlrError::InvalidInput("No saved Z height".to_string()))?,
        };

        self.run_line("G90")?;
        self.run_line(&format!(
            "G1 Z{target:.3} F{:.0}",
            self.config.slow_homing_speed * 60.0
        ))?;
        self.executor.wait_until_idle()?;

        let after = match mode {
            ZHomeMode::Calibrate => self.config.after_calibrate_lines(),
            ZHomeMode::Resume => self.config.after_resume_lines(),
        };
        for line in &after {
            let ran = self
                .run_line(line)
                .and_then(|()| self.executor.wait_until_idle());
            if let Err(e) = ran {
                warn!(line = %line, error = %e, "Post-operation hook failed");
            }
        }

        if mode == ZHomeMode::Resume {
            match self.saved_checkpoint() {
                Ok(snapshot) => self.restore_context(&snapshot),
                Err(e) => warn!(error = %e, "No checkpoint to restore context from"),
            }
            self.release_guard();
        }

        info!(?mode, z = target, "Z home completed");
        Ok(target)
    }

    /// Instructions that bring back fans, offsets, tool and chamber heat.
    pub fn context_commands(&self, snapshot: &Snapshot) -> Vec<String> {
        let mut commands = Vec::new();

        let tool_fan = format!("{}_fan", snapshot.active_tool);
        for name in &self.config.part_cooling_fans {
            let Some(speed) = snapshot.actuator_speeds.get(name) else {
                continue;
            };
            if name == "fan" || *name == tool_fan {
                let byte = (speed * 255.0 + 0.5).clamp(0.0, 255.0) as u8;
                commands.push(format!("M106 P0 S{byte}"));
            } else {
                commands.push(format!("SET_FAN_SPEED FAN={name} SPEED={speed}"));
            }
        }

        let offsets = &snapshot.coordinate_offsets;
        commands.push(format!(
            "SET_GCODE_OFFSET X={} Y={} Z={}",
            offsets.x, offsets.y, offsets.z
        ));

        if self.config.tools.iter().any(|t| *t == snapshot.active_tool) {
            commands.push(format!("ACTIVATE_EXTRUDER EXTRUDER={}", snapshot.active_tool));
        }

        if let Some(heater) = self.config.chamber_heater() {
            if snapshot.chamber_temp > 0.0 {
                commands.push(format!(
                    "SET_HEATER_TEMPERATURE HEATER={heater} TARGET={:.1}",
                    snapshot.chamber_temp
                ));
            }
        }

        commands
    }

    /// Issue every context instruction, continuing past failures.
    pub fn restore_context(&self, snapshot: &Snapshot) {
        for command in self.context_commands(snapshot) {
            if let Err(e) = self.run_line(&command) {
                warn!(command = %command, error = %e, "Context restoration step failed");
            }
        }
    }

    pub fn save_mesh(&self, profile: &str) -> Result<()> {
        let profile = profile.trim();
        if profile.is_empty() {
            return Err(PlrError::InvalidInput(
                "No bed mesh profile currently active".to_string(),
            ));
        }
        self.store.save_mesh_profile(profile)?;
        info!(profile, "Saved bed mesh profile");
        Ok(())
    }

    /// Load the saved mesh profile if it is among `available`.
    pub fn load_mesh(&self, available: &[String]) -> Result<String> {
        let profile = self
            .store
            .load_mesh_profile()?
            .ok_or_else(|| PlrError::InvalidInput("No saved bed mesh profile found".to_string()))?;
        if !available.iter().any(|p| *p == profile) {
            return Err(PlrError::InvalidInput(format!(
                "Profile '{profile}' not found in bed_mesh profiles"
            )));
        }
        self.run_line(&format!("BED_MESH_PROFILE LOAD={profile}"))?;
        info!(profile = %profile, "Loaded bed mesh profile");
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryStore;
    use crate::models::{sample_snapshot, FileProgress, PersistedCheckpoint, Position, QueueStatus};
    use crate::providers::testing::{FakeMachine, RecordingExecutor};
    use crate::scheduler::SchedulerEvent;
    use std::fs;
    use tempfile::TempDir;

    const JOB: &str = "G28\nG1 X10 Y10\nG1 X20 Y20 E1.5\nG1 X30 Y30 E3.0\nM104 S0\n";

    struct Rig {
        dir: TempDir,
        memory: Arc<MemoryStore>,
        executor: Arc<RecordingExecutor>,
        machine: FakeMachine,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                dir: TempDir::new().unwrap(),
                memory: Arc::new(MemoryStore::new()),
                executor: Arc::new(RecordingExecutor::new()),
                machine: FakeMachine::new(),
            }
        }

        fn store(&self) -> CheckpointStore<dyn KeyValueStore> {
            CheckpointStore::new(Arc::clone(&self.memory) as Arc<dyn KeyValueStore>)
        }

        fn recovery(&self, config: RecoveryConfig) -> Recovery {
            Recovery::new(
                config,
                self.dir.path().to_path_buf(),
                self.store(),
                Arc::clone(&self.executor) as Arc<dyn CommandExecutor>,
            )
            .with_providers(self.machine.providers())
        }

        fn save_checkpoint(&self, snapshot: Snapshot) {
            self.store()
                .save(&PersistedCheckpoint::new(snapshot, QueueStatus::default()))
                .unwrap();
        }
    }

    fn job_snapshot() -> Snapshot {
        let mut snapshot = sample_snapshot(10.0);
        snapshot.file_name = "part.gcode".to_string();
        snapshot.file_progress = FileProgress::new(20, JOB.len() as u64);
        snapshot.coordinate_offsets = Position::new(0.0, 0.0, 0.05);
        snapshot
    }

    fn config() -> RecoveryConfig {
        RecoveryConfig {
            part_cooling_fans: vec!["fan".to_string(), "aux_fan".to_string()],
            chamber_heater: Some("chamber".to_string()),
            ..RecoveryConfig::default()
        }
    }

    #[test]
    fn test_resume_job_rewrites_and_starts() {
        let rig = Rig::new();
        let job = rig.dir.path().join("part.gcode");
        fs::write(&job, JOB).unwrap();
        rig.save_checkpoint(job_snapshot());

        let (handle, mut rx) = SchedulerHandle::channel(4);
        let recovery = rig.recovery(config()).with_scheduler(handle);
        let report = recovery.resume_job().unwrap();

        assert_eq!(report.offset, 20);
        assert_eq!(report.path, job);
        assert!(report.to_string().contains("Original file: part.gcode"));
        assert_eq!(
            rig.executor.lines(),
            vec!["SDCARD_PRINT_FILE FILENAME=\"part.gcode\"".to_string()]
        );
        assert!(fs::read_to_string(&job).unwrap().contains(RESUME_SENTINEL));
        assert!(backup_path(&job).exists());
        assert!(matches!(
            rx.try_recv().unwrap(),
            SchedulerEvent::SetResuming(true)
        ));

        assert!(recovery.restore_original("part.gcode").unwrap());
        assert_eq!(fs::read_to_string(&job).unwrap(), JOB);
    }

    #[test]
    fn test_resume_without_checkpoint() {
        let rig = Rig::new();
        let (handle, mut rx) = SchedulerHandle::channel(4);
        let recovery = rig.recovery(config()).with_scheduler(handle);

        assert!(matches!(recovery.resume_job(), Err(PlrError::NoCheckpoint)));
        assert!(matches!(rx.try_recv().unwrap(), SchedulerEvent::SetResuming(true)));
        assert!(matches!(rx.try_recv().unwrap(), SchedulerEvent::SetResuming(false)));
        assert!(rig.executor.lines().is_empty());
    }

    #[test]
    fn test_resume_refused_when_guard_cannot_be_set() {
        let rig = Rig::new();
        let job = rig.dir.path().join("part.gcode");
        fs::write(&job, JOB).unwrap();
        rig.save_checkpoint(job_snapshot());

        let (handle, mut rx) = SchedulerHandle::channel(1);
        handle.notify_resuming(false).unwrap();
        let recovery = rig.recovery(config()).with_scheduler(handle);

        assert!(matches!(recovery.resume_job(), Err(PlrError::Internal(_))));
        assert_eq!(fs::read_to_string(&job).unwrap(), JOB);
        assert!(!backup_path(&job).exists());
        assert!(rig.executor.lines().is_empty());
        assert!(matches!(rx.try_recv().unwrap(), SchedulerEvent::SetResuming(false)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_resume_with_missing_job_file() {
        let rig = Rig::new();
        rig.save_checkpoint(job_snapshot());
        let result = rig.recovery(config()).resume_job();
        assert!(matches!(result, Err(PlrError::FileNotFound(_))));
    }

    #[test]
    fn test_failed_start_restores_original() {
        let rig = Rig::new();
        let job = rig.dir.path().join("part.gcode");
        fs::write(&job, JOB).unwrap();
        rig.save_checkpoint(job_snapshot());
        rig.executor.fail_on("SDCARD_PRINT_FILE");

        assert!(rig.recovery(config()).resume_job().is_err());
        assert_eq!(fs::read_to_string(&job).unwrap(), JOB);
        assert!(!backup_path(&job).exists());
    }

    #[test]
    fn test_z_calibrate_runs_hooks_and_stores_height() {
        let rig = Rig::new();
        let recovery = rig.recovery(RecoveryConfig {
            before_calibrate_gcode: "G28 Z\n".to_string(),
            after_calibrate_gcode: "M84 X Y".to_string(),
            ..config()
        });

        let z = recovery.z_home(ZHomeMode::Calibrate, Some(12.5)).unwrap();
        assert_eq!(z, 12.5);
        assert_eq!(
            rig.executor.lines(),
            vec![
                "G28 Z".to_string(),
                "<idle>".to_string(),
                "G90".to_string(),
                "G1 Z12.500 F120".to_string(),
                "<idle>".to_string(),
                "M84 X Y".to_string(),
                "<idle>".to_string(),
            ]
        );
        assert_eq!(rig.store().load_z_offset(Z_STEPPER).unwrap(), Some(12.5));
    }

    #[test]
    fn test_z_home_requires_homed_z() {
        let rig = Rig::new();
        rig.machine.set_homed("xy");
        let result = rig.recovery(config()).z_home(ZHomeMode::Calibrate, Some(3.0));
        assert!(matches!(result, Err(PlrError::InvalidInput(_))));
        assert_eq!(rig.store().load_z_offset(Z_STEPPER).unwrap(), None);
    }

    #[test]
    fn test_z_resume_restores_context_and_clears_guard() {
        let rig = Rig::new();
        let mut snapshot = job_snapshot();
        snapshot.chamber_temp = 40.0;
        snapshot.actuator_speeds = [("fan".to_string(), 0.5), ("aux_fan".to_string(), 0.25)]
            .into_iter()
            .collect();
        rig.save_checkpoint(snapshot);
        rig.store().save_z_offset(Z_STEPPER, 7.25).unwrap();
        rig.executor.fail_on("SET_FAN_SPEED");

        let (handle, mut rx) = SchedulerHandle::channel(4);
        let recovery = rig.recovery(config()).with_scheduler(handle);
        assert_eq!(recovery.z_home(ZHomeMode::Resume, None).unwrap(), 7.25);

        let lines = rig.executor.lines();
        assert!(lines.contains(&"G1 Z7.250 F120".to_string()));
        assert!(lines.contains(&"M106 P0 S128".to_string()));
        assert!(lines.contains(&"SET_GCODE_OFFSET X=0 Y=0 Z=0.05".to_string()));
        assert!(lines.contains(&"ACTIVATE_EXTRUDER EXTRUDER=extruder".to_string()));
        assert!(lines.contains(&"SET_HEATER_TEMPERATURE HEATER=chamber TARGET=40.0".to_string()));
        assert!(matches!(rx.try_recv().unwrap(), SchedulerEvent::SetResuming(false)));
    }

    #[test]
    fn test_z_resume_without_saved_height() {
        let rig = Rig::new();
        let result = rig.recovery(config()).z_home(ZHomeMode::Resume, None);
        assert!(matches!(result, Err(PlrError::InvalidInput(_))));
    }

    #[test]
    fn test_context_commands_skip_unknown_tool_and_cold_chamber() {
        let rig = Rig::new();
        let recovery = rig.recovery(RecoveryConfig {
            part_cooling_fans: vec!["extruder1_fan".to_string()],
            ..config()
        });
        let mut snapshot = job_snapshot();
        snapshot.active_tool = "extruder1".to_string();
        snapshot.actuator_speeds = [("extruder1_fan".to_string(), 1.0)].into_iter().collect();

        assert_eq!(
            recovery.context_commands(&snapshot),
            vec![
                "M106 P0 S255".to_string(),
                "SET_GCODE_OFFSET X=0 Y=0 Z=0.05".to_string(),
            ]
        );
    }

    #[test]
    fn test_mesh_profile_roundtrip() {
        let rig = Rig::new();
        let recovery = rig.recovery(config());
        let available = vec!["default".to_string(), "hot".to_string()];

        assert!(recovery.load_mesh(&available).is_err());
        assert!(recovery.save_mesh("  ").is_err());

        recovery.save_mesh("hot").unwrap();
        assert_eq!(recovery.load_mesh(&available).unwrap(), "hot");
        assert_eq!(
            rig.executor.lines(),
            vec!["BED_MESH_PROFILE LOAD=hot".to_string()]
        );

        assert!(recovery.load_mesh(&["default".to_string()]).is_err());
    }

    #[test]
    fn test_z_home_mode_parse() {
        assert_eq!("calibrate".parse::<ZHomeMode>().unwrap(), ZHomeMode::Calibrate);
        assert_eq!(" RESUME ".parse::<ZHomeMode>().unwrap(), ZHomeMode::Resume);
        assert!("home".parse::<ZHomeMode>().is_err());
    }
}
