//! Configuration models for plr.
//!
//! All I^R (resolvable ignorance) is parameterized here.
//! The operator resolves these unknowns at startup via config file.
//! Out-of-bound values are fatal: they surface before the scheduler activates.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for plr.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Checkpointing and resume behaviour
    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// Where state and job files live
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Checkpointing and resume configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Checkpointing enabled at startup (toggled at runtime by admin commands)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Base checkpoint period in seconds (0 disables time-based saving)
    #[serde(default = "default_save_interval")]
    pub save_interval: f64,

    /// Save on every layer boundary
    #[serde(default = "default_true")]
    pub save_on_layer: bool,

    /// Number of snapshots kept in history
    #[serde(default = "default_history_size")]
    pub history_size: usize,

    /// Fallback delay (snapshots back from newest) when lag is unknown
    #[serde(default = "default_save_delay")]
    pub save_delay: usize,

    /// Configured tool set (first entry is the default tool)
    #[serde(default = "default_tools")]
    pub tools: Vec<String>,

    /// Auxiliary actuators whose intensity is captured and restored
    #[serde(default)]
    pub part_cooling_fans: Vec<String>,

    /// Chamber heater name, if the machine has one
    #[serde(default)]
    pub chamber_heater: Option<String>,

    /// Z move speed in mm/s for calibration and resume moves
    #[serde(default = "default_slow_homing_speed")]
    pub slow_homing_speed: f64,

    /// Lines written verbatim into every resume preamble
    #[serde(default)]
    pub restart_gcode: String,

    #[serde(default)]
    pub before_resume_gcode: String,

    #[serde(default)]
    pub after_resume_gcode: String,

    #[serde(default)]
    pub before_calibrate_gcode: String,

    #[serde(default)]
    pub after_calibrate_gcode: String,

    /// Verbose logging
    #[serde(default)]
    pub debug: bool,
}

fn default_save_interval() -> f64 {
    30.0
}

fn default_true() -> bool {
    true
}

fn default_history_size() -> usize {
    5
}

fn default_save_delay() -> usize {
    2
}

fn default_tools() -> Vec<String> {
    vec!["extruder".to_string()]
}

fn default_slow_homing_speed() -> f64 {
    2.0
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            save_interval: default_save_interval(),
            save_on_layer: default_true(),
            history_size: default_history_size(),
            save_delay: default_save_delay(),
            tools: default_tools(),
            part_cooling_fans: Vec::new(),
            chamber_heater: None,
            slow_homing_speed: default_slow_homing_speed(),
            restart_gcode: String::new(),
            before_resume_gcode: String::new(),
            after_resume_gcode: String::new(),
            before_calibrate_gcode: String::new(),
            after_calibrate_gcode: String::new(),
            debug: false,
        }
    }
}

impl RecoveryConfig {
    /// Whether periodic (time-based) saving is on.
    pub fn time_based_enabled(&self) -> bool {
        self.save_interval > 0.0
    }

    /// Chamber heater name, treating an empty string as unset.
    pub fn chamber_heater(&self) -> Option<&str> {
        self.chamber_heater
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    pub fn restart_lines(&self) -> Vec<String> {
        gcode_lines(&self.restart_gcode)
    }

    pub fn before_resume_lines(&self) -> Vec<String> {
        gcode_lines(&self.before_resume_gcode)
    }

    pub fn after_resume_lines(&self) -> Vec<String> {
        gcode_lines(&self.after_resume_gcode)
    }

    pub fn before_calibrate_lines(&self) -> Vec<String> {
        gcode_lines(&self.before_calibrate_gcode)
    }

    pub fn after_calibrate_lines(&self) -> Vec<String> {
        gcode_lines(&self.after_calibrate_gcode)
    }
}

/// Split a multi-line instruction block into trimmed, non-empty lines.
pub fn gcode_lines(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Storage locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Key-value variables file holding the persisted checkpoint
    #[serde(default = "default_variables_file")]
    pub variables_file: PathBuf,

    /// Directory holding job instruction files
    #[serde(default = "default_gcode_dir")]
    pub gcode_dir: PathBuf,
}

fn default_variables_file() -> PathBuf {
    PathBuf::from("~/printer_state_vars.json")
}

fn default_gcode_dir() -> PathBuf {
    PathBuf::from("~/gcode")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            variables_file: default_variables_file(),
            gcode_dir: default_gcode_dir(),
        }
    }
}

impl StorageConfig {
    /// Variables file with `~` and `$VAR` expanded.
    pub fn variables_path(&self) -> Result<PathBuf, ConfigError> {
        expand_path(&self.variables_file)
    }

    /// Job directory with `~` and `$VAR` expanded.
    pub fn gcode_path(&self) -> Result<PathBuf, ConfigError> {
        expand_path(&self.gcode_dir)
    }
}

/// Expand `~` and environment variables in a configured path.
///
/// B_i(variable is set) → Result
pub fn expand_path(path: &Path) -> Result<PathBuf, ConfigError> {
    let raw = path.to_string_lossy();
    shellexpand::full(&raw)
        .map(|expanded| PathBuf::from(expanded.as_ref()))
        .map_err(|e| ConfigError::Expand {
            path: path.to_owned(),
            message: e.to_string(),
        })
}

impl Config {
    /// Load configuration from a TOML file and check its bounds.
    ///
    /// B_i(file exists) → Result
    /// B_i(file is valid TOML) → Result
    /// B_i(values within bounds) → Result
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check every bounded option.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let r = &self.recovery;

        if !(0.0..=300.0).contains(&r.save_interval) {
            return Err(ConfigError::OutOfRange {
                option: "save_interval",
                value: r.save_interval.to_string(),
                bounds: "0 to 300 seconds".to_string(),
            });
        }

        if !(2..=20).contains(&r.history_size) {
            return Err(ConfigError::OutOfRange {
                option: "history_size",
                value: r.history_size.to_string(),
                bounds: "2 to 20".to_string(),
            });
        }

        if r.save_delay > r.history_size - 1 {
            return Err(ConfigError::OutOfRange {
                option: "save_delay",
                value: r.save_delay.to_string(),
                bounds: format!("0 to {}", r.history_size - 1),
            });
        }

        if !(r.slow_homing_speed > 0.0 && r.slow_homing_speed.is_finite()) {
            return Err(ConfigError::OutOfRange {
                option: "slow_homing_speed",
                value: r.slow_homing_speed.to_string(),
                bounds: "above 0".to_string(),
            });
        }

        if r.tools.iter().all(|t| t.trim().is_empty()) {
            return Err(ConfigError::EmptyToolSet);
        }

        Ok(())
    }
}

/// Configuration errors.
///
/// Epistemic origin:
/// - B_i falsified: File not found, parse error
/// - I^R unresolved: Value outside its documented bounds
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Option '{option}' = {value} is out of range ({bounds})")]
    OutOfRange {
        option: &'static str,
        value: String,
        bounds: String,
    },

    #[error("At least one tool must be configured in 'tools'")]
    EmptyToolSet,

    #[error("Failed to expand path {path}: {message}")]
    Expand { path: PathBuf, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert!(config.recovery.time_based_enabled());
        assert_eq!(config.recovery.tools, vec!["extruder".to_string()]);
    }

    #[test]
    fn test_from_file_parses_multiline_gcode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plr.toml");
        std::fs::write(
            &path,
            r#"
[recovery]
save_interval = 15.0
history_size = 8
save_delay = 3
tools = ["extruder", "extruder1"]
chamber_heater = "chamber"
restart_gcode = """
M104 S210

G28 X Y
"""
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.recovery.history_size, 8);
        assert_eq!(config.recovery.chamber_heater(), Some("chamber"));
        assert_eq!(
            config.recovery.restart_lines(),
            vec!["M104 S210".to_string(), "G28 X Y".to_string()]
        );
    }

    #[test]
    fn test_out_of_range_history_is_fatal() {
        let mut config = Config::default();
        config.recovery.history_size = 21;
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::OutOfRange {
                option: "history_size",
                ..
            }
        ));
    }

    #[test]
    fn test_save_delay_bounded_by_history() {
        let mut config = Config::default();
        config.recovery.history_size = 3;
        config.recovery.save_delay = 3;
        assert!(config.validate().is_err());
        config.recovery.save_delay = 2;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_interval_bounds() {
        let mut config = Config::default();
        config.recovery.save_interval = 301.0;
        assert!(config.validate().is_err());
        config.recovery.save_interval = 0.0;
        config.validate().unwrap();
        assert!(!config.recovery.time_based_enabled());
    }

    #[test]
    fn test_blank_chamber_heater_is_unset() {
        let mut config = RecoveryConfig::default();
        config.chamber_heater = Some("  ".to_string());
        assert_eq!(config.chamber_heater(), None);
    }

    #[test]
    fn test_expand_path_env() {
        std::env::set_var("PLR_TEST_GCODE_ROOT", "/srv/jobs");
        let path = expand_path(Path::new("$PLR_TEST_GCODE_ROOT/gcode")).unwrap();
        assert_eq!(path, PathBuf::from("/srv/jobs/gcode"));
    }
}
