//! Snapshot and checkpoint types for plr.
//!
//! K_i: These types represent the core data flow through the checkpoint engine.
//! K_i: A snapshot is captured once, against one timestamp, and never mutated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Cartesian triple in millimetres.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Sum of absolute per-axis differences.
    pub fn manhattan_distance(&self, other: &Position) -> f64 {
        (self.x - other.x).abs() + (self.y - other.y).abs() + (self.z - other.z).abs()
    }
}

impl From<(f64, f64, f64)> for Position {
    fn from((x, y, z): (f64, f64, f64)) -> Self {
        Self { x, y, z }
    }
}

/// Progress through the instruction file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FileProgress {
    /// Byte offset of the next unread byte
    pub position: u64,
    /// Total file size in bytes
    pub total_size: u64,
    /// `position / total_size * 100`, clamped to [0, 100]
    pub progress_pct: f64,
}

impl FileProgress {
    /// Derive the percentage from position and size.
    ///
    /// K_i: An empty file reports 0%.
    pub fn new(position: u64, total_size: u64) -> Self {
        let progress_pct = if total_size > 0 {
            let pct = position as f64 / total_size as f64 * 100.0;
            round_to(pct.clamp(0.0, 100.0), 2)
        } else {
            0.0
        };
        Self {
            position,
            total_size,
            progress_pct,
        }
    }
}

/// Hot-end, bed and chamber temperatures in °C.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Temperatures {
    pub hotend: f64,
    pub bed: f64,
    pub chamber: f64,
}

/// One consistent capture of job and machine state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Toolhead position
    pub position: Position,

    /// Per-axis coordinate-system offsets
    pub coordinate_offsets: Position,

    /// Auxiliary actuator name → intensity (0.0–1.0)
    #[serde(default)]
    pub actuator_speeds: BTreeMap<String, f64>,

    /// Current layer index
    pub layer: i64,

    /// Cumulative layer height
    pub layer_height: f64,

    /// Progress through the job file
    pub file_progress: FileProgress,

    /// Active secondary tool
    pub active_tool: String,

    pub hotend_temp: f64,
    pub bed_temp: f64,
    pub chamber_temp: f64,

    /// Monotonic time the snapshot was collected at
    pub collection_time: f64,

    /// Job file name, relative to the job directory
    pub file_name: String,
}

/// Machine-queue status attached to a persisted checkpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Operations queued but not yet executed
    pub pending: u64,
    /// Earliest projected completion time
    pub min_time: f64,
    /// Latest projected completion time
    pub max_time: f64,
}

/// The snapshot that was durably stored, plus queue context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedCheckpoint {
    #[serde(flatten)]
    pub snapshot: Snapshot,

    /// Queue status at save time
    #[serde(default)]
    pub queue_status: QueueStatus,

    /// Wall-clock time of the save
    #[serde(default = "Utc::now")]
    pub saved_at: DateTime<Utc>,
}

impl PersistedCheckpoint {
    pub fn new(snapshot: Snapshot, queue_status: QueueStatus) -> Self {
        Self {
            snapshot,
            queue_status,
            saved_at: Utc::now(),
        }
    }

    pub fn summary(&self) -> CheckpointSummary {
        let s = &self.snapshot;
        CheckpointSummary {
            collection_time: s.collection_time,
            file_name: s.file_name.clone(),
            layer: s.layer,
            file_progress: s.file_progress,
            position: s.position,
            temperatures: Temperatures {
                hotend: s.hotend_temp,
                bed: s.bed_temp,
                chamber: s.chamber_temp,
            },
            active_tool: s.active_tool.clone(),
            saved_at: self.saved_at,
        }
    }
}

/// Read-only view of a persisted checkpoint for status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub collection_time: f64,
    pub file_name: String,
    pub layer: i64,
    pub file_progress: FileProgress,
    pub position: Position,
    pub temperatures: Temperatures,
    pub active_tool: String,
    pub saved_at: DateTime<Utc>,
}

impl fmt::Display for CheckpointSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Collected at: {:.2}", self.collection_time)?;
        writeln!(f, "Saved at: {}", self.saved_at.to_rfc3339())?;
        writeln!(f, "File: {}", self.file_name)?;
        writeln!(f, "Layer: {}", self.layer)?;
        writeln!(
            f,
            "Progress: {:.2}% (Position: {}/{} bytes)",
            self.file_progress.progress_pct, self.file_progress.position, self.file_progress.total_size
        )?;
        writeln!(
            f,
            "Position: X{:.1} Y{:.1} Z{:.1}",
            self.position.x, self.position.y, self.position.z
        )?;
        writeln!(
            f,
            "Temperatures - Hotend: {:.1}°C, Bed: {:.1}°C, Chamber: {:.1}°C",
            self.temperatures.hotend, self.temperatures.bed, self.temperatures.chamber
        )?;
        write!(f, "Active Tool: {}", self.active_tool)
    }
}

/// Round to a fixed number of decimal places.
pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
pub(crate) fn sample_snapshot(collection_time: f64) -> Snapshot {
    Snapshot {
        position: Position::new(100.0, 120.0, 5.2),
        coordinate_offsets: Position::default(),
        actuator_speeds: BTreeMap::from([("fan".to_string(), 0.5)]),
        layer: 26,
        layer_height: 5.2,
        file_progress: FileProgress::new(52_000, 100_000),
        active_tool: "extruder".to_string(),
        hotend_temp: 210.0,
        bed_temp: 60.0,
        chamber_temp: 0.0,
        collection_time,
        file_name: "benchy.gcode".to_string(),
    }
}
