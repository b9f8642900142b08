//! Snapshot collection.
//!
//! K_i: Every quantity is read against the same instant.
//! B_i: Any provider may fail → the whole snapshot is `None`, never partial.

use super::Providers;
use crate::models::{round_to, FileProgress, Position, Snapshot};
use std::collections::BTreeMap;
use tracing::debug;

/// Layer progress tracked from layer-boundary events.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LayerTracker {
    pub layer: i64,
    /// Cumulative height reported with the last layer event
    pub height: f64,
}

pub struct SnapshotCollector {
    providers: Providers,
    actuators: Vec<String>,
}

impl SnapshotCollector {
    pub fn new(providers: Providers, actuators: Vec<String>) -> Self {
        Self {
            providers,
            actuators,
        }
    }

    /// Capture a snapshot at instant `at`.
    pub fn collect(&self, at: f64, layers: LayerTracker) -> Option<Snapshot> {
        let snapshot = self.try_collect(at, layers);
        match &snapshot {
            Some(s) => debug!(
                at,
                file = %s.file_name,
                progress_pct = s.file_progress.progress_pct,
                "Collected snapshot"
            ),
            None => debug!(at, "Snapshot collection failed"),
        }
        snapshot
    }

    fn try_collect(&self, at: f64, layers: LayerTracker) -> Option<Snapshot> {
        let p = &self.providers;

        let file_name = p.job.job_filename(at)?;
        let file_progress = FileProgress::new(p.progress.file_position(at)?, p.progress.file_size(at)?);
        let position = rounded(p.position.position(at)?);
        let coordinate_offsets = rounded(p.position.coordinate_offsets(at)?);
        let active_tool = p.position.active_tool(at)?;
        let temps = p.thermal.temperatures(at)?;

        let mut actuator_speeds = BTreeMap::new();
        for name in &self.actuators {
            let Some(speed) = p.thermal.auxiliary_actuator_intensity(name, at) else {
                debug!(actuator = %name, "Actuator query failed");
                return None;
            };
            actuator_speeds.insert(name.clone(), round_to(speed, 3));
        }

        Some(Snapshot {
            position,
            coordinate_offsets,
            actuator_speeds,
            layer: layers.layer,
            layer_height: round_to(layers.height, 3),
            file_progress,
            active_tool,
            hotend_temp: round_to(temps.hotend, 1),
            bed_temp: round_to(temps.bed, 1),
            chamber_temp: round_to(temps.chamber, 1),
            collection_time: at,
            file_name,
        })
    }
}

fn rounded(p: Position) -> Position {
    Position::new(round_to(p.x, 3), round_to(p.y, 3), round_to(p.z, 3))
}
