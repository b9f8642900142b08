//! Snapshot validation.
//!
//! Epistemic foundation:
//! - K_i: Validation is pure and side-effect-free
//! - K_i: The first violated rule is reported, nothing else
//! - B_i: Stored checkpoints may be hand-edited or truncated → checks run on
//!   the JSON value, not on the typed struct
//! - I^B: Malformed input is a normal outcome → Err, never a panic

use crate::models::{Snapshot, ValidationError};
use serde_json::{Map, Value};

/// Absolute zero in °C, the lower bound for every temperature.
pub const ABSOLUTE_ZERO: f64 = -273.15;
pub const MAX_HOTEND_TEMP: f64 = 500.0;
pub const MAX_BED_TEMP: f64 = 200.0;
pub const MAX_CHAMBER_TEMP: f64 = 100.0;

#[derive(Clone, Copy)]
enum Kind {
    Number,
    Integer,
    Text,
    Object,
}

impl Kind {
    fn matches(self, value: &Value) -> bool {
        match self {
            Kind::Number => value.is_number(),
            Kind::Integer => value.is_i64() || value.is_u64(),
            Kind::Text => value.is_string(),
            Kind::Object => value.is_object(),
        }
    }
}

const REQUIRED_FIELDS: &[(&str, Kind)] = &[
    ("position", Kind::Object),
    ("layer", Kind::Integer),
    ("layer_height", Kind::Number),
    ("file_progress", Kind::Object),
    ("collection_time", Kind::Number),
    ("hotend_temp", Kind::Number),
    ("bed_temp", Kind::Number),
    ("chamber_temp", Kind::Number),
    ("active_tool", Kind::Text),
    ("file_name", Kind::Text),
];

const POSITION_FIELDS: &[(&str, Kind)] = &[
    ("x", Kind::Number),
    ("y", Kind::Number),
    ("z", Kind::Number),
];

const PROGRESS_FIELDS: &[(&str, Kind)] = &[
    ("position", Kind::Integer),
    ("total_size", Kind::Integer),
    ("progress_pct", Kind::Number),
];

const TEMPERATURE_CAPS: &[(&str, f64)] = &[
    ("hotend_temp", MAX_HOTEND_TEMP),
    ("bed_temp", MAX_BED_TEMP),
    ("chamber_temp", MAX_CHAMBER_TEMP),
];

/// Validates snapshots against the configured tool set.
#[derive(Debug, Clone)]
pub struct SnapshotValidator {
    tools: Vec<String>,
}

impl SnapshotValidator {
    pub fn new(tools: Vec<String>) -> Self {
        Self { tools }
    }

    /// Validate a typed snapshot.
    pub fn validate(&self, snapshot: &Snapshot) -> Result<(), ValidationError> {
        let value = serde_json::to_value(snapshot).map_err(|_| ValidationError::NotAnObject)?;
        self.validate_value(&value)
    }

    /// Validate an untyped snapshot, as read back from storage.
    pub fn validate_value(&self, value: &Value) -> Result<(), ValidationError> {
        let state = value.as_object().ok_or(ValidationError::NotAnObject)?;

        for &(field, kind) in REQUIRED_FIELDS {
            let entry = state
                .get(field)
                .ok_or(ValidationError::MissingField(field))?;
            if !kind.matches(entry) {
                return Err(ValidationError::WrongType(field));
            }
        }

        check_subfields(state, "position", POSITION_FIELDS)?;
        check_subfields(state, "file_progress", PROGRESS_FIELDS)?;

        let progress = &state["file_progress"];
        if let Some(size) = progress["total_size"].as_i64().filter(|s| *s < 0) {
            return Err(ValidationError::NegativeFileSize(size));
        }

        let pct = progress["progress_pct"].as_f64().unwrap_or(f64::NAN);
        if !(0.0..=100.0).contains(&pct) {
            return Err(ValidationError::ProgressOutOfRange(pct));
        }

        if let Some(layer) = state["layer"].as_i64().filter(|l| *l < 0) {
            return Err(ValidationError::NegativeLayer(layer));
        }

        for &(field, max) in TEMPERATURE_CAPS {
            let value = state[field].as_f64().unwrap_or(f64::NAN);
            if !(ABSOLUTE_ZERO..=max).contains(&value) {
                return Err(ValidationError::TemperatureOutOfRange { field, value, max });
            }
        }

        let tool = state["active_tool"].as_str().unwrap_or_default();
        if !self.tools.iter().any(|t| t == tool) {
            return Err(ValidationError::UnknownTool(tool.to_string()));
        }

        Ok(())
    }
}

fn check_subfields(
    state: &Map<String, Value>,
    field: &'static str,
    subfields: &[(&'static str, Kind)],
) -> Result<(), ValidationError> {
    let nested = &state[field];
    for &(subfield, kind) in subfields {
        let entry = nested
            .get(subfield)
            .ok_or(ValidationError::MissingSubfield { field, subfield })?;
        if !kind.matches(entry) {
            return Err(ValidationError::WrongSubfieldType { field, subfield });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::sample_snapshot;
    use serde_json::json;

    fn validator() -> SnapshotValidator {
        SnapshotValidator::new(vec!["extruder".to_string(), "extruder1".to_string()])
    }

    fn valid_value() -> Value {
        serde_json::to_value(sample_snapshot(10.0)).unwrap()
    }

    #[test]
    fn test_well_formed_snapshots_pass() {
        let v = validator();
        v.validate(&sample_snapshot(1.0)).unwrap();

        for (hotend, bed, chamber) in [
            (ABSOLUTE_ZERO, ABSOLUTE_ZERO, ABSOLUTE_ZERO),
            (500.0, 200.0, 100.0),
            (0.0, 0.0, 0.0),
        ] {
            let mut snapshot = sample_snapshot(1.0);
            snapshot.hotend_temp = hotend;
            snapshot.bed_temp = bed;
            snapshot.chamber_temp = chamber;
            snapshot.active_tool = "extruder1".to_string();
            v.validate(&snapshot).unwrap();
        }
    }

    #[test]
    fn test_each_out_of_range_field_is_cited() {
        let v = validator();
        let cases = [
            ("layer", "/layer", json!(-1)),
            ("file_progress", "/file_progress/total_size", json!(-5)),
            ("file_progress", "/file_progress/progress_pct", json!(100.5)),
            ("hotend_temp", "/hotend_temp", json!(501.0)),
            ("bed_temp", "/bed_temp", json!(-300.0)),
            ("chamber_temp", "/chamber_temp", json!(100.1)),
            ("active_tool", "/active_tool", json!("tool9")),
        ];

        for (field, pointer, bad) in cases {
            let mut value = valid_value();
            *value.pointer_mut(pointer).unwrap() = bad;
            let err = v.validate_value(&value).unwrap_err();
            assert_eq!(err.field(), field, "unexpected error: {err}");
        }
    }

    #[test]
    fn test_missing_and_mistyped_fields() {
        let v = validator();

        let mut value = valid_value();
        value.as_object_mut().unwrap().remove("bed_temp");
        assert_eq!(
            v.validate_value(&value),
            Err(ValidationError::MissingField("bed_temp"))
        );

        let mut value = valid_value();
        value["layer"] = json!(2.5);
        assert_eq!(
            v.validate_value(&value),
            Err(ValidationError::WrongType("layer"))
        );

        let mut value = valid_value();
        value["position"].as_object_mut().unwrap().remove("z");
        assert_eq!(
            v.validate_value(&value),
            Err(ValidationError::MissingSubfield {
                field: "position",
                subfield: "z"
            })
        );

        let mut value = valid_value();
        value["file_progress"]["position"] = json!("12");
        assert_eq!(
            v.validate_value(&value),
            Err(ValidationError::WrongSubfieldType {
                field: "file_progress",
                subfield: "position"
            })
        );
    }

    #[test]
    fn test_non_object_is_rejected() {
        let v = validator();
        assert_eq!(
            v.validate_value(&json!([1, 2, 3])),
            Err(ValidationError::NotAnObject)
        );
        assert_eq!(
            v.validate_value(&json!({})),
            Err(ValidationError::MissingField("position"))
        );
    }
}
