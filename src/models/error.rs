//! Error types for plr.
//!
//! Epistemic taxonomy:
//! - B_i falsified: Expected failures (no checkpoint, missing file, bad input)
//! - I^B materialized: Infrastructure failures (store write, file rewrite, host command)
//! - K_i violated: Internal invariant violations (bugs)

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for plr.
#[derive(Debug, Error)]
pub enum PlrError {
    // ═══════════════════════════════════════════════════════════════════
    // B_i FALSIFIED - Belief proven wrong (expected failures)
    // ═══════════════════════════════════════════════════════════════════

    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Insufficient history: need index {requested}, have {available} entries")]
    InsufficientHistory { requested: usize, available: usize },

    #[error("No valid saved checkpoint found")]
    NoCheckpoint,

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    // ═══════════════════════════════════════════════════════════════════
    // I^B MATERIALIZED - Bounded ignorance became known-bad
    // ═══════════════════════════════════════════════════════════════════

    #[error("Host command failed: {0}")]
    Command(String),

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // ═══════════════════════════════════════════════════════════════════
    // K_i VIOLATED - Invariant broken (bug, should not happen)
    // ═══════════════════════════════════════════════════════════════════

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Scheduler channel closed")]
    ChannelClosed,
}

impl PlrError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Whether the next scheduling tick may succeed where this one failed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::InsufficientHistory { .. }
        )
    }
}

/// Reasons a snapshot fails validation.
///
/// K_i: Each variant names the first rule that was violated.
/// B_i: Malformed input is an expected outcome, never a panic.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("State must be an object")]
    NotAnObject,

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Field {0} has wrong type")]
    WrongType(&'static str),

    #[error("Missing subfield {subfield} in {field}")]
    MissingSubfield {
        field: &'static str,
        subfield: &'static str,
    },

    #[error("Subfield {subfield} in {field} has wrong type")]
    WrongSubfieldType {
        field: &'static str,
        subfield: &'static str,
    },

    #[error("File size cannot be negative: {0}")]
    NegativeFileSize(i64),

    #[error("Progress percentage must be between 0 and 100, got {0}")]
    ProgressOutOfRange(f64),

    #[error("Layer number cannot be negative: {0}")]
    NegativeLayer(i64),

    #[error("{field} out of range: {value} not in [-273.15, {max}]")]
    TemperatureOutOfRange {
        field: &'static str,
        value: f64,
        max: f64,
    },

    #[error("Active tool {0} not in configured tool set")]
    UnknownTool(String),
}

impl ValidationError {
    /// The snapshot field this error cites.
    pub fn field(&self) -> &'static str {
        match self {
            Self::NotAnObject => "state",
            Self::MissingField(f) | Self::WrongType(f) => f,
            Self::MissingSubfield { field, .. } | Self::WrongSubfieldType { field, .. } => field,
            Self::NegativeFileSize(_) | Self::ProgressOutOfRange(_) => "file_progress",
            Self::NegativeLayer(_) => "layer",
            Self::TemperatureOutOfRange { field, .. } => field,
            Self::UnknownTool(_) => "active_tool",
        }
    }
}

/// Result type alias for plr.
pub type Result<T> = std::result::Result<T, PlrError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_cites_field() {
        let err = ValidationError::TemperatureOutOfRange {
            field: "bed_temp",
            value: 250.0,
            max: 200.0,
        };
        assert_eq!(err.field(), "bed_temp");
        assert!(err.to_string().contains("bed_temp"));

        let err = ValidationError::MissingSubfield {
            field: "position",
            subfield: "z",
        };
        assert_eq!(err.field(), "position");
        assert_eq!(err.to_string(), "Missing subfield z in position");
    }

    #[test]
    fn test_transient_errors() {
        assert!(PlrError::io(
            "writing variables file",
            std::io::Error::new(std::io::ErrorKind::Other, "disk full")
        )
        .is_transient());
        assert!(PlrError::InsufficientHistory {
            requested: 2,
            available: 1
        }
        .is_transient());
        assert!(!PlrError::NoCheckpoint.is_transient());
    }
}
