//! Error types for Orthochip

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrthochipError {
    // Request errors
    #[error("Invalid value for {field}: {reason}")]
    Validation { field: String, reason: String },

    // Coverage errors
    #[error("Point ({x:.3}, {y:.3}) is outside catalog coverage")]
    OutOfCoverage { x: f64, y: f64 },

    // Source errors
    #[error("Failed to read source {locator}: {reason}")]
    SourceIo { locator: String, reason: String },

    #[error("Projection from {from} to {to} failed: {reason}")]
    Projection {
        from: String,
        to: String,
        reason: String,
    },

    // Tile state errors
    #[error("Invalid state transition for tile {id}: {reason}")]
    StateTransition { id: String, reason: String },

    // Configuration errors
    #[error("Missing required configuration: {key}")]
    ConfigMissing { key: String },

    #[error("Invalid configuration value for {key}: {reason}")]
    ConfigInvalid { key: String, reason: String },

    #[error("Output path is not a directory: {path}")]
    InvalidOutpath { path: PathBuf },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl OrthochipError {
    /// Shorthand for a request validation failure
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation { field: field.into(), reason: reason.into() }
    }

    /// Shorthand for a source read failure
    pub fn source_io(locator: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::SourceIo { locator: locator.into(), reason: reason.to_string() }
    }

    /// Whether a tile can absorb this error without aborting the batch
    pub fn is_tile_level(&self) -> bool {
        !matches!(
            self,
            Self::ConfigMissing { .. } | Self::ConfigInvalid { .. } | Self::InvalidOutpath { .. }
        )
    }

    /// Whether this is the expected "point not mapped" outcome
    pub fn is_out_of_coverage(&self) -> bool {
        matches!(self, Self::OutOfCoverage { .. })
    }
}

pub type Result<T> = std::result::Result<T, OrthochipError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_level_classification() {
        assert!(OrthochipError::OutOfCoverage { x: 1.0, y: 2.0 }.is_tile_level());
        assert!(OrthochipError::source_io("a.tif", "timeout").is_tile_level());
        assert!(OrthochipError::validation("id", "empty").is_tile_level());
        assert!(!OrthochipError::ConfigInvalid {
            key: "pixel_size".to_string(),
            reason: "bad".to_string()
        }
        .is_tile_level());
    }

    #[test]
    fn test_out_of_coverage_message() {
        let err = OrthochipError::OutOfCoverage { x: 1.0, y: 2.5 };
        assert!(err.is_out_of_coverage());
        assert_eq!(err.to_string(), "Point (1.000, 2.500) is outside catalog coverage");
    }
}
