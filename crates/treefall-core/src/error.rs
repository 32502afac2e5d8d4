//! Error types for the disturbance monitoring engine.

use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Error types for engine operations.
///
/// Boundary failures (misaligned rasters, malformed stacks, wrong band
/// counts) are fatal for a stage. Per-pixel numeric failures
/// ([`EngineError::SingularSystem`], [`EngineError::TooFewObservations`])
/// stay pixel-local: the engines map them to nodata and keep going.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Rasters are not aligned: {field} differs ({left} vs {right})")]
    Misaligned {
        field: &'static str,
        left: String,
        right: String,
    },

    #[error("Input images must be ordered by date (earliest to latest); image {0} is out of order")]
    UnorderedStack(usize),

    #[error("Input images should be from the same year; image {0} is not")]
    MixedYears(usize),

    #[error("Input images must not include data from year {} or later; image {} is from {}", .target + 1, .index, .year)]
    ImageAfterTargetYear {
        index: usize,
        year: i32,
        target: i32,
    },

    #[error("No input image from year {0} is given")]
    MissingTargetYear(i32),

    #[error("Coefficients raster has {actual} bands, expected {expected}")]
    CoefficientBands { expected: usize, actual: usize },

    #[error("Statistics raster has {0} bands, expected at least 2")]
    StatisticsBands(usize),

    #[error("Reference-period raster has {0} bands, expected 2")]
    ReferencePeriodBands(usize),

    #[error("Band {band} out of range for input with {available} bands")]
    BandOutOfRange { band: usize, available: usize },

    #[error("No date found in file name '{0}'")]
    UndatedFileName(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not enough observations: need more than {needed}, got {got}")]
    TooFewObservations { needed: usize, got: usize },

    #[error("Singular design matrix")]
    SingularSystem,
}
