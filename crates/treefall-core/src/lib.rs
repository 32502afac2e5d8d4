//! Per-pixel harmonic time-series engine for raster disturbance
//! monitoring.
//!
//! This crate provides the Rust implementation of the five batch stages:
//! spectral index, temporal variability, reference-period fitting,
//! disturbance detection, and mask bookkeeping. It operates on fully
//! materialized in-memory rasters; file I/O and command-line handling
//! live in the companion CLI crate.

pub mod date;
pub mod disturbance;
pub mod error;
pub mod harmonic;
pub mod mask;
pub mod quality;
pub mod raster;
pub mod reference_period;
pub mod robust;
pub mod spectral;
pub mod stack;
pub mod stats;
pub mod variability;

// Re-exports for convenience
pub use date::{ObsDate, EPOCH_DAY_OFFSET};
pub use disturbance::{DisturbanceOutput, DisturbanceParams, DisturbanceStats};
pub use error::{EngineError, Result};
pub use harmonic::{
    predict, quantize_coefficient, HarmonicSpec, COEF_SCALE, MAX_COEFFICIENTS,
};
pub use mask::{combine, update_mask};
pub use quality::use_this_pixel;
pub use raster::{ensure_compatible, round_to_i16, truncate_to_i16, Raster, NODATA};
pub use reference_period::{
    PreviousState, ReferencePeriodOutput, ReferencePeriodParams, ReferencePeriodStats,
};
pub use robust::{irls_fit, RobustFit};
pub use spectral::{band_mapping_for, BandMapping, SpectralOutput, SpectralStats, LANDSAT, SENTINEL2};
pub use stack::ObservationStack;
pub use stats::RunningMoments;
pub use variability::{VariabilityOutput, VariabilityStats};
