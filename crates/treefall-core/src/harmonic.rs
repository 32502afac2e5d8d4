//! Harmonic seasonal-trend model: sizing, basis terms, prediction.
//!
//! The model is a linear combination of an intercept, an optional linear
//! trend, and sine/cosine pairs at annual, semi-annual and tri-annual
//! frequencies. Basis terms depend only on the observation dates, never
//! on pixel data, so every stage computes them once and shares them
//! read-only across workers.

use std::f64::consts::PI;

use crate::date::ObsDate;
use crate::error::{EngineError, Result};
use crate::raster::round_to_i16;

/// Fixed scale factor between model coefficients and their stored i16
/// representation. All coefficients, the intercept included, are stored
/// scaled and unscaled on read.
pub const COEF_SCALE: f64 = 10.0;

/// Upper bound on the coefficient count: intercept + trend + three
/// sine/cosine pairs.
pub const MAX_COEFFICIENTS: usize = 8;

/// Shape of the harmonic model: number of frequency pairs and whether a
/// linear trend term is fitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarmonicSpec {
    modes: u8,
    trend: bool,
}

impl HarmonicSpec {
    /// Build a model spec; `modes` must be 1, 2 or 3.
    pub fn new(modes: u8, trend: bool) -> Result<Self> {
        if !(1..=3).contains(&modes) {
            return Err(EngineError::InvalidConfig(format!(
                "modes must be 1, 2, or 3 (got {modes})"
            )));
        }
        let spec = HarmonicSpec { modes, trend };
        // at least intercept plus the uni-modal frequency pair
        if spec.n_coefficients() < 3 {
            return Err(EngineError::InvalidConfig(
                "not enough coefficients for harmonic fitting".to_string(),
            ));
        }
        Ok(spec)
    }

    pub fn modes(&self) -> u8 {
        self.modes
    }

    pub fn trend(&self) -> bool {
        self.trend
    }

    /// Length of the coefficient vector:
    /// `1 + 2·modes + (trend ? 1 : 0)`.
    pub fn n_coefficients(&self) -> usize {
        1 + 2 * usize::from(self.modes) + usize::from(self.trend)
    }

    /// Basis row evaluated at one day index:
    /// `[1, (ce,) cos(2π/365·ce), sin(2π/365·ce), …]`.
    pub fn basis_row(&self, ce: i32) -> Vec<f64> {
        let mut row = Vec::with_capacity(self.n_coefficients());
        row.push(1.0);
        if self.trend {
            row.push(f64::from(ce));
        }
        for mode in 1..=i32::from(self.modes) {
            let angle = 2.0 * PI / 365.0 * f64::from(mode) * f64::from(ce);
            row.push(angle.cos());
            row.push(angle.sin());
        }
        row
    }

    /// Basis rows for a whole stack, in stack order.
    pub fn basis_terms(&self, dates: &[ObsDate]) -> Vec<Vec<f64>> {
        dates.iter().map(|d| self.basis_row(d.ce)).collect()
    }
}

/// Quantize a model coefficient for i16 storage.
pub fn quantize_coefficient(value: f64) -> i16 {
    round_to_i16(value * COEF_SCALE)
}

/// Evaluate the model at one basis row from stored coefficients.
pub fn predict(terms: &[f64], coefficients: &[i16]) -> f64 {
    terms
        .iter()
        .zip(coefficients)
        .map(|(t, &c)| t * f64::from(c) / COEF_SCALE)
        .sum()
}
