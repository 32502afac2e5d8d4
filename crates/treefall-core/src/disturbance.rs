//! Disturbance detection.
//!
//! Scans one year of observations against the frozen reference model and
//! flags pixels whose residuals stay anomalous long enough. Two counters
//! give the state machine hysteresis: `confirmation` consecutive strong
//! excursions raise a disturbance, and `confirmation` consecutive
//! decisively-small residuals (below half the residual threshold) revert
//! it again. The scan never stops early, so a raised disturbance can
//! still be reverted by a recovering series.

use rayon::prelude::*;

use crate::date::EPOCH_DAY_OFFSET;
use crate::error::{EngineError, Result};
use crate::harmonic::{predict, HarmonicSpec, MAX_COEFFICIENTS};
use crate::raster::{round_to_i16, Raster, NODATA};
use crate::stack::ObservationStack;

/// Parameters of one detection run.
#[derive(Debug, Clone, Copy)]
pub struct DisturbanceParams {
    pub harmonic: HarmonicSpec,
    /// Minimum residual for an alert; the sign selects the direction.
    pub threshold_residual: f64,
    /// Multiplier on the per-pixel variability; an alert also needs
    /// `residual` beyond `threshold_variability · variability`.
    pub threshold_variability: f64,
    /// Consecutive observations required to confirm or revert.
    pub confirmation: u32,
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisturbanceStats {
    /// Pixels that passed the mask/variability/coefficient gates.
    pub pixels: u64,
    /// Confirmation events (a pixel can re-confirm after reverting).
    pub alerts: u64,
    /// Reversion events.
    pub reversions: u64,
    /// Pixels confirmed at the end of the scan.
    pub detected: u64,
}

/// Outputs of one detection run.
#[derive(Debug)]
pub struct DisturbanceOutput {
    /// Three bands: days since epoch, year, and day-of-year of the first
    /// alert of the surviving confirmed run; nodata elsewhere.
    pub disturbance: Raster,
    pub stats: DisturbanceStats,
}

#[derive(Debug, Clone, Copy, Default)]
struct PixelScan {
    valid: bool,
    alerts: u32,
    reversions: u32,
    confirmed: Option<usize>,
}

/// Scan one year of observations for confirmed disturbances.
///
/// `statistics` carries the per-pixel residual variability in band 1 (the
/// second band of the reference-period raster); `coefficients` must have
/// exactly `n_coef(modes, trend)` bands.
pub fn run(
    stack: &ObservationStack,
    mask: &Raster,
    statistics: &Raster,
    coefficients: &Raster,
    params: &DisturbanceParams,
) -> Result<DisturbanceOutput> {
    let n_coef = params.harmonic.n_coefficients();

    if params.threshold_residual == 0.0 {
        return Err(EngineError::InvalidConfig(
            "residual threshold must be non-zero".to_string(),
        ));
    }
    if params.threshold_variability == 0.0 {
        return Err(EngineError::InvalidConfig(
            "variability threshold must be non-zero".to_string(),
        ));
    }
    if params.confirmation == 0 {
        return Err(EngineError::InvalidConfig(
            "confirmation number must be at least 1".to_string(),
        ));
    }
    if coefficients.n_bands() != n_coef {
        return Err(EngineError::CoefficientBands {
            expected: n_coef,
            actual: coefficients.n_bands(),
        });
    }
    if statistics.n_bands() < 2 {
        return Err(EngineError::StatisticsBands(statistics.n_bands()));
    }
    stack.require_single_year()?;

    let terms = params.harmonic.basis_terms(stack.dates());

    let scans: Vec<PixelScan> = (0..stack.first().n_pixels())
        .into_par_iter()
        .map(|p| scan_pixel(p, stack, mask, statistics, coefficients, params, &terms))
        .collect();

    let mut disturbance = stack.first().blank_like(3, NODATA);
    let mut stats = DisturbanceStats::default();

    for (p, scan) in scans.iter().enumerate() {
        if !scan.valid {
            continue;
        }
        stats.pixels += 1;
        stats.alerts += u64::from(scan.alerts);
        stats.reversions += u64::from(scan.reversions);

        if let Some(candidate) = scan.confirmed {
            stats.detected += 1;
            let date = stack.date(candidate);
            disturbance.set(0, p, round_to_i16(f64::from(date.ce - EPOCH_DAY_OFFSET)));
            disturbance.set(1, p, date.year as i16);
            disturbance.set(2, p, date.doy as i16);
        }
    }

    Ok(DisturbanceOutput { disturbance, stats })
}

fn scan_pixel(
    pixel: usize,
    stack: &ObservationStack,
    mask: &Raster,
    statistics: &Raster,
    coefficients: &Raster,
    params: &DisturbanceParams,
    terms: &[Vec<f64>],
) -> PixelScan {
    match mask.valid_value(0, pixel) {
        None | Some(0) => return PixelScan::default(),
        Some(_) => {}
    }
    let Some(variability) = statistics.valid_value(1, pixel) else {
        return PixelScan::default();
    };
    if coefficients.valid_value(1, pixel).is_none() {
        return PixelScan::default();
    }

    let n_coef = params.harmonic.n_coefficients();
    let mut model = [0i16; MAX_COEFFICIENTS];
    for b in 0..n_coef {
        model[b] = coefficients.value(b, pixel);
    }

    let variability = f64::from(variability);
    let positive = params.threshold_residual > 0.0;

    let mut scan = PixelScan {
        valid: true,
        ..PixelScan::default()
    };
    let mut alert_number = 0u32;
    let mut revert_number = 0u32;
    let mut candidate = 0usize;
    let mut confirmed = false;

    for i in 0..stack.len() {
        let Some(observation) = stack.value(i, pixel) else {
            continue;
        };
        let residual = f64::from(observation) - predict(&terms[i], &model[..n_coef]);

        if !confirmed {
            let alert = if positive {
                residual > params.threshold_residual
                    && residual > params.threshold_variability * variability
            } else {
                residual < params.threshold_residual
                    && residual < params.threshold_variability * variability
            };
            if alert {
                alert_number += 1;
                if alert_number == 1 {
                    candidate = i;
                }
            } else {
                alert_number = 0;
            }
            if alert_number == params.confirmation {
                confirmed = true;
                scan.alerts += 1;
                // keep scanning: the disturbance may still revert
            }
        } else {
            let reverting = if positive {
                residual < params.threshold_residual / 2.0
            } else {
                residual > params.threshold_residual / 2.0
            };
            if reverting {
                revert_number += 1;
            } else {
                revert_number = 0;
            }
            if revert_number == params.confirmation {
                confirmed = false;
                scan.reversions += 1;
                alert_number = 0;
                revert_number = 0;
                // candidate is kept; the next rising edge overwrites it
            }
        }
    }

    scan.confirmed = confirmed.then_some(candidate);
    scan
}
