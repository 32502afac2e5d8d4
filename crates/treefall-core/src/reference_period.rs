//! Reference-period fitting.
//!
//! The engine extends a per-pixel harmonic reference model one year at a
//! time. Each yearly run reads the previous run's reference-period and
//! coefficient rasters, checks the target year's observations against the
//! previous model, and either freezes the pixel (anomaly confirmed),
//! inherits an earlier freeze, or refits the model over the whole stack.
//! Persisting the two sidecar rasters between runs is what keeps annual
//! reprocessing cheap: pixels whose reference period already ended are
//! copied through untouched instead of being refit.

use faer::{Col, Mat};
use rayon::prelude::*;

use crate::error::{EngineError, Result};
use crate::harmonic::{predict, quantize_coefficient, HarmonicSpec, MAX_COEFFICIENTS};
use crate::raster::{round_to_i16, Raster, NODATA};
use crate::robust::irls_fit;
use crate::stack::ObservationStack;

/// Reference years below this are treated as "never validly fit".
const MIN_VALID_YEAR: i16 = 1900;

/// Parameters of one yearly run.
#[derive(Debug, Clone, Copy)]
pub struct ReferencePeriodParams {
    pub harmonic: HarmonicSpec,
    /// Residual threshold for the anomaly check; the sign selects the
    /// anomaly direction. Must be non-zero.
    pub threshold: f64,
    /// Consecutive anomalous observations required to end the period.
    pub confirmation: u32,
    /// Year up to which the reference period may be extended.
    pub target_year: i32,
}

/// Per-pixel state carried over from the previous yearly run.
#[derive(Debug, Clone, Copy)]
pub struct PreviousState<'a> {
    /// Band 0: last stable year. Band 1: residual sd of the fit.
    pub reference_period: &'a Raster,
    /// Scaled model coefficients, `n_coef` bands.
    pub coefficients: &'a Raster,
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReferencePeriodStats {
    /// In-mask pixels visited.
    pub pixels: u64,
    /// Pixels refit over the full stack.
    pub fitted: u64,
    /// Pixels whose anomaly was confirmed in this run.
    pub newly_broken: u64,
    /// Pixels frozen in an earlier run and copied through.
    pub already_broken: u64,
    /// Frozen-path pixels with an invalid previous reference year.
    pub invalid_reference: u64,
}

/// Outputs of one yearly run.
#[derive(Debug)]
pub struct ReferencePeriodOutput {
    pub reference_period: Raster,
    pub coefficients: Raster,
    pub stats: ReferencePeriodStats,
}

enum PixelOutcome {
    Masked,
    /// Frozen path, but the previous reference year is pre-1900.
    InvalidReference,
    AlreadyBroken,
    NewlyBroken,
    /// Too few observations, or a singular fit.
    NotFit,
    Fitted {
        coefficients: [i16; MAX_COEFFICIENTS],
        residual_sd: i16,
    },
}

/// Run the engine for one target year.
///
/// `previous` is `None` on the initial run. The stack must be ordered by
/// date, contain at least one image of the target year, and none after
/// it.
pub fn run(
    stack: &ObservationStack,
    mask: &Raster,
    previous: Option<PreviousState<'_>>,
    params: &ReferencePeriodParams,
) -> Result<ReferencePeriodOutput> {
    let n_coef = params.harmonic.n_coefficients();

    if params.threshold == 0.0 {
        return Err(EngineError::InvalidConfig(
            "change threshold must be non-zero".to_string(),
        ));
    }
    if params.confirmation == 0 {
        return Err(EngineError::InvalidConfig(
            "confirmation number must be at least 1".to_string(),
        ));
    }
    stack.require_not_after(params.target_year)?;
    let break_index = stack
        .first_index_of_year(params.target_year)
        .ok_or(EngineError::MissingTargetYear(params.target_year))?;

    if let Some(prev) = &previous {
        if prev.coefficients.n_bands() != n_coef {
            return Err(EngineError::CoefficientBands {
                expected: n_coef,
                actual: prev.coefficients.n_bands(),
            });
        }
        if prev.reference_period.n_bands() != 2 {
            return Err(EngineError::ReferencePeriodBands(
                prev.reference_period.n_bands(),
            ));
        }
    }

    let terms = params.harmonic.basis_terms(stack.dates());

    let outcomes: Vec<PixelOutcome> = (0..stack.first().n_pixels())
        .into_par_iter()
        .map(|p| fit_pixel(p, stack, mask, previous.as_ref(), params, &terms, break_index))
        .collect();

    let mut reference_period = stack.first().blank_like(2, NODATA);
    let mut coefficients = stack.first().blank_like(n_coef, NODATA);
    let mut stats = ReferencePeriodStats::default();

    for (p, outcome) in outcomes.iter().enumerate() {
        match outcome {
            PixelOutcome::Masked => {}
            PixelOutcome::InvalidReference => {
                stats.pixels += 1;
                stats.invalid_reference += 1;
            }
            PixelOutcome::NotFit => {
                stats.pixels += 1;
            }
            PixelOutcome::AlreadyBroken | PixelOutcome::NewlyBroken => {
                stats.pixels += 1;
                if matches!(outcome, PixelOutcome::AlreadyBroken) {
                    stats.already_broken += 1;
                } else {
                    stats.newly_broken += 1;
                }
                let prev = previous.as_ref().expect("broken pixels imply a previous run");
                for b in 0..n_coef {
                    coefficients.set(b, p, prev.coefficients.value(b, p));
                }
                for b in 0..2 {
                    reference_period.set(b, p, prev.reference_period.value(b, p));
                }
            }
            PixelOutcome::Fitted {
                coefficients: fitted,
                residual_sd,
            } => {
                stats.pixels += 1;
                stats.fitted += 1;
                for b in 0..n_coef {
                    coefficients.set(b, p, fitted[b]);
                }
                reference_period.set(0, p, params.target_year as i16);
                reference_period.set(1, p, *residual_sd);
            }
        }
    }

    Ok(ReferencePeriodOutput {
        reference_period,
        coefficients,
        stats,
    })
}

fn fit_pixel(
    pixel: usize,
    stack: &ObservationStack,
    mask: &Raster,
    previous: Option<&PreviousState<'_>>,
    params: &ReferencePeriodParams,
    terms: &[Vec<f64>],
    break_index: usize,
) -> PixelOutcome {
    match mask.valid_value(0, pixel) {
        None | Some(0) => return PixelOutcome::Masked,
        Some(_) => {}
    }

    let n_coef = params.harmonic.n_coefficients();

    if let Some(prev) = previous {
        let prev_year = prev.reference_period.value(0, pixel);

        // frozen in an earlier run: inherit, do not refit
        if i32::from(prev_year) < params.target_year - 1 {
            if prev_year < MIN_VALID_YEAR {
                return PixelOutcome::InvalidReference;
            }
            return PixelOutcome::AlreadyBroken;
        }

        // check the target year's observations against the previous model
        let mut prev_coefficients = [0i16; MAX_COEFFICIENTS];
        for b in 0..n_coef {
            prev_coefficients[b] = prev.coefficients.value(b, pixel);
        }

        let mut counter = 0u32;
        for i in break_index..stack.len() {
            let Some(observation) = stack.value(i, pixel) else {
                continue;
            };
            let residual =
                f64::from(observation) - predict(&terms[i], &prev_coefficients[..n_coef]);

            let anomalous = if params.threshold > 0.0 {
                residual > params.threshold
            } else {
                residual < params.threshold
            };
            if anomalous {
                counter += 1;
            } else {
                counter = 0;
            }

            if counter >= params.confirmation {
                // the break year is already recorded in the previous raster
                return PixelOutcome::NewlyBroken;
            }
        }
    }

    // still stable (or initial run): refit over the whole stack
    let n_valid = stack.count_valid(pixel);
    if n_valid <= n_coef {
        return PixelOutcome::NotFit;
    }

    let mut design_rows = Vec::with_capacity(n_valid);
    let mut response = Vec::with_capacity(n_valid);
    for i in 0..stack.len() {
        if let Some(observation) = stack.value(i, pixel) {
            design_rows.push(&terms[i]);
            response.push(f64::from(observation));
        }
    }
    let x = Mat::from_fn(n_valid, n_coef, |i, j| design_rows[i][j]);
    let y = Col::from_fn(n_valid, |i| response[i]);

    match irls_fit(&x, &y) {
        Ok(fit) => {
            let mut quantized = [0i16; MAX_COEFFICIENTS];
            for (slot, &value) in quantized.iter_mut().zip(&fit.coefficients) {
                *slot = quantize_coefficient(value);
            }
            PixelOutcome::Fitted {
                coefficients: quantized,
                residual_sd: round_to_i16(fit.residual_sd),
            }
        }
        Err(_) => PixelOutcome::NotFit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::date::ObsDate;
    use crate::raster::ensure_compatible;
    use chrono::NaiveDate;

    const GEO: [f64; 6] = [4500000.0, 10.0, 0.0, 3100000.0, 0.0, -10.0];

    fn date(year: i32, month: u32, day: u32) -> ObsDate {
        ObsDate::from_calendar(NaiveDate::from_ymd_opt(year, month, day).unwrap())
    }

    fn raster(values: Vec<i16>) -> Raster {
        Raster::from_bands(1, 1, NODATA, "EPSG:3035".into(), GEO, vec![values]).unwrap()
    }

    /// Quarterly observations over the given years, one pixel.
    fn quarterly_dates(years: std::ops::RangeInclusive<i32>) -> Vec<ObsDate> {
        let mut dates = Vec::new();
        for year in years {
            for month in [2, 5, 8, 11] {
                dates.push(date(year, month, 15));
            }
        }
        dates
    }

    fn stack_of(dates: &[ObsDate], values: &[i16]) -> ObservationStack {
        let rasters = values.iter().map(|&v| raster(vec![v])).collect();
        ObservationStack::new(rasters, dates.to_vec()).unwrap()
    }

    fn params(target_year: i32) -> ReferencePeriodParams {
        ReferencePeriodParams {
            harmonic: HarmonicSpec::new(1, false).unwrap(),
            threshold: 500.0,
            confirmation: 3,
            target_year,
        }
    }

    #[test]
    fn initial_fit_of_flat_series() {
        let dates = quarterly_dates(2015..=2018);
        let values = vec![500i16; dates.len()];
        let stack = stack_of(&dates, &values);
        let mask = raster(vec![1]);

        let out = run(&stack, &mask, None, &params(2018)).unwrap();

        assert_eq!(out.stats.pixels, 1);
        assert_eq!(out.stats.fitted, 1);
        assert_eq!(out.reference_period.value(0, 0), 2018);
        // sd of a constant series is zero
        assert_eq!(out.reference_period.value(1, 0), 0);
        // intercept 500 stored as 5000; harmonic terms near zero
        assert!((out.coefficients.value(0, 0) - 5000).abs() <= 2);
        assert!(out.coefficients.value(1, 0).abs() <= 2);
        assert!(out.coefficients.value(2, 0).abs() <= 2);
        assert_eq!(out.coefficients.n_bands(), 3);
        assert!(ensure_compatible(stack.first(), &out.coefficients).is_ok());
    }

    #[test]
    fn confirmed_step_freezes_the_pixel() {
        let dates = quarterly_dates(2015..=2018);
        let flat = vec![500i16; dates.len()];
        // previous run fit through 2017 only
        let prev_dates = quarterly_dates(2015..=2017);
        let prev_values = vec![500i16; prev_dates.len()];
        let prev = run(
            &stack_of(&prev_dates, &prev_values),
            &raster(vec![1]),
            None,
            &params(2017),
        )
        .unwrap();

        // last three observations of 2018 jump by 1000
        let mut values = flat.clone();
        let n = values.len();
        for v in &mut values[n - 3..] {
            *v = 1500;
        }
        let stack = stack_of(&dates, &values);

        let out = run(
            &stack,
            &raster(vec![1]),
            Some(PreviousState {
                reference_period: &prev.reference_period,
                coefficients: &prev.coefficients,
            }),
            &params(2018),
        )
        .unwrap();

        assert_eq!(out.stats.newly_broken, 1);
        assert_eq!(out.stats.fitted, 0);
        // previous outputs are copied through unchanged
        assert_eq!(out.reference_period.value(0, 0), 2017);
        for b in 0..3 {
            assert_eq!(out.coefficients.value(b, 0), prev.coefficients.value(b, 0));
        }
    }

    #[test]
    fn single_spike_does_not_break() {
        let dates = quarterly_dates(2015..=2018);
        let prev_dates = quarterly_dates(2015..=2017);
        let prev = run(
            &stack_of(&prev_dates, &vec![500i16; prev_dates.len()]),
            &raster(vec![1]),
            None,
            &params(2017),
        )
        .unwrap();

        // one spiked observation in 2018, then back to normal
        let mut values = vec![500i16; dates.len()];
        let n = values.len();
        values[n - 3] = 1500;
        let stack = stack_of(&dates, &values);

        let out = run(
            &stack,
            &raster(vec![1]),
            Some(PreviousState {
                reference_period: &prev.reference_period,
                coefficients: &prev.coefficients,
            }),
            &params(2018),
        )
        .unwrap();

        // counter reset by the following normal observation; pixel refit
        assert_eq!(out.stats.newly_broken, 0);
        assert_eq!(out.stats.fitted, 1);
        assert_eq!(out.reference_period.value(0, 0), 2018);
    }

    #[test]
    fn already_broken_pixels_copy_byte_identical() {
        let dates = quarterly_dates(2015..=2018);
        let stack = stack_of(&dates, &vec![500i16; dates.len()]);
        let mask = raster(vec![1]);

        // previous state says the period ended back in 2015
        let prev_ref = Raster::from_bands(
            1,
            1,
            NODATA,
            "EPSG:3035".into(),
            GEO,
            vec![vec![2015], vec![7]],
        )
        .unwrap();
        let prev_coef = Raster::from_bands(
            1,
            1,
            NODATA,
            "EPSG:3035".into(),
            GEO,
            vec![vec![4980], vec![-13], vec![22]],
        )
        .unwrap();

        let out = run(
            &stack,
            &mask,
            Some(PreviousState {
                reference_period: &prev_ref,
                coefficients: &prev_coef,
            }),
            &params(2018),
        )
        .unwrap();

        assert_eq!(out.stats.already_broken, 1);
        assert_eq!(out.reference_period.value(0, 0), 2015);
        assert_eq!(out.reference_period.value(1, 0), 7);
        assert_eq!(out.coefficients.value(0, 0), 4980);
        assert_eq!(out.coefficients.value(1, 0), -13);
        assert_eq!(out.coefficients.value(2, 0), 22);
    }

    #[test]
    fn masked_pixels_stay_nodata() {
        let dates = quarterly_dates(2015..=2018);
        let stack = stack_of(&dates, &vec![500i16; dates.len()]);

        for mask_value in [0i16, NODATA] {
            let out = run(&stack, &raster(vec![mask_value]), None, &params(2018)).unwrap();
            assert_eq!(out.stats.pixels, 0);
            assert_eq!(out.reference_period.value(0, 0), NODATA);
            assert_eq!(out.reference_period.value(1, 0), NODATA);
            for b in 0..3 {
                assert_eq!(out.coefficients.value(b, 0), NODATA);
            }
        }
    }

    #[test]
    fn too_few_observations_stay_nodata() {
        // n_valid == n_coef: the fit is skipped
        let dates = vec![date(2018, 2, 1), date(2018, 5, 1), date(2018, 8, 1)];
        let stack = stack_of(&dates, &[500, 510, 505]);

        let out = run(&stack, &raster(vec![1]), None, &params(2018)).unwrap();
        assert_eq!(out.stats.pixels, 1);
        assert_eq!(out.stats.fitted, 0);
        assert_eq!(out.reference_period.value(0, 0), NODATA);
        assert_eq!(out.coefficients.value(0, 0), NODATA);
    }

    #[test]
    fn never_fit_pixels_pass_through_as_nodata() {
        let dates = quarterly_dates(2015..=2018);
        let stack = stack_of(&dates, &vec![500i16; dates.len()]);
        let prev_ref = Raster::from_bands(
            1,
            1,
            NODATA,
            "EPSG:3035".into(),
            GEO,
            vec![vec![NODATA], vec![NODATA]],
        )
        .unwrap();
        let prev_coef = Raster::from_bands(
            1,
            1,
            NODATA,
            "EPSG:3035".into(),
            GEO,
            vec![vec![NODATA], vec![NODATA], vec![NODATA]],
        )
        .unwrap();

        let out = run(
            &stack,
            &raster(vec![1]),
            Some(PreviousState {
                reference_period: &prev_ref,
                coefficients: &prev_coef,
            }),
            &params(2018),
        )
        .unwrap();

        assert_eq!(out.stats.invalid_reference, 1);
        assert_eq!(out.reference_period.value(0, 0), NODATA);
        assert_eq!(out.coefficients.value(0, 0), NODATA);
    }

    #[test]
    fn rejects_stacks_without_the_target_year() {
        let dates = quarterly_dates(2015..=2017);
        let stack = stack_of(&dates, &vec![500i16; dates.len()]);
        let result = run(&stack, &raster(vec![1]), None, &params(2018));
        assert!(matches!(result, Err(EngineError::MissingTargetYear(2018))));
    }

    #[test]
    fn rejects_images_after_the_target_year() {
        let dates = quarterly_dates(2015..=2018);
        let stack = stack_of(&dates, &vec![500i16; dates.len()]);
        let result = run(&stack, &raster(vec![1]), None, &params(2017));
        assert!(matches!(
            result,
            Err(EngineError::ImageAfterTargetYear { .. })
        ));
    }
}
