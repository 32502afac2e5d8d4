//! End-to-end scenarios chaining the batch stages over a small grid.
//!
//! A 2x2 tile is followed through three yearly reference-period runs,
//! disturbance detection, and the mask bookkeeping stages: one stable
//! pixel, one pixel disturbed mid-2018, one masked pixel, and one pixel
//! with no valid observations at all.

use chrono::NaiveDate;
use treefall_core::disturbance::{self, DisturbanceParams};
use treefall_core::mask::{combine, update_mask};
use treefall_core::reference_period::{self, PreviousState, ReferencePeriodParams};
use treefall_core::variability;
use treefall_core::{ensure_compatible, HarmonicSpec, ObsDate, ObservationStack, Raster, EPOCH_DAY_OFFSET, NODATA};

const GEO: [f64; 6] = [4500000.0, 10.0, 0.0, 3100000.0, 0.0, -10.0];

const STABLE: usize = 0;
const DISTURBED: usize = 1;
const MASKED: usize = 2;
const EMPTY: usize = 3;

fn tile(bands: Vec<Vec<i16>>) -> Raster {
    Raster::from_bands(2, 2, NODATA, "EPSG:3035".into(), GEO, bands).unwrap()
}

fn mask() -> Raster {
    tile(vec![vec![1, 1, 0, 1]])
}

fn date(year: i32, month: u32) -> ObsDate {
    ObsDate::from_calendar(NaiveDate::from_ymd_opt(year, month, 15).unwrap())
}

/// Monthly observations from `from` through `to` inclusive. The stable
/// pixel reads 500 throughout; the disturbed pixel jumps to 1500 from
/// July 2018 on; the empty pixel never has data.
fn monthly_stack(from: i32, to: i32) -> ObservationStack {
    let mut rasters = Vec::new();
    let mut dates = Vec::new();
    for year in from..=to {
        for month in 1..=12 {
            let d = date(year, month);
            let disturbed_value = if (year, month) >= (2018, 7) { 1500 } else { 500 };
            rasters.push(tile(vec![vec![500, disturbed_value, 500, NODATA]]));
            dates.push(d);
        }
    }
    ObservationStack::new(rasters, dates).unwrap()
}

fn rpf_params(target_year: i32) -> ReferencePeriodParams {
    ReferencePeriodParams {
        harmonic: HarmonicSpec::new(1, false).unwrap(),
        threshold: 500.0,
        confirmation: 3,
        target_year,
    }
}

#[test]
fn yearly_runs_detect_and_freeze_the_disturbance() {
    let mask = mask();

    // initial fit through 2017: everything is still stable
    let initial = reference_period::run(&monthly_stack(2015, 2017), &mask, None, &rpf_params(2017))
        .unwrap();
    assert_eq!(initial.stats.fitted, 2);
    assert_eq!(initial.stats.pixels, 3); // the all-nodata pixel is in-mask
    assert_eq!(initial.coefficients.n_bands(), 3);
    assert_eq!(initial.reference_period.value(0, STABLE), 2017);
    assert_eq!(initial.reference_period.value(0, DISTURBED), 2017);
    assert_eq!(initial.reference_period.value(0, MASKED), NODATA);
    assert_eq!(initial.reference_period.value(0, EMPTY), NODATA);

    // 2018 run: six strong excursions confirm the break; the stable
    // pixel extends its reference period
    let stack_2018 = monthly_stack(2015, 2018);
    let run_2018 = reference_period::run(
        &stack_2018,
        &mask,
        Some(PreviousState {
            reference_period: &initial.reference_period,
            coefficients: &initial.coefficients,
        }),
        &rpf_params(2018),
    )
    .unwrap();
    assert_eq!(run_2018.stats.fitted, 1);
    assert_eq!(run_2018.stats.newly_broken, 1);
    assert_eq!(run_2018.reference_period.value(0, STABLE), 2018);
    assert_eq!(run_2018.reference_period.value(0, DISTURBED), 2017);
    for b in 0..3 {
        assert_eq!(
            run_2018.coefficients.value(b, DISTURBED),
            initial.coefficients.value(b, DISTURBED)
        );
    }
    assert!(ensure_compatible(stack_2018.first(), &run_2018.coefficients).is_ok());

    // 2019 run: the break is inherited without refitting
    let run_2019 = reference_period::run(
        &monthly_stack(2015, 2019),
        &mask,
        Some(PreviousState {
            reference_period: &run_2018.reference_period,
            coefficients: &run_2018.coefficients,
        }),
        &rpf_params(2019),
    )
    .unwrap();
    assert_eq!(run_2019.stats.already_broken, 1);
    assert_eq!(run_2019.reference_period.value(0, STABLE), 2019);
    for b in 0..2 {
        assert_eq!(
            run_2019.reference_period.value(b, DISTURBED),
            run_2018.reference_period.value(b, DISTURBED)
        );
    }
    for b in 0..3 {
        assert_eq!(
            run_2019.coefficients.value(b, DISTURBED),
            run_2018.coefficients.value(b, DISTURBED)
        );
    }
}

#[test]
fn detection_flags_only_the_disturbed_pixel() {
    let mask = mask();
    let initial = reference_period::run(&monthly_stack(2015, 2017), &mask, None, &rpf_params(2017))
        .unwrap();
    let run_2018 = reference_period::run(
        &monthly_stack(2015, 2018),
        &mask,
        Some(PreviousState {
            reference_period: &initial.reference_period,
            coefficients: &initial.coefficients,
        }),
        &rpf_params(2018),
    )
    .unwrap();

    // one year of fresh observations against the frozen models
    let scan_stack = monthly_stack(2019, 2019);
    let detection = disturbance::run(
        &scan_stack,
        &mask,
        &run_2018.reference_period,
        &run_2018.coefficients,
        &DisturbanceParams {
            harmonic: HarmonicSpec::new(1, false).unwrap(),
            threshold_residual: 500.0,
            threshold_variability: 3.0,
            confirmation: 3,
        },
    )
    .unwrap();

    assert_eq!(detection.stats.detected, 1);
    let first_alert = date(2019, 1);
    assert_eq!(
        detection.disturbance.value(0, DISTURBED),
        (first_alert.ce - EPOCH_DAY_OFFSET) as i16
    );
    assert_eq!(detection.disturbance.value(1, DISTURBED), 2019);
    assert_eq!(detection.disturbance.value(2, DISTURBED), first_alert.doy as i16);
    for pixel in [STABLE, MASKED, EMPTY] {
        for b in 0..3 {
            assert_eq!(detection.disturbance.value(b, pixel), NODATA);
        }
    }

    // fold the detection into the mask: the disturbed pixel drops out
    let updated = update_mask(&detection.disturbance, &mask);
    assert_eq!(updated.band(0), &[1, 0, 0, 1]);
    let again = update_mask(&detection.disturbance, &updated);
    assert_eq!(again.band(0), updated.band(0));
}

#[test]
fn variability_follows_the_reference_window() {
    let mask = mask();
    let stack = monthly_stack(2015, 2018);
    let initial = reference_period::run(&stack, &mask, None, &rpf_params(2018)).unwrap();

    let out = variability::run(&stack, &mask, &initial.reference_period).unwrap();
    // flat series: no spread inside the 2018 window
    assert_eq!(out.variability.value(0, STABLE), 0);
    assert_eq!(out.variability.value(0, MASKED), NODATA);
    assert_eq!(out.variability.value(0, EMPTY), NODATA);
}

#[test]
fn combined_overlays_prefer_later_years() {
    let d2019 = tile(vec![
        vec![NODATA, 17911, NODATA, NODATA],
        vec![NODATA, 2019, NODATA, NODATA],
        vec![NODATA, 15, NODATA, NODATA],
    ]);
    let d2020 = tile(vec![
        vec![18276, 18280, NODATA, NODATA],
        vec![2020, 2020, NODATA, NODATA],
        vec![46, 50, NODATA, NODATA],
    ]);

    let folded = combine(&[d2019.clone(), d2020]);
    assert_eq!(folded.band(0), &[18276, 18280, NODATA, NODATA]);
    assert_eq!(folded.band(1), &[2020, 2020, NODATA, NODATA]);
    assert_eq!(folded.band(2), &[46, 50, NODATA, NODATA]);

    let single = combine(&[d2019.clone()]);
    assert_eq!(single.band(0), d2019.band(0));
}
