//! Temporal variability.
//!
//! For every in-mask pixel with a valid reference-period end year, the
//! standard deviation of the observations acquired in that year is
//! computed with a one-pass recurrence. The stack's year → index-range
//! table makes the window lookup O(1) per pixel.

use rayon::prelude::*;

use crate::error::Result;
use crate::raster::{round_to_i16, Raster, NODATA};
use crate::stack::ObservationStack;
use crate::stats::RunningMoments;

/// Reference years below this are treated as "never validly fit".
const MIN_VALID_YEAR: i16 = 1900;

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VariabilityStats {
    /// In-mask pixels visited.
    pub pixels: u64,
    /// Pixels with a computed standard deviation.
    pub computed: u64,
    /// Pixels whose reference year is missing or has no observations.
    pub empty_window: u64,
}

/// Outputs of one run.
#[derive(Debug)]
pub struct VariabilityOutput {
    pub variability: Raster,
    pub stats: VariabilityStats,
}

enum PixelOutcome {
    Masked,
    EmptyWindow,
    Sd(i16),
}

/// Compute the per-pixel variability raster.
pub fn run(
    stack: &ObservationStack,
    mask: &Raster,
    reference: &Raster,
) -> Result<VariabilityOutput> {
    let ranges = stack.year_ranges();

    let outcomes: Vec<PixelOutcome> = (0..stack.first().n_pixels())
        .into_par_iter()
        .map(|p| {
            match mask.valid_value(0, p) {
                None | Some(0) => return PixelOutcome::Masked,
                Some(_) => {}
            }
            let Some(year) = reference.valid_value(0, p) else {
                return PixelOutcome::EmptyWindow;
            };
            if year < MIN_VALID_YEAR {
                return PixelOutcome::EmptyWindow;
            }
            let Some(window) = ranges.get(&i32::from(year)) else {
                return PixelOutcome::EmptyWindow;
            };

            let mut moments = RunningMoments::default();
            for i in window.clone() {
                if let Some(observation) = stack.value(i, p) {
                    moments.push(f64::from(observation));
                }
            }
            if moments.count() == 0 {
                PixelOutcome::EmptyWindow
            } else {
                PixelOutcome::Sd(round_to_i16(moments.sample_sd()))
            }
        })
        .collect();

    let mut variability = stack.first().blank_like(1, NODATA);
    let mut stats = VariabilityStats::default();

    for (p, outcome) in outcomes.iter().enumerate() {
        match outcome {
            PixelOutcome::Masked => {}
            PixelOutcome::EmptyWindow => {
                stats.pixels += 1;
                stats.empty_window += 1;
            }
            PixelOutcome::Sd(sd) => {
                stats.pixels += 1;
                stats.computed += 1;
                variability.set(0, p, *sd);
            }
        }
    }

    Ok(VariabilityOutput { variability, stats })
}
