//! Continuum-removed spectral index.
//!
//! Per-pixel, single-date computation: the SWIR1 reflectance is compared
//! against the straight line (the continuum) between the NIR and SWIR2
//! bands, and the index is the deviation below that line. Disturbed
//! canopies lose the water absorption that keeps SWIR1 under the
//! continuum, so the index rises.

use rayon::prelude::*;

use crate::error::{EngineError, Result};
use crate::quality::use_this_pixel;
use crate::raster::{truncate_to_i16, Raster, NODATA};

/// Which reflectance bands to read, 1-based, with their wavelengths.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandMapping {
    /// NIR, SWIR1, SWIR2 band numbers.
    pub bands: [usize; 3],
    /// Wavelengths in micrometres, ascending.
    pub wavelengths: [f64; 3],
}

const WAVELENGTHS: [f64; 3] = [0.864, 1.609, 2.202];

/// Sentinel-2 level-2 band layout.
pub const SENTINEL2: BandMapping = BandMapping {
    bands: [8, 9, 10],
    wavelengths: WAVELENGTHS,
};

/// Landsat level-2 band layout (six-band products).
pub const LANDSAT: BandMapping = BandMapping {
    bands: [4, 5, 6],
    wavelengths: WAVELENGTHS,
};

/// Pick the band mapping from the reflectance band count.
pub fn band_mapping_for(n_bands: usize) -> Result<BandMapping> {
    if n_bands == 6 {
        return Ok(LANDSAT);
    }
    if n_bands >= 10 {
        return Ok(SENTINEL2);
    }
    Err(EngineError::BandOutOfRange {
        band: SENTINEL2.bands[2],
        available: n_bands,
    })
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpectralStats {
    /// In-mask pixels visited.
    pub pixels: u64,
    /// Pixels with a computed index.
    pub computed: u64,
    /// Pixels rejected by the quality screen.
    pub screened: u64,
}

/// Outputs of one run.
#[derive(Debug)]
pub struct SpectralOutput {
    pub index: Raster,
    pub stats: SpectralStats,
}

enum PixelOutcome {
    Masked,
    Screened,
    Index(i16),
}

/// Compute the index for one date.
///
/// `reflectance` holds the three mapped bands in NIR, SWIR1, SWIR2
/// order; `quality` is the QAI layer.
pub fn run(
    reflectance: &Raster,
    quality: &Raster,
    mask: &Raster,
    mapping: &BandMapping,
) -> Result<SpectralOutput> {
    if reflectance.n_bands() != 3 {
        return Err(EngineError::InvalidConfig(format!(
            "expected the three mapped reflectance bands, got {}",
            reflectance.n_bands()
        )));
    }

    let [nir_wl, swir1_wl, swir2_wl] = mapping.wavelengths;

    let outcomes: Vec<PixelOutcome> = (0..reflectance.n_pixels())
        .into_par_iter()
        .map(|p| {
            match mask.valid_value(0, p) {
                None | Some(0) => return PixelOutcome::Masked,
                Some(_) => {}
            }
            let Some(qai) = quality.valid_value(0, p) else {
                return PixelOutcome::Screened;
            };
            let (Some(nir), Some(swir1), Some(swir2)) = (
                reflectance.valid_value(0, p),
                reflectance.valid_value(1, p),
                reflectance.valid_value(2, p),
            ) else {
                return PixelOutcome::Screened;
            };
            if !use_this_pixel(qai) {
                return PixelOutcome::Screened;
            }

            // continuum between NIR and SWIR2, removed at SWIR1
            let interpolated = (f64::from(nir) * (swir2_wl - swir1_wl)
                + f64::from(swir2) * (swir1_wl - nir_wl))
                / (swir2_wl - nir_wl);
            PixelOutcome::Index(truncate_to_i16(f64::from(swir1) - interpolated))
        })
        .collect();

    let mut index = reflectance.blank_like(1, NODATA);
    let mut stats = SpectralStats::default();

    for (p, outcome) in outcomes.iter().enumerate() {
        match outcome {
            PixelOutcome::Masked => {}
            PixelOutcome::Screened => {
                stats.pixels += 1;
                stats.screened += 1;
            }
            PixelOutcome::Index(value) => {
                stats.pixels += 1;
                stats.computed += 1;
                index.set(0, p, *value);
            }
        }
    }

    Ok(SpectralOutput { index, stats })
}
