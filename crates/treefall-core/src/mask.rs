//! Mask bookkeeping: folding disturbances back into the processing mask
//! and overlaying per-year disturbance rasters.

use rayon::prelude::*;

use crate::raster::Raster;

/// Exclude detected disturbances from the mask.
///
/// A pixel is zeroed where the mask is valid and non-zero and the
/// disturbance raster's band 0 holds a positive value; everything else,
/// nodata included, is copied through. Applying the update twice with the
/// same disturbance raster changes nothing.
pub fn update_mask(disturbance: &Raster, mask: &Raster) -> Raster {
    let mut output = mask.blank_like(1, mask.nodata());

    for p in 0..mask.n_pixels() {
        let value = mask.value(0, p);
        output.set(0, p, value);

        if value == mask.nodata() || value == 0 {
            continue;
        }
        match disturbance.valid_value(0, p) {
            Some(d) if d > 0 => output.set(0, p, 0),
            _ => {}
        }
    }

    output
}

/// Overlay per-year disturbance rasters into one.
///
/// For each pixel and band, the last valid positive value wins, so later
/// inputs overwrite earlier ones. Bands missing from shorter inputs are
/// left untouched by those inputs.
pub fn combine(inputs: &[Raster]) -> Raster {
    let first = &inputs[0];
    let mut output = first.blank_like(first.n_bands(), first.nodata());

    for b in 0..output.n_bands() {
        let column: Vec<i16> = (0..first.n_pixels())
            .into_par_iter()
            .map(|p| {
                let mut value = output.nodata();
                for input in inputs {
                    if b >= input.n_bands() {
                        continue;
                    }
                    match input.valid_value(b, p) {
                        Some(v) if v > 0 => value = v,
                        _ => {}
                    }
                }
                value
            })
            .collect();
        for (p, v) in column.into_iter().enumerate() {
            output.set(b, p, v);
        }
    }

    output
}
