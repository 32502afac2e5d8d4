//! In-memory raster model shared by all stages.
//!
//! A [`Raster`] is a fully materialized, band-sequential i16 image with a
//! single nodata sentinel for all bands. Stages own their rasters for the
//! duration of a run and release them when the run ends; the engines only
//! ever share them read-only across worker threads.

use crate::error::{EngineError, Result};

/// Default nodata sentinel for derived products.
pub const NODATA: i16 = i16::MIN;

/// Round a computed value into i16 storage.
///
/// Saturates at the i16 range and stays one step clear of the nodata
/// sentinel so a real measurement can never masquerade as missing.
pub fn round_to_i16(value: f64) -> i16 {
    let rounded = value.round();
    let clamped = rounded.clamp(f64::from(i16::MIN) + 1.0, f64::from(i16::MAX));
    clamped as i16
}

/// Truncate a computed value into i16 storage.
///
/// Same saturation as [`round_to_i16`], with truncation toward zero
/// instead of rounding.
pub fn truncate_to_i16(value: f64) -> i16 {
    (value as i16).max(i16::MIN + 1)
}

/// An aligned i16 raster.
#[derive(Debug, Clone)]
pub struct Raster {
    nx: usize,
    ny: usize,
    nodata: i16,
    projection: String,
    geo_transform: [f64; 6],
    bands: Vec<Vec<i16>>,
}

impl Raster {
    /// Create a raster with every band filled with `nodata`.
    pub fn filled(
        nx: usize,
        ny: usize,
        n_bands: usize,
        nodata: i16,
        projection: String,
        geo_transform: [f64; 6],
    ) -> Self {
        Raster {
            nx,
            ny,
            nodata,
            projection,
            geo_transform,
            bands: vec![vec![nodata; nx * ny]; n_bands],
        }
    }

    /// Assemble a raster from band buffers read elsewhere.
    ///
    /// Every band must hold exactly `nx · ny` values.
    pub fn from_bands(
        nx: usize,
        ny: usize,
        nodata: i16,
        projection: String,
        geo_transform: [f64; 6],
        bands: Vec<Vec<i16>>,
    ) -> Result<Self> {
        if bands.is_empty() {
            return Err(EngineError::InvalidConfig(
                "raster must have at least one band".to_string(),
            ));
        }
        for band in &bands {
            if band.len() != nx * ny {
                return Err(EngineError::InvalidConfig(format!(
                    "band length {} does not match {}x{} raster",
                    band.len(),
                    nx,
                    ny
                )));
            }
        }
        Ok(Raster {
            nx,
            ny,
            nodata,
            projection,
            geo_transform,
            bands,
        })
    }

    /// A new raster with this raster's geometry, `n_bands` bands, and all
    /// values pre-set to `nodata`.
    pub fn blank_like(&self, n_bands: usize, nodata: i16) -> Self {
        Raster::filled(
            self.nx,
            self.ny,
            n_bands,
            nodata,
            self.projection.clone(),
            self.geo_transform,
        )
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    pub fn ny(&self) -> usize {
        self.ny
    }

    /// Number of pixels per band.
    pub fn n_pixels(&self) -> usize {
        self.nx * self.ny
    }

    pub fn n_bands(&self) -> usize {
        self.bands.len()
    }

    pub fn nodata(&self) -> i16 {
        self.nodata
    }

    pub fn projection(&self) -> &str {
        &self.projection
    }

    pub fn geo_transform(&self) -> &[f64; 6] {
        &self.geo_transform
    }

    pub fn band(&self, band: usize) -> &[i16] {
        &self.bands[band]
    }

    pub fn value(&self, band: usize, pixel: usize) -> i16 {
        self.bands[band][pixel]
    }

    /// The value at (band, pixel), or `None` if it is the nodata sentinel.
    pub fn valid_value(&self, band: usize, pixel: usize) -> Option<i16> {
        let v = self.bands[band][pixel];
        (v != self.nodata).then_some(v)
    }

    pub fn set(&mut self, band: usize, pixel: usize, value: i16) {
        self.bands[band][pixel] = value;
    }
}

/// Check that two rasters cover the same grid.
///
/// Dimensions, projection and every geotransform element must match; the
/// first differing field is reported.
pub fn ensure_compatible(left: &Raster, right: &Raster) -> Result<()> {
    if left.nx != right.nx {
        return Err(EngineError::Misaligned {
            field: "width",
            left: left.nx.to_string(),
            right: right.nx.to_string(),
        });
    }
    if left.ny != right.ny {
        return Err(EngineError::Misaligned {
            field: "height",
            left: left.ny.to_string(),
            right: right.ny.to_string(),
        });
    }
    if left.projection != right.projection {
        return Err(EngineError::Misaligned {
            field: "projection",
            left: left.projection.clone(),
            right: right.projection.clone(),
        });
    }
    if left.geo_transform != right.geo_transform {
        return Err(EngineError::Misaligned {
            field: "geotransform",
            left: format!("{:?}", left.geo_transform),
            right: format!("{:?}", right.geo_transform),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raster(nx: usize, ny: usize, geo: [f64; 6]) -> Raster {
        Raster::filled(nx, ny, 1, NODATA, "EPSG:3035".to_string(), geo)
    }

    const GEO: [f64; 6] = [4500000.0, 10.0, 0.0, 3100000.0, 0.0, -10.0];

    #[test]
    fn storage_conversions_avoid_the_sentinel() {
        assert_eq!(round_to_i16(499.6), 500);
        assert_eq!(round_to_i16(-1.0e9), i16::MIN + 1);
        assert_eq!(truncate_to_i16(-197.75), -197);
        assert_eq!(truncate_to_i16(1.0e9), i16::MAX);
        assert_eq!(truncate_to_i16(-1.0e9), i16::MIN + 1);
    }

    #[test]
    fn blank_rasters_are_nodata_everywhere() {
        let r = raster(4, 3, GEO).blank_like(2, NODATA);
        assert_eq!(r.n_bands(), 2);
        assert!(r.band(0).iter().all(|&v| v == NODATA));
        assert!(r.band(1).iter().all(|&v| v == NODATA));
        assert_eq!(r.valid_value(0, 0), None);
    }

    #[test]
    fn from_bands_rejects_short_buffers() {
        let result = Raster::from_bands(4, 3, NODATA, String::new(), GEO, vec![vec![0; 11]]);
        assert!(result.is_err());
    }

    #[test]
    fn compatible_rasters_pass() {
        assert!(ensure_compatible(&raster(4, 3, GEO), &raster(4, 3, GEO)).is_ok());
    }

    #[test]
    fn mismatches_name_the_field() {
        let err = ensure_compatible(&raster(4, 3, GEO), &raster(5, 3, GEO)).unwrap_err();
        assert!(err.to_string().contains("width"));

        let mut other_geo = GEO;
        other_geo[1] = 20.0;
        let err = ensure_compatible(&raster(4, 3, GEO), &raster(4, 3, other_geo)).unwrap_err();
        assert!(err.to_string().contains("geotransform"));
    }
}
