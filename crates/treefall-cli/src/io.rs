//! GDAL-backed raster reading and writing.
//!
//! Rasters are materialized in full at stage entry and written in full
//! at stage exit; nothing here runs inside the parallel region. Outputs
//! are tiled, band-interleaved, ZSTD-compressed GTiffs with the
//! horizontal-differencing predictor and BigTIFF enabled.

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use gdal::raster::{Buffer, RasterCreationOption};
use gdal::{Dataset, DriverManager};
use treefall_core::Raster;

const CREATION_OPTIONS: &[RasterCreationOption<'static>] = &[
    RasterCreationOption {
        key: "COMPRESS",
        value: "ZSTD",
    },
    RasterCreationOption {
        key: "PREDICTOR",
        value: "2",
    },
    RasterCreationOption {
        key: "INTERLEAVE",
        value: "BAND",
    },
    RasterCreationOption {
        key: "BIGTIFF",
        value: "YES",
    },
    RasterCreationOption {
        key: "TILED",
        value: "YES",
    },
    RasterCreationOption {
        key: "BLOCKXSIZE",
        value: "256",
    },
    RasterCreationOption {
        key: "BLOCKYSIZE",
        value: "256",
    },
];

fn open(path: &Path) -> Result<Dataset> {
    Dataset::open(path).with_context(|| format!("could not open {}", path.display()))
}

/// Number of bands in a raster file.
pub fn band_count(path: &Path) -> Result<usize> {
    Ok(open(path)?.raster_count())
}

/// Read every band of a raster file.
pub fn read_raster(path: &Path) -> Result<Raster> {
    let dataset = open(path)?;
    let bands: Vec<usize> = (1..=dataset.raster_count()).collect();
    read_from(&dataset, path, &bands)
}

/// Read a projection of bands (1-based numbers) from a raster file.
pub fn read_raster_bands(path: &Path, bands: &[usize]) -> Result<Raster> {
    let dataset = open(path)?;
    read_from(&dataset, path, bands)
}

fn read_from(dataset: &Dataset, path: &Path, band_numbers: &[usize]) -> Result<Raster> {
    if band_numbers.is_empty() {
        bail!("no bands specified for {}", path.display());
    }

    let (nx, ny) = dataset.raster_size();
    let available = dataset.raster_count();
    let projection = dataset.projection();
    let geo_transform = dataset
        .geo_transform()
        .with_context(|| format!("{} has no geotransform", path.display()))?;

    let mut nodata: Option<i16> = None;
    let mut bands = Vec::with_capacity(band_numbers.len());
    for &number in band_numbers {
        if number < 1 || number > available {
            bail!(
                "band {} out of range for {} ({} bands)",
                number,
                path.display(),
                available
            );
        }
        let band = dataset.rasterband(number)?;
        let declared = band
            .no_data_value()
            .ok_or_else(|| anyhow!("{} has no nodata value", path.display()))?;
        nodata.get_or_insert(declared as i16);

        let buffer = band
            .read_band_as::<i16>()
            .with_context(|| format!("could not read band {} from {}", number, path.display()))?;
        bands.push(buffer.data().to_vec());
    }

    let nodata = nodata.expect("at least one band was read");
    Ok(Raster::from_bands(
        nx,
        ny,
        nodata,
        projection,
        geo_transform,
        bands,
    )?)
}

/// Write a raster as a GTiff.
pub fn write_raster(path: &Path, raster: &Raster) -> Result<()> {
    let driver = DriverManager::get_driver_by_name("GTiff").context("GTiff driver not found")?;
    let mut dataset = driver
        .create_with_band_type_with_options::<i16, _>(
            path,
            raster.nx(),
            raster.ny(),
            raster.n_bands(),
            CREATION_OPTIONS,
        )
        .with_context(|| format!("error creating file {}", path.display()))?;

    dataset.set_projection(raster.projection())?;
    dataset.set_geo_transform(raster.geo_transform())?;

    for b in 0..raster.n_bands() {
        let mut band = dataset.rasterband(b + 1)?;
        let mut buffer = Buffer::new((raster.nx(), raster.ny()), raster.band(b).to_vec());
        band.write((0, 0), (raster.nx(), raster.ny()), &mut buffer)
            .with_context(|| format!("unable to write band {} to {}", b + 1, path.display()))?;
        band.set_no_data_value(Some(f64::from(raster.nodata())))?;
    }

    Ok(())
}
