use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use treefall_cli::{io, percent, setup};
use treefall_core::spectral::{self, band_mapping_for};
use treefall_core::ensure_compatible;

/// Compute the continuum-removed SWIR1 index for one acquisition date.
///
/// Reads the NIR/SWIR1/SWIR2 bands of a level-2 reflectance image
/// (Sentinel-2 layout, or the six-band Landsat layout), screens each
/// pixel against the quality image and the mask, and writes the index as
/// a single-band image.
#[derive(Parser, Debug)]
#[command(name = "spectral-index")]
struct Args {
    /// Number of worker threads (defaults to all cores)
    #[arg(short = 'j', value_name = "N")]
    threads: Option<usize>,

    /// Reflectance image (level-2, Sentinel-2 or Landsat)
    #[arg(short = 'r', value_name = "FILE")]
    reflectance: PathBuf,

    /// Quality image
    #[arg(short = 'q', value_name = "FILE")]
    quality: PathBuf,

    /// Mask image
    #[arg(short = 'x', value_name = "FILE")]
    mask: PathBuf,

    /// Output image
    #[arg(short = 'o', value_name = "FILE")]
    output: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup::init_logging();

    setup::require_exists(&args.reflectance, "reflectance")?;
    setup::require_exists(&args.quality, "quality")?;
    setup::require_exists(&args.mask, "mask")?;
    setup::require_absent(&args.output, "output")?;
    setup::configure_threads(args.threads)?;

    let mapping = band_mapping_for(io::band_count(&args.reflectance)?)?;
    let reflectance = io::read_raster_bands(&args.reflectance, &mapping.bands)?;

    let quality = io::read_raster(&args.quality)?;
    ensure_compatible(&reflectance, &quality).with_context(|| {
        format!(
            "images {} and {} are not compatible",
            args.reflectance.display(),
            args.quality.display()
        )
    })?;
    let mask = io::read_raster(&args.mask)?;
    ensure_compatible(&reflectance, &mask).with_context(|| {
        format!(
            "images {} and {} are not compatible",
            args.reflectance.display(),
            args.mask.display()
        )
    })?;

    let output = spectral::run(&reflectance, &quality, &mask, &mapping)?;

    let stats = output.stats;
    info!(
        "computed the index for {} of {} pixels ({:.2}%)",
        stats.computed,
        stats.pixels,
        percent(stats.computed, stats.pixels)
    );
    info!(
        "screened out {} pixels ({:.2}%)",
        stats.screened,
        percent(stats.screened, stats.pixels)
    );

    io::write_raster(&args.output, &output.index)?;

    Ok(())
}
