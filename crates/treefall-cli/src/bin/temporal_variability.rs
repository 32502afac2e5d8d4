use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use treefall_cli::{io, percent, setup, stack};
use treefall_core::variability;
use treefall_core::ensure_compatible;

/// Compute per-pixel temporal variability over the reference window.
///
/// For each in-mask pixel the standard deviation of the observations
/// acquired in the pixel's reference year (band 1 of the reference-period
/// image) is written as a single-band image.
#[derive(Parser, Debug)]
#[command(name = "temporal-variability")]
struct Args {
    /// Number of worker threads (defaults to all cores)
    #[arg(short = 'j', value_name = "N")]
    threads: Option<usize>,

    /// Mask image
    #[arg(short = 'x', value_name = "FILE")]
    mask: PathBuf,

    /// Reference period image
    #[arg(short = 'r', value_name = "FILE")]
    reference: PathBuf,

    /// Output image
    #[arg(short = 'o', value_name = "FILE")]
    output: PathBuf,

    /// Input images, ordered by date (earliest to latest)
    #[arg(value_name = "IMAGE", required = true)]
    inputs: Vec<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup::init_logging();

    setup::require_exists(&args.mask, "mask")?;
    setup::require_exists(&args.reference, "reference")?;
    for input in &args.inputs {
        setup::require_exists(input, "input")?;
    }
    setup::require_absent(&args.output, "output")?;
    setup::configure_threads(args.threads)?;

    let mask = io::read_raster(&args.mask)?;
    let reference = io::read_raster(&args.reference)?;
    ensure_compatible(&mask, &reference).with_context(|| {
        format!(
            "images {} and {} are not compatible",
            args.mask.display(),
            args.reference.display()
        )
    })?;

    let stack = stack::load_stack(&args.inputs, &mask, &args.mask)?;

    let output = variability::run(&stack, &mask, &reference)?;

    let stats = output.stats;
    info!(
        "computed variability for {} of {} pixels ({:.2}%)",
        stats.computed,
        stats.pixels,
        percent(stats.computed, stats.pixels)
    );
    info!(
        "no reference window for {} pixels ({:.2}%)",
        stats.empty_window,
        percent(stats.empty_window, stats.pixels)
    );

    io::write_raster(&args.output, &output.variability)?;

    Ok(())
}
