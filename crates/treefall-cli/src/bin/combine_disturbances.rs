use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use treefall_cli::{io, setup};
use treefall_core::ensure_compatible;
use treefall_core::mask::combine;

/// Overlay per-year disturbance images into one cumulative image.
///
/// For each pixel and band the last valid positive value wins, so later
/// inputs overwrite earlier ones.
#[derive(Parser, Debug)]
#[command(name = "combine-disturbances")]
struct Args {
    /// Number of worker threads (defaults to all cores)
    #[arg(short = 'j', value_name = "N")]
    threads: Option<usize>,

    /// Output image
    #[arg(short = 'o', value_name = "FILE")]
    output: PathBuf,

    /// Input disturbance images, earliest year first
    #[arg(value_name = "IMAGE", required = true)]
    inputs: Vec<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup::init_logging();

    for input in &args.inputs {
        setup::require_exists(input, "input")?;
    }
    setup::require_absent(&args.output, "output")?;
    setup::configure_threads(args.threads)?;

    let mut rasters = Vec::with_capacity(args.inputs.len());
    for path in &args.inputs {
        let raster = io::read_raster(path)?;
        if let Some(first) = rasters.first() {
            ensure_compatible(first, &raster).with_context(|| {
                format!(
                    "images {} and {} are not compatible",
                    args.inputs[0].display(),
                    path.display()
                )
            })?;
        }
        rasters.push(raster);
    }

    let combined = combine(&rasters);
    io::write_raster(&args.output, &combined)?;

    Ok(())
}
