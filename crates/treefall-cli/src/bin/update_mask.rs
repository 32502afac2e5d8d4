use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use treefall_cli::{io, setup};
use treefall_core::ensure_compatible;
use treefall_core::mask::update_mask;

/// Exclude detected disturbances from the processing mask.
#[derive(Parser, Debug)]
#[command(name = "update-mask")]
struct Args {
    /// Disturbance image
    #[arg(short = 'd', value_name = "FILE")]
    disturbance: PathBuf,

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

    setup::require_exists(&args.disturbance, "disturbance")?;
    setup::require_exists(&args.mask, "mask")?;
    setup::require_absent(&args.output, "output")?;

    let disturbance = io::read_raster(&args.disturbance)?;
    let mask = io::read_raster(&args.mask)?;
    ensure_compatible(&disturbance, &mask).with_context(|| {
        format!(
            "images {} and {} are not compatible",
            args.disturbance.display(),
            args.mask.display()
        )
    })?;

    let updated = update_mask(&disturbance, &mask);
    io::write_raster(&args.output, &updated)?;

    Ok(())
}
