use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;

use treefall_cli::{io, percent, setup, stack};
use treefall_core::disturbance::{self, DisturbanceParams};
use treefall_core::{ensure_compatible, HarmonicSpec};

/// Detect confirmed disturbances in one year of observations.
///
/// Scans the input images against the frozen reference model and writes
/// a three-band image holding the timestamp of the first alert of each
/// confirmed disturbance (days since epoch, year, day of year).
#[derive(Parser, Debug)]
#[command(name = "disturbance-detection")]
struct Args {
    /// Number of worker threads (defaults to all cores)
    #[arg(short = 'j', value_name = "N")]
    threads: Option<usize>,

    /// Mask image
    #[arg(short = 'x', value_name = "FILE")]
    mask: PathBuf,

    /// Coefficient image from the reference-period fit
    #[arg(short = 'c', value_name = "FILE")]
    coefficients: PathBuf,

    /// Statistics image; band 2 holds the per-pixel variability
    #[arg(short = 's', value_name = "FILE")]
    statistics: PathBuf,

    /// Output image
    #[arg(short = 'o', value_name = "FILE")]
    output: PathBuf,

    /// Number of modes for fitting the harmonic model (1-3)
    #[arg(short = 'm', value_name = "MODES", value_parser = clap::value_parser!(u8).range(1..=3))]
    modes: u8,

    /// Fit a trend coefficient? (0 = no, 1 = yes)
    #[arg(short = 't', value_name = "TREND", value_parser = clap::value_parser!(u8).range(0..=1))]
    trend: u8,

    /// Variability threshold multiplier
    #[arg(short = 'd', value_name = "FACTOR", allow_hyphen_values = true)]
    threshold_variability: f64,

    /// Minimum residual threshold; the sign selects the direction
    #[arg(short = 'r', value_name = "THRESHOLD", allow_hyphen_values = true)]
    threshold_residual: f64,

    /// Consecutive observations required to confirm (or revert)
    #[arg(short = 'n', value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    confirmation: u32,

    /// Input images, ordered by date, all from the same year
    #[arg(value_name = "IMAGE", required = true)]
    inputs: Vec<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup::init_logging();

    if args.threshold_residual == 0.0 {
        bail!("residual threshold must be non-zero");
    }
    if args.threshold_variability == 0.0 {
        bail!("variability threshold must be non-zero");
    }
    setup::require_exists(&args.mask, "mask")?;
    setup::require_exists(&args.coefficients, "coefficient")?;
    setup::require_exists(&args.statistics, "statistics")?;
    for input in &args.inputs {
        setup::require_exists(input, "input")?;
    }
    setup::require_absent(&args.output, "output")?;
    setup::configure_threads(args.threads)?;

    let harmonic = HarmonicSpec::new(args.modes, args.trend == 1)?;

    let mask = io::read_raster(&args.mask)?;
    let coefficients = io::read_raster(&args.coefficients)?;
    ensure_compatible(&mask, &coefficients).with_context(|| {
        format!(
            "images {} and {} are not compatible",
            args.mask.display(),
            args.coefficients.display()
        )
    })?;
    let statistics = io::read_raster(&args.statistics)?;
    ensure_compatible(&mask, &statistics).with_context(|| {
        format!(
            "images {} and {} are not compatible",
            args.mask.display(),
            args.statistics.display()
        )
    })?;

    let stack = stack::load_stack(&args.inputs, &mask, &args.mask)?;

    let params = DisturbanceParams {
        harmonic,
        threshold_residual: args.threshold_residual,
        threshold_variability: args.threshold_variability,
        confirmation: args.confirmation,
    };
    let output = disturbance::run(&stack, &mask, &statistics, &coefficients, &params)?;

    let stats = output.stats;
    info!(
        "alerts were raised for {} of {} pixels ({:.2}%)",
        stats.alerts,
        stats.pixels,
        percent(stats.alerts, stats.pixels)
    );
    info!(
        "alerts were reverted for {} of {} pixels ({:.2}%)",
        stats.reversions,
        stats.pixels,
        percent(stats.reversions, stats.pixels)
    );
    info!(
        "disturbances were detected for {} of {} pixels ({:.2}%)",
        stats.detected,
        stats.pixels,
        percent(stats.detected, stats.pixels)
    );

    io::write_raster(&args.output, &output.disturbance)?;

    Ok(())
}
