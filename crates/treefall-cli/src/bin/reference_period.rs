use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};

use treefall_cli::{io, percent, setup, stack};
use treefall_core::reference_period::{self, PreviousState, ReferencePeriodParams};
use treefall_core::{ensure_compatible, HarmonicSpec};

/// Extend the per-pixel harmonic reference period by one year.
///
/// Reads the previous run's reference-period and coefficient images,
/// checks the target year's observations against the previous model, and
/// writes the updated pair. Pass a single-band coefficient image to mark
/// the initial run.
#[derive(Parser, Debug)]
#[command(name = "reference-period")]
struct Args {
    /// Number of worker threads (defaults to all cores)
    #[arg(short = 'j', value_name = "N")]
    threads: Option<usize>,

    /// Mask image
    #[arg(short = 'x', value_name = "FILE")]
    mask: PathBuf,

    /// Input reference period image from the previous run
    #[arg(short = 'p', value_name = "FILE")]
    input_reference_period: PathBuf,

    /// Output reference period image
    #[arg(short = 'r', value_name = "FILE")]
    output_reference_period: PathBuf,

    /// Input coefficient image from the previous run
    #[arg(short = 'i', value_name = "FILE")]
    input_coefficients: PathBuf,

    /// Output coefficient image
    #[arg(short = 'c', value_name = "FILE")]
    output_coefficients: PathBuf,

    /// Number of modes for fitting the harmonic model (1-3)
    #[arg(short = 'm', value_name = "MODES", value_parser = clap::value_parser!(u8).range(1..=3))]
    modes: u8,

    /// Fit a trend coefficient? (0 = no, 1 = yes)
    #[arg(short = 't', value_name = "TREND", value_parser = clap::value_parser!(u8).range(0..=1))]
    trend: u8,

    /// Latest year to fit the reference period to
    #[arg(short = 'y', value_name = "YEAR", value_parser = clap::value_parser!(i32).range(1970..=2100))]
    year: i32,

    /// Threshold for detecting change; the sign selects the direction
    #[arg(short = 's', value_name = "THRESHOLD", allow_hyphen_values = true)]
    threshold: f64,

    /// Confirmation number for detecting change
    #[arg(short = 'n', value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    confirmation: u32,

    /// Input images, ordered by date (earliest to latest); none may be
    /// from after the target year
    #[arg(value_name = "IMAGE", required = true)]
    inputs: Vec<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup::init_logging();

    if args.threshold == 0.0 {
        bail!("threshold must be non-zero");
    }
    setup::require_exists(&args.mask, "mask")?;
    setup::require_exists(&args.input_reference_period, "input reference period")?;
    setup::require_exists(&args.input_coefficients, "input coefficient")?;
    for input in &args.inputs {
        setup::require_exists(input, "input")?;
    }
    setup::require_absent(&args.output_reference_period, "output")?;
    setup::require_absent(&args.output_coefficients, "output")?;
    setup::configure_threads(args.threads)?;

    let harmonic = HarmonicSpec::new(args.modes, args.trend == 1)?;

    let mask = io::read_raster(&args.mask)?;
    let previous_coefficients = io::read_raster(&args.input_coefficients)?;
    ensure_compatible(&mask, &previous_coefficients).with_context(|| {
        format!(
            "images {} and {} are not compatible",
            args.mask.display(),
            args.input_coefficients.display()
        )
    })?;
    let previous_reference = io::read_raster(&args.input_reference_period)?;
    ensure_compatible(&mask, &previous_reference).with_context(|| {
        format!(
            "images {} and {} are not compatible",
            args.mask.display(),
            args.input_reference_period.display()
        )
    })?;

    let stack = stack::load_stack(&args.inputs, &mask, &args.mask)?;

    // a single-band coefficient image marks the initial run
    let initial = previous_coefficients.n_bands() == 1;
    let previous = (!initial).then_some(PreviousState {
        reference_period: &previous_reference,
        coefficients: &previous_coefficients,
    });

    let params = ReferencePeriodParams {
        harmonic,
        threshold: args.threshold,
        confirmation: args.confirmation,
        target_year: args.year,
    };
    let output = reference_period::run(&stack, &mask, previous, &params)?;

    let stats = output.stats;
    info!(
        "fitted new models for {} of {} pixels ({:.2}%)",
        stats.fitted,
        stats.pixels,
        percent(stats.fitted, stats.pixels)
    );
    info!(
        "stopped extending the reference period for {} pixels ({:.2}%)",
        stats.newly_broken,
        percent(stats.newly_broken, stats.pixels)
    );
    info!(
        "reference period already ended earlier for {} pixels ({:.2}%)",
        stats.already_broken,
        percent(stats.already_broken, stats.pixels)
    );
    if stats.invalid_reference > 0 {
        warn!(
            "{} pixels carried an invalid previous reference year",
            stats.invalid_reference
        );
    }

    io::write_raster(&args.output_reference_period, &output.reference_period)?;
    io::write_raster(&args.output_coefficients, &output.coefficients)?;

    Ok(())
}
