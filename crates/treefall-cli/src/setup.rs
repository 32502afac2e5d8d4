//! Process setup shared by the stage executables.

use std::path::Path;

use anyhow::{bail, Context, Result};
use rayon::ThreadPoolBuilder;

/// Install the stdout log subscriber.
pub fn init_logging() {
    tracing_subscriber::fmt().with_target(false).init();
}

/// Configure the global worker pool. `None` uses all cores.
pub fn configure_threads(requested: Option<usize>) -> Result<()> {
    let count = match requested {
        Some(0) => bail!("number of worker threads must be at least 1"),
        Some(n) => n,
        None => num_cpus::get(),
    };
    ThreadPoolBuilder::new()
        .num_threads(count)
        .build_global()
        .context("could not configure the worker pool")?;
    Ok(())
}

/// Fail before any heavy work if an input is missing.
pub fn require_exists(path: &Path, what: &str) -> Result<()> {
    if !path.exists() {
        bail!("{} file {} does not exist", what, path.display());
    }
    Ok(())
}

/// Fail before any heavy work rather than overwrite an output.
pub fn require_absent(path: &Path, what: &str) -> Result<()> {
    if path.exists() {
        bail!("{} file {} already exists", what, path.display());
    }
    Ok(())
}
