//! Loading observation stacks from the positional input list.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use treefall_core::{ensure_compatible, ObsDate, ObservationStack, Raster};

use crate::io;

/// Read the input images in order, extract their acquisition dates from
/// the file names, and verify each against the alignment reference.
pub fn load_stack(
    paths: &[PathBuf],
    reference: &Raster,
    reference_label: &Path,
) -> Result<ObservationStack> {
    let mut rasters = Vec::with_capacity(paths.len());
    let mut dates = Vec::with_capacity(paths.len());

    for path in paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let date = ObsDate::from_file_name(&name)?;

        let raster = io::read_raster(path)?;
        ensure_compatible(reference, &raster).with_context(|| {
            format!(
                "images {} and {} are not compatible",
                reference_label.display(),
                path.display()
            )
        })?;

        rasters.push(raster);
        dates.push(date);
    }

    Ok(ObservationStack::new(rasters, dates)?)
}
