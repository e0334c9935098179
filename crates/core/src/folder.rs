//! Loader for per-page image files written by `pdftocairo`.

use crate::error::Result;
use crate::raster::RawImageBuffer;
use crate::resample::decode_file;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Load every `<prefix>*.<extension>` file in `dir`, ordered by filename.
///
/// Page order relies on the writer zero-padding page numbers, which
/// `pdftocairo` does. Files are decoded in parallel but returned in
/// filename order, fully in memory, so the caller may delete `dir` as soon
/// as this returns.
pub fn load_images_from_dir(
    dir: &Path,
    prefix: &str,
    extension: &str,
) -> Result<Vec<RawImageBuffer>> {
    let paths = matching_files(dir, prefix, extension)?;
    debug!(
        "Loading {} '{}*.{}' images from {:?}",
        paths.len(),
        prefix,
        extension,
        dir
    );

    paths.par_iter().map(|path| decode_file(path)).collect()
}

/// Matching file paths, sorted by filename.
fn matching_files(dir: &Path, prefix: &str, extension: &str) -> Result<Vec<PathBuf>> {
    let suffix = format!(".{}", extension);
    let mut names: Vec<String> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with(prefix) && name.ends_with(&suffix))
        .collect();
    names.sort();
    Ok(names.into_iter().map(|name| dir.join(name)).collect())
}
