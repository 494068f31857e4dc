//! Gzip-compressed tar archives for backup storage.
//!
//! Both functions are synchronous and expected to run under
//! `tokio::task::spawn_blocking`.

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::path::Path;
use tar::{Archive, Builder};

/// Pack the contents of `source_dir` (not the directory itself) into a
/// `.tar.gz` at `dest`. Entry names are relative to `source_dir`.
pub fn create_tar_gz(source_dir: &Path, dest: &Path) -> Result<()> {
    let file = File::create(dest)
        .with_context(|| format!("creating archive {}", dest.display()))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = Builder::new(encoder);

    let entries = std::fs::read_dir(source_dir)
        .with_context(|| format!("reading staging directory {}", source_dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let path = entry.path();
        if path.is_dir() {
            builder
                .append_dir_all(&name, &path)
                .with_context(|| format!("archiving directory {}", path.display()))?;
        } else {
            builder
                .append_path_with_name(&path, &name)
                .with_context(|| format!("archiving file {}", path.display()))?;
        }
    }

    builder
        .into_inner()
        .context("finalizing tar stream")?
        .finish()
        .context("finalizing gzip stream")?;
    Ok(())
}

/// Unpack a `.tar.gz` into `dest_dir`, creating it if needed.
pub fn extract_tar_gz(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let file = File::open(archive_path)
        .with_context(|| format!("opening archive {}", archive_path.display()))?;
    let mut archive = Archive::new(GzDecoder::new(file));
    archive
        .unpack(dest_dir)
        .with_context(|| format!("unpacking archive into {}", dest_dir.display()))?;
    Ok(())
}
