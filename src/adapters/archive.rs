use anyhow::{Context, Result, bail};
use std::fs::File;
use std::io::{BufReader, BufWriter, copy};
use std::path::Path;
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

/// Result of packing a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub files: u64,
    pub total_bytes: u64,
}

/// Pack the contents of `source` into a zip file at `out`.
///
/// Entry names are relative to `source`, so the directory itself is not part
/// of the archive. Blocking; call from `spawn_blocking` in async code.
pub fn zip_directory(source: &Path, out: &Path) -> Result<ArchiveSummary> {
    if !source.is_dir() {
        bail!("Not a directory: {}", source.display());
    }

    let file =
        File::create(out).with_context(|| format!("Failed to create {}", out.display()))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));

    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(9))
        .unix_permissions(0o644);

    let mut files = 0u64;
    for entry in WalkDir::new(source).min_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", source.display()))?;
        let relative = entry.path().strip_prefix(source)?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            zip.add_directory(name, options.unix_permissions(0o755))?;
            continue;
        }

        debug!(file = %name, "Adding file to archive");
        zip.start_file(name, options)?;
        let mut reader = BufReader::new(
            File::open(entry.path())
                .with_context(|| format!("Failed to open {}", entry.path().display()))?,
        );
        copy(&mut reader, &mut zip)?;
        files += 1;
    }

    let writer = zip.finish().context("Failed to finalize archive")?;
    let file = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush archive: {}", e.error()))?;
    let total_bytes = file.metadata()?.len();

    info!(
        source = %source.display(),
        archive = %out.display(),
        files,
        total_bytes,
        "Archive finalized"
    );

    Ok(ArchiveSummary { files, total_bytes })
}
