//! Gzipped tar archive of an application directory
//!
//! The archive is written to a file inside a private temporary directory.
//! [`ArchiveHandle`] owns that directory, so dropping the handle removes the
//! archive whatever path the deploy took.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use tempfile::TempDir;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::DeployError;
use crate::ignore_rules::IgnoreRuleSet;
use crate::model::ArchiveEntry;

const ARCHIVE_NAME: &str = "app.tar.gz";

/// A finished archive on disk; removed when dropped
#[derive(Debug)]
pub struct ArchiveHandle {
    dir: TempDir,
    path: PathBuf,
    entries: Vec<ArchiveEntry>,
    size: u64,
}

impl ArchiveHandle {
    /// Archive file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Files in the archive, in the order they were written
    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    /// Compressed size in bytes
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Remove the archive now, reporting failures that a drop would hide
    pub fn close(self) -> std::io::Result<()> {
        let dir = self.dir.path().to_path_buf();
        self.dir.close()?;
        debug!("Removed archive directory {}", dir.display());
        Ok(())
    }
}

/// Builds the archive for one deploy attempt
pub struct ArchiveBuilder;

impl ArchiveBuilder {
    /// Walk `root`, skipping what `rules` exclude, and write every remaining
    /// file into a new archive under the system temp directory
    pub fn build(root: &Path, rules: &IgnoreRuleSet) -> Result<ArchiveHandle, DeployError> {
        Self::build_in(root, rules, &std::env::temp_dir())
    }

    /// Same as [`ArchiveBuilder::build`], with the archive's private
    /// directory created inside `temp_parent`. Nothing is left there when
    /// the build fails.
    pub fn build_in(
        root: &Path,
        rules: &IgnoreRuleSet,
        temp_parent: &Path,
    ) -> Result<ArchiveHandle, DeployError> {
        let dir = tempfile::Builder::new()
            .prefix("liftoff-deploy-")
            .tempdir_in(temp_parent)?;
        let path = dir.path().join(ARCHIVE_NAME);

        let file = File::create(&path)?;
        let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        let mut tar = tar::Builder::new(encoder);

        let mut entries = Vec::new();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || !rules.should_prune(relative(root, entry.path()))
            });

        for entry in walker {
            let entry = entry.map_err(|err| {
                let path = err.path().unwrap_or(root).to_path_buf();
                let source = err
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("filesystem loop"));
                DeployError::ArchiveBuild { path, source }
            })?;
            if entry.file_type().is_dir() {
                continue;
            }

            let rel = relative(root, entry.path());
            if rules.is_excluded(rel, false) {
                continue;
            }
            if let Some(added) = append_file(&mut tar, entry.path(), rel)? {
                entries.push(added);
            }
        }

        let encoder = tar.into_inner()?;
        let mut writer = encoder.finish()?;
        writer.flush()?;
        drop(writer);

        let size = std::fs::metadata(&path)?.len();
        info!(
            "Archived {} files from {} ({} bytes compressed)",
            entries.len(),
            root.display(),
            size
        );

        Ok(ArchiveHandle {
            dir,
            path,
            entries,
            size,
        })
    }
}

fn relative<'a>(root: &Path, path: &'a Path) -> &'a Path {
    path.strip_prefix(root).unwrap_or(path)
}

/// Add one file, following a symlink to its target. A link to a directory
/// is skipped; a dangling link is an error naming the link.
fn append_file<W: Write>(
    tar: &mut tar::Builder<W>,
    path: &Path,
    rel: &Path,
) -> Result<Option<ArchiveEntry>, DeployError> {
    let archive_error = |source: std::io::Error| DeployError::ArchiveBuild {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(archive_error)?;
    let metadata = file.metadata().map_err(archive_error)?;
    if metadata.is_dir() {
        debug!("Skipping symlink to directory {}", path.display());
        return Ok(None);
    }

    let mut header = tar::Header::new_gnu();
    header.set_metadata_in_mode(&metadata, tar::HeaderMode::Deterministic);
    tar.append_data(&mut header, rel, &mut file)
        .map_err(archive_error)?;

    Ok(Some(ArchiveEntry {
        relative_path: rel.to_path_buf(),
        size: metadata.len(),
    }))
}

#[cfg(test)]
#[path = "archive_tests.rs"]
mod tests;
