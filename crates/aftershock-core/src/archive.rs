//! Archival of superseded event artifacts.
//!
//! When an event is updated, the loose files of its directory (extracted
//! layers, epicenter record, exports) belong to the previous version.
//! They are bundled into `archive_YYYYMMDD.zip`, labeled by the previous
//! version's `updated` date in UTC, before the new version is extracted.
//!
//! The zip is written under a temporary name, synced and renamed into
//! place; loose files are deleted only after the rename succeeded.
//!
//! The caller decides whether the loose files are still the previous
//! version's; the pipeline checks `epicenter.json` before preserving.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

use crate::error::ArchiveError;

/// File name prefix of archives.
const ARCHIVE_PREFIX: &str = "archive_";

/// What to do when the day's archive label already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Use the first free `archive_YYYYMMDD_N` label.
    #[default]
    Suffix,
    /// Delete the loose files without archiving them.
    Discard,
}

/// Result of preserving an event directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// Loose files were bundled into `path` and removed.
    Archived {
        /// Written archive.
        path: PathBuf,
        /// Number of files bundled.
        files: usize,
    },
    /// The label was taken and the policy discarded the loose files.
    Discarded {
        /// Number of files removed.
        files: usize,
    },
    /// Nothing to preserve.
    Empty,
}

/// Archive label for a version last updated at `updated`.
pub fn archive_label(updated: DateTime<Utc>) -> String {
    format!("{ARCHIVE_PREFIX}{}", updated.format("%Y%m%d"))
}

/// Whether a file name denotes an archive written by this module.
fn is_archive_name(name: &str) -> bool {
    name.starts_with(ARCHIVE_PREFIX)
        && Path::new(name)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
}

/// Whether a file name denotes a partially written archive.
fn is_partial_name(name: &str) -> bool {
    name.starts_with(".archive_")
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> ArchiveError + '_ {
    move |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Preserves previous artifacts of updated events.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveManager {
    policy: CollisionPolicy,
}

impl ArchiveManager {
    /// Create a manager with the given collision policy.
    pub const fn new(policy: CollisionPolicy) -> Self {
        Self { policy }
    }

    /// Bundle the loose files of `event_dir` into an archive labeled by
    /// `previous_updated`.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] if the directory cannot be listed or the
    /// archive cannot be written. Loose files are left untouched in that
    /// case.
    pub fn preserve(
        &self,
        event_dir: &Path,
        previous_updated: DateTime<Utc>,
    ) -> Result<ArchiveOutcome, ArchiveError> {
        let files = loose_files(event_dir)?;
        if files.is_empty() {
            return Ok(ArchiveOutcome::Empty);
        }

        let base = archive_label(previous_updated);
        let label = match self.policy {
            CollisionPolicy::Suffix => Some(free_label(event_dir, &base)?),
            CollisionPolicy::Discard => {
                (!archive_path(event_dir, &base).exists()).then(|| base.clone())
            }
        };

        let Some(label) = label else {
            remove_files(&files)?;
            tracing::warn!(
                dir = %event_dir.display(),
                label = %base,
                files = files.len(),
                "Archive label taken, discarded previous artifacts"
            );
            return Ok(ArchiveOutcome::Discarded { files: files.len() });
        };

        let path = write_archive(event_dir, &label, &files)?;
        remove_files(&files)?;
        tracing::info!(
            archive = %path.display(),
            files = files.len(),
            "Archived previous artifacts"
        );
        Ok(ArchiveOutcome::Archived {
            path,
            files: files.len(),
        })
    }
}

fn archive_path(dir: &Path, label: &str) -> PathBuf {
    dir.join(format!("{label}.zip"))
}

/// The base label if free, else the first free numbered variant.
fn free_label(dir: &Path, base: &str) -> Result<String, ArchiveError> {
    if !archive_path(dir, base).exists() {
        return Ok(base.to_owned());
    }
    (1..=u16::MAX)
        .map(|n| format!("{base}_{n}"))
        .find(|label| !archive_path(dir, label).exists())
        .ok_or_else(|| ArchiveError::LabelExhausted(base.to_owned()))
}

/// Regular files of `dir` that are neither archives nor partial archives,
/// sorted by name. A missing directory has none.
fn loose_files(dir: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_error(dir))? {
        let entry = entry.map_err(io_error(dir))?;
        let file_type = entry.file_type().map_err(io_error(&entry.path()))?;
        if !file_type.is_file() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if is_archive_name(&name) || is_partial_name(&name) {
            continue;
        }
        files.push(entry.path());
    }
    files.sort();
    Ok(files)
}

fn write_archive(dir: &Path, label: &str, files: &[PathBuf]) -> Result<PathBuf, ArchiveError> {
    let final_path = archive_path(dir, label);
    let tmp_path = dir.join(format!(".{label}.zip.tmp"));

    let result = write_zip(&tmp_path, files).and_then(|()| {
        fs::rename(&tmp_path, &final_path).map_err(io_error(&final_path))
    });
    if result.is_err() && tmp_path.exists() {
        if let Err(e) = fs::remove_file(&tmp_path) {
            tracing::warn!(path = %tmp_path.display(), error = %e, "Failed to remove partial archive");
        }
    }
    result.map(|()| final_path)
}

fn write_zip(path: &Path, files: &[PathBuf]) -> Result<(), ArchiveError> {
    let file = File::create(path).map_err(io_error(path))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for source in files {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        writer.start_file(name, options)?;
        let mut input = File::open(source).map_err(io_error(source))?;
        io::copy(&mut input, &mut writer).map_err(io_error(source))?;
    }

    let file = writer.finish()?;
    file.sync_all().map_err(io_error(path))?;
    Ok(())
}

fn remove_files(files: &[PathBuf]) -> Result<(), ArchiveError> {
    for file in files {
        fs::remove_file(file).map_err(io_error(file))?;
    }
    Ok(())
}
