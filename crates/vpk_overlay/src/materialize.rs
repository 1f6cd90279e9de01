//! Writing files into the working tree.
//!
//! Overlay trees mirror the archive layout: a file at `<overlay>/models/x.vmdl_c`
//! lands at `<working>/models/x.vmdl_c`. Nothing is filtered and existing files
//! are overwritten, so when several overlays share a destination the one applied
//! last wins.

use crate::error::{Error, Result};
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use filetime::FileTime;
use std::fs;
use walkdir::WalkDir;

/// Copy every regular file under `overlay_root` into `working_root`.
///
/// Files are visited in file-name order so runs are reproducible. Symlinks are
/// followed and the target's content is copied. Returns the number of files
/// written.
pub fn apply_overlay(overlay_root: &Utf8Path, working_root: &Utf8Path) -> Result<usize> {
    let mut written = 0;

    for entry in WalkDir::new(overlay_root.as_std_path())
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let source = Utf8Path::from_path(entry.path())
            .ok_or_else(|| Error::NonUtf8Path(entry.path().to_path_buf()))?;
        let relative = source
            .strip_prefix(overlay_root)
            .map_err(|_| Error::UnsafeEntryPath(source.to_string()))?;

        copy_with_mtime(source, &working_root.join(relative))?;
        tracing::debug!("Overlay file {}", relative);
        written += 1;
    }

    Ok(written)
}

/// Copy one loose file to `destination` (relative to `working_root`).
pub fn inject_file(source: &Utf8Path, working_root: &Utf8Path, destination: &str) -> Result<()> {
    let relative = sanitize_entry_path(destination)?;
    copy_with_mtime(source, &working_root.join(relative))
}

/// Write an extracted archive entry below `working_root`.
pub fn write_entry(working_root: &Utf8Path, entry_path: &str, bytes: &[u8]) -> Result<()> {
    let relative = sanitize_entry_path(entry_path)?;
    let destination = working_root.join(relative);
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent.as_std_path())?;
    }
    fs::write(destination.as_std_path(), bytes)?;
    Ok(())
}

/// Normalize an archive path to a relative path that stays inside the tree.
///
/// Backslashes become separators; empty and `.` components are dropped.
/// Absolute paths and `..` components are rejected.
pub fn sanitize_entry_path(entry_path: &str) -> Result<Utf8PathBuf> {
    let unified = entry_path.replace('\\', "/");
    let mut relative = Utf8PathBuf::new();

    for component in Utf8Path::new(&unified).components() {
        match component {
            Utf8Component::Normal(part) => relative.push(part),
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir | Utf8Component::RootDir | Utf8Component::Prefix(_) => {
                return Err(Error::UnsafeEntryPath(entry_path.to_string()));
            }
        }
    }

    if relative.as_str().is_empty() {
        return Err(Error::UnsafeEntryPath(entry_path.to_string()));
    }
    Ok(relative)
}

fn copy_with_mtime(source: &Utf8Path, destination: &Utf8Path) -> Result<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent.as_std_path())?;
    }
    // fs::copy carries the permission bits, so an earlier read-only copy must go first.
    if let Ok(existing) = fs::symlink_metadata(destination.as_std_path()) {
        if existing.permissions().readonly() {
            fs::remove_file(destination.as_std_path())?;
        }
    }
    fs::copy(source.as_std_path(), destination.as_std_path())?;

    // Best effort, not every filesystem keeps modification times.
    match fs::metadata(source.as_std_path()) {
        Ok(metadata) => {
            let mtime = FileTime::from_last_modification_time(&metadata);
            if let Err(e) = filetime::set_file_mtime(destination.as_std_path(), mtime) {
                tracing::debug!("Could not preserve mtime on {}: {}", destination, e);
            }
        }
        Err(e) => tracing::debug!("Could not read mtime of {}: {}", source, e),
    }
    Ok(())
}
