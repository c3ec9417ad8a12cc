//! Filesystem helpers for write-then-rename publication.
//!
//! Cache entries are produced into a per-writer temporary sibling and renamed
//! into place only once complete, so readers never observe a partial file and
//! concurrent writers never touch each other's bytes.

use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::io;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};

/// Suffix appended to a final path while its content is being written.
pub const TEMP_SUFFIX: &str = ".tmp";

static NEXT_TEMP: AtomicU64 = AtomicU64::new(0);

/// Create the parent directories of `path` when missing.
///
/// A concurrent creator winning the race is not an error.
///
/// # Errors
///
/// Returns an I/O error when the directories cannot be created or the parent
/// exists but is not a directory.
pub fn ensure_parent_dirs(path: &Utf8Path) -> io::Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_str().is_empty() || parent.is_dir() {
        return Ok(());
    }
    match fs::create_dir_all(parent) {
        Ok(()) => Ok(()),
        Err(_) if parent.is_dir() => Ok(()),
        Err(e) => Err(e),
    }
}

/// A `<file>.<pid>-<n>.tmp` sibling owned by a single writer of `path`.
///
/// Every call returns a different name, so concurrent writers in one process
/// or across processes never share a temporary file. The name keeps the
/// [`TEMP_SUFFIX`] ending, which cache sweeps skip.
///
/// # Examples
///
/// ```
/// use camino::Utf8Path;
/// use stowaway_common::fs::{TEMP_SUFFIX, temp_sibling};
///
/// let target = Utf8Path::new("/c/lib.jar");
/// let first = temp_sibling(target);
/// assert!(first.as_str().starts_with("/c/lib.jar."));
/// assert!(first.as_str().ends_with(TEMP_SUFFIX));
/// assert_ne!(first, temp_sibling(target));
/// ```
#[must_use]
pub fn temp_sibling(path: &Utf8Path) -> Utf8PathBuf {
    let sequence = NEXT_TEMP.fetch_add(1, Ordering::Relaxed);
    Utf8PathBuf::from(format!(
        "{path}.{}-{sequence}{TEMP_SUFFIX}",
        process::id()
    ))
}

/// Prepare a temporary sibling for this writer of `path`.
///
/// Creates the parent directories. A file already holding the name can only
/// be a leftover from an earlier process with the same id and is removed.
///
/// # Errors
///
/// Returns an I/O error when the directories cannot be created or the stale
/// file cannot be removed.
pub fn prepare_temp(path: &Utf8Path) -> io::Result<Utf8PathBuf> {
    ensure_parent_dirs(path)?;
    let temp = temp_sibling(path);
    remove_if_exists(&temp)?;
    Ok(temp)
}

/// Temporary files left beside `path` by [`prepare_temp`].
///
/// # Errors
///
/// Returns an I/O error when the parent directory cannot be listed. A missing
/// directory yields an empty list.
pub fn temp_siblings(path: &Utf8Path) -> io::Result<Vec<Utf8PathBuf>> {
    let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
        return Ok(Vec::new());
    };
    let entries = match fs::read_dir(parent) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let prefix = format!("{name}.");
    let mut found = Vec::new();
    for entry in entries {
        let entry_name = entry?.file_name();
        let Some(sibling) = entry_name.to_str() else {
            continue;
        };
        if sibling.starts_with(&prefix) && sibling.ends_with(TEMP_SUFFIX) {
            found.push(parent.join(sibling));
        }
    }
    found.sort();
    Ok(found)
}

/// Atomically move a completed temporary file to its final location.
///
/// # Errors
///
/// Returns an I/O error when the rename fails.
pub fn publish(temp: &Utf8Path, destination: &Utf8Path) -> io::Result<()> {
    fs::rename(temp, destination)
}

/// Remove a file, treating "already gone" as success.
///
/// # Errors
///
/// Returns any I/O error other than [`io::ErrorKind::NotFound`].
pub fn remove_if_exists(path: &Utf8Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
