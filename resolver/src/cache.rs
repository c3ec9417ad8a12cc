//! On-disk artifact cache with last-used tracking and eviction.
//!
//! Entries live at `<root>/<group/as/dirs>/<name>/<version>/<file>`, with
//! pipeline outputs stored next to their inputs. Every read-hit or write
//! refreshes a `<file>.last-used.txt` sidecar holding a decimal millisecond
//! timestamp; [`CacheStore::sweep`] deletes entries whose marker is older
//! than a TTL and prunes the directories they leave empty.

use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, warn};
use std::fs;
use std::io;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use stowaway_common::coordinate::ArtifactCoordinate;
use stowaway_common::fs::{TEMP_SUFFIX, ensure_parent_dirs};

/// Suffix of the last-used sidecar file.
pub const LAST_USED_SUFFIX: &str = ".last-used.txt";

/// Entries unused for longer than this are evicted by default.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Errors arising from cache bookkeeping.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Writing a last-used marker failed.
    #[error("failed to write last-used marker {path}: {source}")]
    MarkUsed {
        /// Path of the marker file.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Walking or deleting cache contents failed.
    #[error("failed to clean cache entry {path}: {source}")]
    Sweep {
        /// Path that could not be read or removed.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A path under the cache root is not valid UTF-8.
    #[error("cache path is not valid UTF-8: {path}")]
    NonUtf8Path {
        /// Lossy rendering of the offending path.
        path: String,
    },
}

/// Counts reported by a sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries deleted because their marker was older than the TTL.
    pub evicted: usize,
    /// Entries kept because they were used within the TTL.
    pub retained: usize,
    /// Entries skipped because they have no readable marker.
    pub unmarked: usize,
}

/// A cache directory.
///
/// Cloning is cheap; clones refer to the same directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStore {
    root: Utf8PathBuf,
}

impl CacheStore {
    /// Create a store rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The cache root directory.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Resolve a cache-relative key path. Pure path arithmetic.
    #[must_use]
    pub fn locate(&self, relative: &Utf8Path) -> Utf8PathBuf {
        self.root.join(relative)
    }

    /// Cache slot for a coordinate.
    ///
    /// # Examples
    ///
    /// ```
    /// use stowaway_common::coordinate::ArtifactCoordinate;
    /// use stowaway_resolver::cache::CacheStore;
    ///
    /// let cache = CacheStore::new("/var/cache/stowaway");
    /// let coordinate = ArtifactCoordinate::parse("org.example:lib:1.0", &"0".repeat(64))
    ///     .expect("valid");
    /// assert_eq!(
    ///     cache.artifact_path(&coordinate).as_str(),
    ///     "/var/cache/stowaway/org/example/lib/1.0/lib-1.0.jar"
    /// );
    /// ```
    #[must_use]
    pub fn artifact_path(&self, coordinate: &ArtifactCoordinate) -> Utf8PathBuf {
        self.locate(&coordinate.repository_path())
    }

    /// Refresh the last-used marker of `path` to the current time.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::MarkUsed`] when the marker cannot be written.
    pub fn mark_used(&self, path: &Utf8Path) -> Result<(), CacheError> {
        self.mark_used_at(path, SystemTime::now())
    }

    /// Set the last-used marker of `path` to `when`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::MarkUsed`] when the marker cannot be written.
    pub fn mark_used_at(&self, path: &Utf8Path, when: SystemTime) -> Result<(), CacheError> {
        let marker = last_used_marker(path);
        let write = ensure_parent_dirs(&marker)
            .and_then(|()| fs::write(&marker, epoch_millis(when).to_string()));
        write.map_err(|source| CacheError::MarkUsed {
            path: marker,
            source,
        })
    }

    /// Read the last-used marker of `path`.
    ///
    /// Returns `Ok(None)` when no marker exists.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the marker exists but cannot be read or does
    /// not hold a decimal timestamp.
    pub fn last_used(&self, path: &Utf8Path) -> io::Result<Option<SystemTime>> {
        let marker = last_used_marker(path);
        let text = match fs::read_to_string(&marker) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let millis: u64 = text
            .trim()
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Some(UNIX_EPOCH + Duration::from_millis(millis)))
    }

    /// Evict entries unused for longer than `ttl`.
    ///
    /// # Errors
    ///
    /// Returns a [`CacheError`] when the cache cannot be walked or an expired
    /// entry cannot be deleted.
    pub fn sweep(&self, ttl: Duration) -> Result<SweepReport, CacheError> {
        self.sweep_at(ttl, SystemTime::now())
    }

    /// Evict entries unused for longer than `ttl` as of `now`.
    ///
    /// Files without a marker are left alone. After deleting an entry and its
    /// marker, emptied parent directories are removed up to, but excluding,
    /// the cache root.
    ///
    /// # Errors
    ///
    /// Returns a [`CacheError`] when the cache cannot be walked or an expired
    /// entry cannot be deleted.
    pub fn sweep_at(&self, ttl: Duration, now: SystemTime) -> Result<SweepReport, CacheError> {
        let mut report = SweepReport::default();
        if !self.root.is_dir() {
            return Ok(report);
        }
        let mut entries = Vec::new();
        collect_entries(&self.root, &mut entries)?;

        for entry in entries {
            let last_used = match self.last_used(&entry) {
                Ok(Some(last_used)) => last_used,
                Ok(None) => {
                    report.unmarked += 1;
                    continue;
                }
                Err(e) => {
                    warn!("ignoring unreadable last-used marker for {entry}: {e}");
                    report.unmarked += 1;
                    continue;
                }
            };
            let unused_for = now.duration_since(last_used).unwrap_or_default();
            if unused_for <= ttl {
                report.retained += 1;
                continue;
            }
            debug!("evicting {entry}, unused for {}s", unused_for.as_secs());
            remove_entry(&entry)?;
            self.prune_empty_parents(&entry)?;
            report.evicted += 1;
        }
        Ok(report)
    }

    fn prune_empty_parents(&self, path: &Utf8Path) -> Result<(), CacheError> {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            let is_empty = fs::read_dir(dir)
                .map_err(|source| sweep_error(dir, source))?
                .next()
                .is_none();
            if !is_empty {
                break;
            }
            match fs::remove_dir(dir) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(sweep_error(dir, source)),
            }
            current = dir.parent();
        }
        Ok(())
    }
}

/// The sidecar marker path for a cache entry.
#[must_use]
pub fn last_used_marker(path: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{path}{LAST_USED_SUFFIX}"))
}

fn is_bookkeeping_file(name: &str) -> bool {
    name.ends_with(LAST_USED_SUFFIX) || name.ends_with(TEMP_SUFFIX)
}

/// Collect every regular cache entry below `dir`, skipping markers and
/// in-flight temporary files.
fn collect_entries(dir: &Utf8Path, entries: &mut Vec<Utf8PathBuf>) -> Result<(), CacheError> {
    let read_dir = fs::read_dir(dir).map_err(|source| sweep_error(dir, source))?;
    for listed in read_dir {
        let item = listed.map_err(|source| sweep_error(dir, source))?;
        let path = Utf8PathBuf::from_path_buf(item.path()).map_err(|path| {
            CacheError::NonUtf8Path {
                path: path.display().to_string(),
            }
        })?;
        let file_type = item
            .file_type()
            .map_err(|source| sweep_error(&path, source))?;
        if file_type.is_dir() {
            collect_entries(&path, entries)?;
        } else if file_type.is_file() && !path.file_name().is_some_and(is_bookkeeping_file) {
            entries.push(path);
        }
    }
    Ok(())
}

fn remove_entry(path: &Utf8Path) -> Result<(), CacheError> {
    for target in [path.to_path_buf(), last_used_marker(path)] {
        match fs::remove_file(&target) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(sweep_error(&target, source)),
        }
    }
    Ok(())
}

fn sweep_error(path: &Utf8Path, source: io::Error) -> CacheError {
    CacheError::Sweep {
        path: path.to_path_buf(),
        source,
    }
}

fn epoch_millis(when: SystemTime) -> u64 {
    let millis = when
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    u64::try_from(millis).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
