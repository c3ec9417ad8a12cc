//! Repository fetcher: cache lookup, ordered download attempts and
//! hash verification.

use crate::cache::{CacheError, CacheStore};
use crate::pool::WorkSignal;
use crate::transport::{ArtifactTransport, TransportError, artifact_url};
use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, trace, warn};
use std::io;
use std::sync::Arc;
use stowaway_common::coordinate::ArtifactCoordinate;
use stowaway_common::digest::{ContentDigest, DigestAlgorithm, DigestError, DigestSet, MultiHasher};
use stowaway_common::fs::{prepare_temp, publish, remove_if_exists};
use thiserror::Error;

/// Errors arising while fetching a single artifact.
#[derive(Debug, Error)]
pub enum FetchError {
    /// No repository served the artifact.
    #[error("could not resolve {coordinate} from any configured repository ({})", repositories.join(", "))]
    Unresolvable {
        /// The artifact that could not be fetched.
        coordinate: ArtifactCoordinate,
        /// The repositories that were tried, in order.
        repositories: Vec<String>,
    },

    /// A downloaded file does not hash to the expected value.
    #[error("integrity check failed for {coordinate} from {url}: expected SHA-256 {expected}, got {actual}")]
    IntegrityMismatch {
        /// The artifact being fetched.
        coordinate: ArtifactCoordinate,
        /// The URL that served the mismatching bytes.
        url: String,
        /// Expected hex digest.
        expected: String,
        /// Actual hex digest of the download.
        actual: String,
    },

    /// Hashing a cached or downloaded file failed.
    #[error(transparent)]
    Digest(#[from] DigestError),

    /// Preparing, publishing or removing a cache file failed.
    #[error("cache file operation failed for {path}: {source}")]
    Io {
        /// Path being manipulated.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Writing the last-used marker failed.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// A verified artifact in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedArtifact {
    path: Utf8PathBuf,
    digests: DigestSet,
}

impl FetchedArtifact {
    /// Pair a cached path with the digests computed while verifying it.
    #[must_use]
    pub const fn new(path: Utf8PathBuf, digests: DigestSet) -> Self {
        Self { path, digests }
    }

    /// Location of the verified file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// SHA-1 and SHA-256 digests of the file.
    #[must_use]
    pub const fn digests(&self) -> &DigestSet {
        &self.digests
    }

    /// The digest for `algorithm`.
    ///
    /// # Errors
    ///
    /// Returns [`DigestError::Missing`] when it was not computed.
    pub fn digest(&self, algorithm: DigestAlgorithm) -> Result<&ContentDigest, DigestError> {
        self.digests.get(algorithm)
    }

    /// Take ownership of the cached path.
    #[must_use]
    pub fn into_path(self) -> Utf8PathBuf {
        self.path
    }
}

/// Fetches artifacts into a [`CacheStore`] through an [`ArtifactTransport`].
#[derive(Clone)]
pub struct Fetcher {
    transport: Arc<dyn ArtifactTransport>,
    hasher: MultiHasher,
}

impl Fetcher {
    /// Build a fetcher over `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn ArtifactTransport>) -> Self {
        Self {
            transport,
            hasher: MultiHasher::integrity(),
        }
    }

    /// Return a verified local copy of `coordinate`.
    ///
    /// A cached copy whose SHA-256 matches is returned without network
    /// access. A cached copy that does not match is deleted. Otherwise each
    /// repository is tried in order; HTTP failures move on to the next one,
    /// but a download that hashes to the wrong value fails immediately.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::IntegrityMismatch`] for a wrong download,
    /// [`FetchError::Unresolvable`] when every repository misses, and an
    /// I/O-flavoured [`FetchError`] when the cache cannot be written.
    pub fn fetch(
        &self,
        coordinate: &ArtifactCoordinate,
        repositories: &[String],
        cache: &CacheStore,
        work: &WorkSignal,
    ) -> Result<FetchedArtifact, FetchError> {
        let destination = cache.artifact_path(coordinate);
        if let Some(hit) = self.cached(coordinate, &destination)? {
            trace!("cache hit for {coordinate} at {destination}");
            cache.mark_used(&destination)?;
            return Ok(hit);
        }

        work.start();
        let relative = coordinate.repository_path();
        let temp = prepare_temp(&destination).map_err(|source| FetchError::Io {
            path: destination.clone(),
            source,
        })?;
        for repository in repositories {
            let url = artifact_url(repository, relative.as_str());
            debug!("downloading {coordinate} from {url}");
            if let Err(e) = self.transport.download(&url, &temp) {
                match e {
                    TransportError::NotFound { .. } => debug!("{coordinate} not found at {url}"),
                    other => debug!("download of {coordinate} from {url} failed: {other}"),
                }
                continue;
            }
            let digests = self.hasher.hash_file(&temp)?;
            let actual = digests.get(DigestAlgorithm::Sha256)?;
            if !coordinate.matches(actual) {
                discard(&temp);
                return Err(FetchError::IntegrityMismatch {
                    coordinate: coordinate.clone(),
                    url,
                    expected: coordinate.expected_hash().to_owned(),
                    actual: actual.as_hex(),
                });
            }
            if let Err(source) = publish(&temp, &destination) {
                return self.adopt_published(coordinate, &destination, &temp, cache, source);
            }
            cache.mark_used(&destination)?;
            debug!("fetched {coordinate} into {destination}");
            return Ok(FetchedArtifact::new(destination, digests));
        }

        discard(&temp);
        Err(FetchError::Unresolvable {
            coordinate: coordinate.clone(),
            repositories: repositories.to_vec(),
        })
    }

    /// Fall back to a copy another writer published while ours downloaded.
    ///
    /// Only a destination that verifies is accepted; otherwise the rename
    /// failure is reported.
    fn adopt_published(
        &self,
        coordinate: &ArtifactCoordinate,
        destination: &Utf8Path,
        temp: &Utf8Path,
        cache: &CacheStore,
        source: io::Error,
    ) -> Result<FetchedArtifact, FetchError> {
        discard(temp);
        match self.cached(coordinate, destination)? {
            Some(hit) => {
                debug!("{coordinate} was published concurrently at {destination}");
                cache.mark_used(destination)?;
                Ok(hit)
            }
            None => Err(FetchError::Io {
                path: destination.to_path_buf(),
                source,
            }),
        }
    }

    /// Verify an existing cache entry, deleting it when corrupt.
    fn cached(
        &self,
        coordinate: &ArtifactCoordinate,
        path: &Utf8Path,
    ) -> Result<Option<FetchedArtifact>, FetchError> {
        if !path.is_file() {
            return Ok(None);
        }
        let digests = self.hasher.hash_file(path)?;
        if coordinate.matches(digests.get(DigestAlgorithm::Sha256)?) {
            return Ok(Some(FetchedArtifact::new(path.to_path_buf(), digests)));
        }
        warn!("cached copy of {coordinate} at {path} is corrupt; fetching again");
        remove_if_exists(path).map_err(|source| FetchError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(None)
    }
}

fn discard(temp: &Utf8Path) {
    if let Err(e) = remove_if_exists(temp) {
        warn!("failed to remove temporary download {temp}: {e}");
    }
}

#[cfg(test)]
#[path = "fetch_tests.rs"]
mod tests;
