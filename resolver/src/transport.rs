//! HTTP transport for repository downloads.
//!
//! The fetcher talks to repositories through the [`ArtifactTransport`] trait
//! so tests can serve artifacts from memory without network access.

use camino::Utf8Path;
use std::fs::File;
use std::io;
use std::time::Duration;

/// Default per-request timeout for artifact downloads.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// User agent sent with every repository request.
const USER_AGENT: &str = "stowaway";

/// Downloads a single URL into a local file.
///
/// # Examples
///
/// ```no_run
/// use camino::Utf8Path;
/// use stowaway_resolver::transport::{ArtifactTransport, HttpTransport};
///
/// let transport = HttpTransport::default();
/// transport.download(
///     "https://repo.example/org/lib/1.0/lib-1.0.jar",
///     Utf8Path::new("/tmp/lib-1.0.jar"),
/// )?;
/// # Ok::<(), stowaway_resolver::transport::TransportError>(())
/// ```
#[cfg_attr(test, mockall::automock)]
pub trait ArtifactTransport: Send + Sync {
    /// Issue a GET for `url` and write the body to `dest`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotFound`] for a 404, another
    /// [`TransportError`] for any other failure.
    fn download(&self, url: &str, dest: &Utf8Path) -> Result<(), TransportError>;
}

/// Errors arising from a single download attempt.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The request failed or returned a non-success status.
    #[error("download failed for {url}: {reason}")]
    HttpError {
        /// The URL that was requested.
        url: String,
        /// A human-readable description of the failure.
        reason: String,
    },

    /// The repository does not have the artifact (HTTP 404).
    #[error("artifact not found: {url}")]
    NotFound {
        /// The URL that returned 404.
        url: String,
    },

    /// Writing the response body failed.
    #[error("I/O error writing download of {url}: {source}")]
    Io {
        /// The URL being downloaded.
        url: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// `ureq`-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    agent: ureq::Agent,
}

impl HttpTransport {
    /// Build a transport whose requests time out after `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl ArtifactTransport for HttpTransport {
    fn download(&self, url: &str, dest: &Utf8Path) -> Result<(), TransportError> {
        let response = self
            .agent
            .get(url)
            .header("User-Agent", USER_AGENT)
            .call()
            .map_err(|e| map_ureq_error(url, &e))?;
        let io_error = |source| TransportError::Io {
            url: url.to_owned(),
            source,
        };
        let mut file = File::create(dest).map_err(io_error)?;
        io::copy(&mut response.into_body().into_reader(), &mut file).map_err(io_error)?;
        file.sync_all().map_err(io_error)?;
        Ok(())
    }
}

/// Join a repository base URL and a repository-relative path.
///
/// A missing trailing slash on the base is added.
///
/// # Examples
///
/// ```
/// use stowaway_resolver::transport::artifact_url;
///
/// assert_eq!(
///     artifact_url("https://repo.example/maven", "org/lib/1.0/lib-1.0.jar"),
///     "https://repo.example/maven/org/lib/1.0/lib-1.0.jar"
/// );
/// ```
#[must_use]
pub fn artifact_url(repository: &str, relative_path: &str) -> String {
    if repository.ends_with('/') {
        format!("{repository}{relative_path}")
    } else {
        format!("{repository}/{relative_path}")
    }
}

/// Map a ureq error to a [`TransportError`].
fn map_ureq_error(url: &str, err: &ureq::Error) -> TransportError {
    match err {
        ureq::Error::StatusCode(404) => TransportError::NotFound {
            url: url.to_owned(),
        },
        other => TransportError::HttpError {
            url: url.to_owned(),
            reason: other.to_string(),
        },
    }
}
