//! Settings loader for the `stowaway` binary.
//!
//! Settings live in a TOML file (conventionally `stowaway.toml`). Every key
//! is optional and falls back to a default, so an absent file and an empty
//! file behave the same. The cache root can also be pinned through the
//! `STOWAWAY_CACHE_DIR` environment variable, which wins over the file.

use camino::{Utf8Path, Utf8PathBuf};
use directories_next::ProjectDirs;
use serde::Deserialize;
use std::fs;
use std::io;
use std::time::Duration;
use stowaway_resolver::ResolverOptions;
use stowaway_resolver::pool::{DEFAULT_BATCH_TIMEOUT, default_workers};
use thiserror::Error;

/// Environment variable overriding [`Settings::cache_dir`].
pub const CACHE_DIR_ENV: &str = "STOWAWAY_CACHE_DIR";

/// Conventional settings file name.
pub const SETTINGS_FILE: &str = "stowaway.toml";

/// Sub-directory of the platform cache directory used by default.
const ARTIFACTS_DIR: &str = "artifacts";

/// Errors raised while loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file could not be read.
    #[error("failed to read settings from {path}: {source}")]
    Read {
        /// Settings file path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The settings file is not valid TOML for [`Settings`].
    #[error("invalid settings in {path}: {source}")]
    Parse {
        /// Settings file path.
        path: Utf8PathBuf,
        /// Deserialisation failure.
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of range.
    #[error("invalid value for `{key}`: {reason}")]
    Invalid {
        /// The offending key.
        key: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// No platform cache directory could be determined.
    #[error("no cache directory configured and none could be derived for this platform")]
    NoCacheDir,

    /// The platform cache directory is not valid UTF-8.
    #[error("platform cache directory {path} is not valid UTF-8")]
    NonUtf8CacheDir {
        /// Lossy rendering of the directory.
        path: String,
    },
}

/// Settings for resolving manifests.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Root of the artifact cache. Defaults to the platform cache directory.
    pub cache_dir: Option<Utf8PathBuf>,
    /// Root of the cache for extension supporting artifacts. Defaults to
    /// [`Settings::cache_dir`].
    pub extension_cache_dir: Option<Utf8PathBuf>,
    /// Entries unused for longer than this are evicted by a sweep.
    pub cache_ttl_secs: u64,
    /// Worker threads. Defaults to `min(4, available parallelism)`.
    pub workers: Option<usize>,
    /// Time a batch of downloads or transforms may take.
    pub batch_timeout_secs: u64,
    /// Per-request HTTP timeout.
    pub http_timeout_secs: u64,
    /// Sweep both caches after each successful resolution.
    pub sweep_after_resolve: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_dir: None,
            extension_cache_dir: None,
            cache_ttl_secs: 60 * 60,
            workers: None,
            batch_timeout_secs: DEFAULT_BATCH_TIMEOUT.as_secs(),
            http_timeout_secs: 30,
            sweep_after_resolve: true,
        }
    }
}

impl Settings {
    /// Load settings from `path` (defaults when `None`) and the process
    /// environment.
    ///
    /// # Errors
    ///
    /// See [`Settings::load_with`].
    pub fn load(path: Option<&Utf8Path>) -> Result<Self, SettingsError> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// Load settings from `path`, reading environment overrides through
    /// `env`.
    ///
    /// # Examples
    ///
    /// ```
    /// use stowaway::config::Settings;
    ///
    /// let settings = Settings::load_with(None, |key| {
    ///     (key == "STOWAWAY_CACHE_DIR").then(|| "/srv/cache".to_owned())
    /// })
    /// .expect("defaults are valid");
    /// assert_eq!(settings.cache_dir().expect("cache dir"), "/srv/cache");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Read`] or [`SettingsError::Parse`] when the
    /// file cannot be loaded and [`SettingsError::Invalid`] for out-of-range
    /// values.
    pub fn load_with<F>(path: Option<&Utf8Path>, env: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = path.map_or_else(|| Ok(Self::default()), Self::from_file)?;
        if let Some(dir) = env(CACHE_DIR_ENV).filter(|value| !value.trim().is_empty()) {
            settings.cache_dir = Some(Utf8PathBuf::from(dir.trim()));
        }
        settings.validate()?;
        Ok(settings)
    }

    fn from_file(path: &Utf8Path) -> Result<Self, SettingsError> {
        let text = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn validate(&self) -> Result<(), SettingsError> {
        let positive = [
            ("cache_ttl_secs", self.cache_ttl_secs),
            ("batch_timeout_secs", self.batch_timeout_secs),
            ("http_timeout_secs", self.http_timeout_secs),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(SettingsError::Invalid {
                    key,
                    reason: "must be greater than zero".to_owned(),
                });
            }
        }
        if self.workers == Some(0) {
            return Err(SettingsError::Invalid {
                key: "workers",
                reason: "must be at least one".to_owned(),
            });
        }
        Ok(())
    }

    /// The artifact cache root.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::NoCacheDir`] or
    /// [`SettingsError::NonUtf8CacheDir`] when no directory is configured
    /// and the platform default cannot be used.
    pub fn cache_dir(&self) -> Result<Utf8PathBuf, SettingsError> {
        self.cache_dir
            .as_ref()
            .map_or_else(platform_cache_dir, |dir| Ok(dir.clone()))
    }

    /// The extension cache root, falling back to [`Settings::cache_dir`].
    ///
    /// # Errors
    ///
    /// As [`Settings::cache_dir`].
    pub fn extension_cache_dir(&self) -> Result<Utf8PathBuf, SettingsError> {
        self.extension_cache_dir
            .as_ref()
            .map_or_else(|| self.cache_dir(), |dir| Ok(dir.clone()))
    }

    /// Cache entry time-to-live.
    #[must_use]
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Per-request HTTP timeout.
    #[must_use]
    pub const fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Resolver tuning derived from these settings.
    #[must_use]
    pub fn resolver_options(&self) -> ResolverOptions {
        ResolverOptions {
            workers: self.workers.unwrap_or_else(default_workers),
            batch_timeout: Duration::from_secs(self.batch_timeout_secs),
            cache_ttl: self.sweep_after_resolve.then(|| self.cache_ttl()),
        }
    }
}

fn platform_cache_dir() -> Result<Utf8PathBuf, SettingsError> {
    let dirs = ProjectDirs::from("", "", "stowaway").ok_or(SettingsError::NoCacheDir)?;
    let dir = dirs.cache_dir().join(ARTIFACTS_DIR);
    Utf8PathBuf::try_from(dir).map_err(|e| SettingsError::NonUtf8CacheDir {
        path: e.into_path_buf().display().to_string(),
    })
}
