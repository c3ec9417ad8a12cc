//! The contract between the resolver and post-processing extensions.
//!
//! An [`Extension`] owns a manifest section: it parses the section's lines
//! into an opaque [`ExtensionConfig`], names the supporting artifacts it needs
//! and names the processor its transform is built from. Processors are
//! located through an execution scope rather than constructed directly, so an
//! extension that declares supporting artifacts only ever sees its own
//! exports plus the shared contract.

use super::scope::ExecutionScope;
use camino::{Utf8Path, Utf8PathBuf};
use std::any::Any;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use stowaway_common::coordinate::{ArtifactCoordinate, CoordinateError};
use thiserror::Error;

/// Errors raised while parsing an extension's manifest section.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A configuration line is malformed.
    #[error("invalid line \"{line}\": {reason}")]
    InvalidLine {
        /// The offending line.
        line: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A `dep` line names an invalid coordinate.
    #[error("invalid supporting artifact: {0}")]
    Dependency(#[from] CoordinateError),

    /// The section is missing something the extension requires.
    #[error("incomplete configuration: {reason}")]
    Incomplete {
        /// What is missing.
        reason: String,
    },
}

/// Errors raised by a processor while transforming an artifact.
#[derive(Debug, Error)]
pub enum ProcessorError {
    /// Reading the input or writing the output failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path being read or written.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The input archive could not be read or the output written.
    #[error("archive error on {path}: {reason}")]
    Archive {
        /// Archive path.
        path: Utf8PathBuf,
        /// Description of the failure.
        reason: String,
    },

    /// An external command failed.
    #[error("command `{program}` failed: {reason}")]
    Command {
        /// Program that was run.
        program: String,
        /// Exit status or spawn failure.
        reason: String,
    },

    /// An external command did not finish in time.
    #[error("command `{program}` timed out after {}s", timeout.as_secs())]
    TimedOut {
        /// Program that was run.
        program: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The processor was handed a configuration of the wrong type.
    #[error("processor `{identity}` received an unexpected configuration type")]
    ConfigType {
        /// Identity of the processor.
        identity: String,
    },

    /// The configuration is valid syntax but cannot be used.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Opaque, shareable extension configuration.
///
/// Extensions store whatever type they parse their section into and recover
/// it with [`ExtensionConfig::downcast_ref`].
#[derive(Clone)]
pub struct ExtensionConfig {
    value: Arc<dyn Any + Send + Sync>,
}

impl ExtensionConfig {
    /// Wrap a parsed configuration value.
    #[must_use]
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Arc::new(value),
        }
    }

    /// Borrow the value if it is a `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Borrow the value as a `T`, failing for the processor `identity`.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessorError::ConfigType`] when the value is not a `T`.
    pub fn expect_type<T: Any>(&self, identity: &str) -> Result<&T, ProcessorError> {
        self.downcast_ref::<T>()
            .ok_or_else(|| ProcessorError::ConfigType {
                identity: identity.to_owned(),
            })
    }
}

impl fmt::Debug for ExtensionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionConfig").finish_non_exhaustive()
    }
}

/// Builds a processor from a configuration inside a scope.
pub type ProcessorConstructor =
    fn(&ExtensionConfig, &ExecutionScope) -> Result<Box<dyn Processor>, ProcessorError>;

/// A named processor constructor published by an extension.
#[derive(Clone, Copy)]
pub struct Export {
    identity: &'static str,
    constructor: ProcessorConstructor,
}

impl Export {
    /// Publish `constructor` under `identity`.
    #[must_use]
    pub const fn new(identity: &'static str, constructor: ProcessorConstructor) -> Self {
        Self {
            identity,
            constructor,
        }
    }

    /// The symbol name.
    #[must_use]
    pub const fn identity(&self) -> &'static str {
        self.identity
    }

    /// The constructor.
    #[must_use]
    pub const fn constructor(&self) -> ProcessorConstructor {
        self.constructor
    }
}

impl fmt::Debug for Export {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Export")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// A manifest-configured post-processing extension.
#[cfg_attr(test, mockall::automock)]
pub trait Extension: Send + Sync {
    /// Parse the raw lines of this extension's manifest section.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the lines are malformed.
    fn parse_config(&self, lines: &[String]) -> Result<ExtensionConfig, ConfigError>;

    /// Supporting artifacts the transform needs, in declared order.
    fn dependencies(&self, config: &ExtensionConfig) -> Vec<ArtifactCoordinate>;

    /// Symbol name of the processor to instantiate.
    fn processor_identity(&self) -> String;

    /// Processor constructors this extension provides.
    fn exports(&self) -> Vec<Export>;
}

/// Transforms one artifact file into another.
pub trait Processor: Send + Sync {
    /// Read `input` and write the transformed artifact to `output`.
    ///
    /// # Errors
    ///
    /// Returns a [`ProcessorError`] when the transform fails.
    fn process(&self, input: &Utf8Path, output: &Utf8Path) -> Result<(), ProcessorError>;

    /// Semantic identity of what this processor does, mixed into stage keys.
    ///
    /// `None` keys the stage output on the input content alone.
    fn cache_key(&self) -> Option<String> {
        None
    }
}
