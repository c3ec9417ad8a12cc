//! Post-processing pipeline: extensions, execution scopes and stages.
//!
//! Each manifest section owned by an extension becomes one stage. The stage's
//! processor is instantiated inside an [`ExecutionScope`]: the shared host
//! scope when the extension declares no supporting artifacts, otherwise an
//! isolated scope cached in a [`ContextCache`]. Stage outputs are cached next
//! to their inputs under a content-derived key.

mod context;
mod extension;
mod scope;
mod stage;

pub use context::{ContextCache, ContextKey, ExtensionContext};
pub use extension::{
    ConfigError, Export, Extension, ExtensionConfig, Processor, ProcessorConstructor,
    ProcessorError,
};
#[cfg(test)]
pub use extension::MockExtension;
pub use scope::{COPY_PROCESSOR, ExecutionScope, ScopeKind, SharedContract};
pub use stage::{Pipeline, stage_key, stage_output_path};

use crate::cache::CacheError;
use camino::Utf8PathBuf;
use std::io;
use stowaway_common::digest::DigestError;
use thiserror::Error;

/// Errors arising while building or running pipeline stages.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The manifest configures an extension the resolver does not know.
    #[error("no extension is registered for section `{extension}`")]
    UnregisteredExtension {
        /// Extension (section) name.
        extension: String,
    },

    /// The processor symbol is not visible in the extension's scope.
    #[error("extension `{extension}` names unknown processor `{identity}`")]
    UnknownProcessor {
        /// Extension (section) name.
        extension: String,
        /// The unresolved symbol.
        identity: String,
    },

    /// The processor constructor rejected the configuration.
    #[error("failed to construct processor for extension `{extension}`: {source}")]
    Construct {
        /// Extension (section) name.
        extension: String,
        /// Constructor failure.
        #[source]
        source: ProcessorError,
    },

    /// A processor failed to transform an artifact.
    #[error("extension `{extension}` failed to process {input}: {source}")]
    Stage {
        /// Extension (section) name.
        extension: String,
        /// The stage input.
        input: Utf8PathBuf,
        /// Processor failure.
        #[source]
        source: ProcessorError,
    },

    /// Hashing a stage input or output failed.
    #[error(transparent)]
    Digest(#[from] DigestError),

    /// Preparing or publishing a stage output failed.
    #[error("failed to publish stage output {path}: {source}")]
    Io {
        /// Output path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Writing the last-used marker failed.
    #[error(transparent)]
    Cache(#[from] CacheError),
}
