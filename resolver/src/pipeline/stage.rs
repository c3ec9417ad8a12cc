//! Ordered, cached application of pipeline stages to a fetched artifact.

use super::PipelineError;
use super::context::ExtensionContext;
use crate::cache::CacheStore;
use crate::fetch::FetchedArtifact;
use crate::pool::WorkSignal;
use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, trace};
use stowaway_common::digest::DigestAlgorithm;
use stowaway_common::fs::{prepare_temp, publish, remove_if_exists};

/// Stage key from an optional processor key and the stage input's SHA-1.
///
/// Without a processor key the input hash is the key. With one, the key is
/// `sha1(sha1(processor_key) + input_hash)`.
///
/// # Examples
///
/// ```
/// use stowaway_resolver::pipeline::stage_key;
///
/// let input = "a9993e364706816aba3e25717850c26c9cd0d89d";
/// assert_eq!(stage_key(None, input), input);
/// assert_ne!(stage_key(Some("org.a org.b"), input), input);
/// ```
#[must_use]
pub fn stage_key(processor_key: Option<&str>, input_hash: &str) -> String {
    processor_key.map_or_else(
        || input_hash.to_owned(),
        |key| {
            let key_hash = DigestAlgorithm::Sha1.hash_str(key).as_hex();
            DigestAlgorithm::Sha1
                .hash_str(&format!("{key_hash}{input_hash}"))
                .as_hex()
        },
    )
}

/// Output path of a stage: the input path suffixed with
/// `-<extension>-<stage key>`.
///
/// Each stage suffixes its own input, so a file name spells out the chain of
/// stages that produced it.
#[must_use]
pub fn stage_output_path(input: &Utf8Path, extension: &str, key: &str) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{input}-{extension}-{key}"))
}

/// The ordered stages configured for one resolution.
#[derive(Debug, Default)]
pub struct Pipeline {
    stages: Vec<ExtensionContext>,
}

impl Pipeline {
    /// A pipeline running `stages` in order.
    #[must_use]
    pub const fn new(stages: Vec<ExtensionContext>) -> Self {
        Self { stages }
    }

    /// Number of stages.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether there are no stages.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage names in execution order.
    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(ExtensionContext::name)
    }

    /// Thread `artifact` through every stage and return the final path.
    ///
    /// A stage whose output already exists is skipped and its output marked
    /// used. Otherwise the processor writes a temporary sibling that is
    /// renamed into place once it succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Stage`] when a processor fails, and another
    /// [`PipelineError`] when hashing, renaming or marking fails.
    pub fn apply(
        &self,
        artifact: &FetchedArtifact,
        cache: &CacheStore,
        work: &WorkSignal,
    ) -> Result<Utf8PathBuf, PipelineError> {
        let mut input = artifact.path().to_path_buf();
        let mut input_hash = artifact.digest(DigestAlgorithm::Sha1)?.as_hex();

        for stage in &self.stages {
            let key = stage_key(stage.processor().cache_key().as_deref(), &input_hash);
            let output = stage_output_path(&input, stage.name(), &key);

            if output.is_file() {
                trace!("stage {} cached at {output}", stage.name());
                cache.mark_used(&output)?;
            } else {
                work.start();
                run_stage(stage, &input, &output)?;
                cache.mark_used(&output)?;
                debug!("stage {} wrote {output}", stage.name());
            }

            input_hash = DigestAlgorithm::Sha1.hash_file(&output)?.as_hex();
            input = output;
        }
        Ok(input)
    }
}

fn run_stage(stage: &ExtensionContext, input: &Utf8Path, output: &Utf8Path) -> Result<(), PipelineError> {
    let temp = prepare_temp(output).map_err(|source| PipelineError::Io {
        path: output.to_path_buf(),
        source,
    })?;
    if let Err(source) = stage.processor().process(input, &temp) {
        if let Err(e) = remove_if_exists(&temp) {
            debug!("failed to remove {temp}: {e}");
        }
        return Err(PipelineError::Stage {
            extension: stage.name().to_owned(),
            input: input.to_path_buf(),
            source,
        });
    }
    match publish(&temp, output) {
        Ok(()) => Ok(()),
        Err(source) => {
            if let Err(e) = remove_if_exists(&temp) {
                debug!("failed to remove {temp}: {e}");
            }
            if output.is_file() {
                debug!("stage {} output {output} was published concurrently", stage.name());
                return Ok(());
            }
            Err(PipelineError::Io {
                path: output.to_path_buf(),
                source,
            })
        }
    }
}

#[cfg(test)]
#[path = "stage_tests.rs"]
mod tests;
