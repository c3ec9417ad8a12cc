//! Shared test doubles for the resolver crate.

use crate::pipeline::{
    ConfigError, ExecutionScope, Export, Extension, ExtensionConfig, Processor, ProcessorError,
};
use crate::transport::{ArtifactTransport, TransportError};
use camino::Utf8Path;
use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use stowaway_common::coordinate::ArtifactCoordinate;
use stowaway_common::digest::DigestAlgorithm;
use zip::write::SimpleFileOptions;

/// Lowercase hex SHA-256 of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    DigestAlgorithm::Sha256.hash_bytes(bytes).as_hex()
}

/// Builds an in-memory jar (zip) holding `entries`.
///
/// # Errors
///
/// Returns a zip error when an entry cannot be written.
pub fn jar_bytes(entries: &[(&str, &[u8])]) -> zip::result::ZipResult<Vec<u8>> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, contents) in entries {
        writer.start_file(*name, SimpleFileOptions::default())?;
        writer.write_all(contents)?;
    }
    Ok(writer.finish()?.into_inner())
}

/// Lists the entry names of the jar at `path`.
///
/// # Errors
///
/// Returns a zip error when the archive cannot be opened.
pub fn jar_entry_names(path: &Utf8Path) -> zip::result::ZipResult<Vec<String>> {
    let archive = zip::ZipArchive::new(fs::File::open(path)?)?;
    let mut names: Vec<String> = archive.file_names().map(str::to_owned).collect();
    names.sort();
    Ok(names)
}

/// In-memory repository transport.
///
/// Serves registered bytes per URL, answers everything else with
/// [`TransportError::NotFound`] and records every request.
#[derive(Debug, Default)]
pub struct StubTransport {
    responses: Mutex<HashMap<String, Vec<u8>>>,
    requests: Mutex<Vec<String>>,
}

impl StubTransport {
    /// A transport with no artifacts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `bytes` at `url`.
    pub fn serve(&self, url: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.into(), bytes.into());
    }

    /// Builder form of [`StubTransport::serve`].
    #[must_use]
    pub fn with(self, url: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.serve(url, bytes);
        self
    }

    /// Number of download requests seen so far.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Every requested URL, in request order.
    #[must_use]
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ArtifactTransport for StubTransport {
    fn download(&self, url: &str, dest: &Utf8Path) -> Result<(), TransportError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(url.to_owned());
        let body = self
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
            .ok_or_else(|| TransportError::NotFound {
                url: url.to_owned(),
            })?;
        fs::write(dest, body).map_err(|source| TransportError::Io {
            url: url.to_owned(),
            source,
        })
    }
}

/// Symbol published by [`CountingExtension`].
pub const COUNTING_PROCESSOR: &str = "test.counting";

/// Parsed configuration of a [`CountingExtension`] section.
#[derive(Debug, Clone)]
pub struct CountingConfig {
    marker: String,
    fail: bool,
    dependencies: Vec<ArtifactCoordinate>,
    runs: Arc<AtomicUsize>,
}

/// Extension whose processor appends a marker line to the artifact.
///
/// Section lines: `marker <text>` sets the appended text (defaults to the
/// section name passed to [`CountingExtension::new`]), `fail` makes the
/// processor error, and `dep <notation> <sha256>` declares a supporting
/// artifact.
#[derive(Debug)]
pub struct CountingExtension {
    default_marker: String,
    runs: Arc<AtomicUsize>,
}

impl CountingExtension {
    /// An extension appending `marker` unless configured otherwise.
    #[must_use]
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            default_marker: marker.into(),
            runs: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// How many times a processor from this extension ran.
    #[must_use]
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// Shared run counter, for tests that hand the extension to a registry.
    #[must_use]
    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.runs)
    }
}

impl Extension for CountingExtension {
    fn parse_config(&self, lines: &[String]) -> Result<ExtensionConfig, ConfigError> {
        let mut config = CountingConfig {
            marker: self.default_marker.clone(),
            fail: false,
            dependencies: Vec::new(),
            runs: Arc::clone(&self.runs),
        };
        for line in lines {
            if let Some(marker) = line.strip_prefix("marker ") {
                marker.trim().clone_into(&mut config.marker);
            } else if line.trim() == "fail" {
                config.fail = true;
            } else if let Some(dep) = line.strip_prefix("dep ") {
                config.dependencies.push(ArtifactCoordinate::parse_line(dep)?);
            } else {
                return Err(ConfigError::InvalidLine {
                    line: line.clone(),
                    reason: "expected `marker`, `fail` or `dep`".to_owned(),
                });
            }
        }
        Ok(ExtensionConfig::new(config))
    }

    fn dependencies(&self, config: &ExtensionConfig) -> Vec<ArtifactCoordinate> {
        config
            .downcast_ref::<CountingConfig>()
            .map(|counting| counting.dependencies.clone())
            .unwrap_or_default()
    }

    fn processor_identity(&self) -> String {
        COUNTING_PROCESSOR.to_owned()
    }

    fn exports(&self) -> Vec<Export> {
        vec![Export::new(COUNTING_PROCESSOR, CountingProcessor::construct)]
    }
}

struct CountingProcessor {
    config: CountingConfig,
    support: usize,
}

impl CountingProcessor {
    fn construct(
        config: &ExtensionConfig,
        scope: &ExecutionScope,
    ) -> Result<Box<dyn Processor>, ProcessorError> {
        let counting = config.expect_type::<CountingConfig>(COUNTING_PROCESSOR)?;
        Ok(Box::new(Self {
            config: counting.clone(),
            support: scope.support_artifacts().len(),
        }))
    }
}

impl Processor for CountingProcessor {
    fn process(&self, input: &Utf8Path, output: &Utf8Path) -> Result<(), ProcessorError> {
        self.config.runs.fetch_add(1, Ordering::SeqCst);
        if self.config.fail {
            return Err(ProcessorError::Command {
                program: COUNTING_PROCESSOR.to_owned(),
                reason: "configured to fail".to_owned(),
            });
        }
        let mut contents = fs::read(input).map_err(|source| ProcessorError::Io {
            path: input.to_path_buf(),
            source,
        })?;
        contents.extend_from_slice(
            format!("\n{} support={}", self.config.marker, self.support).as_bytes(),
        );
        fs::write(output, contents).map_err(|source| ProcessorError::Io {
            path: output.to_path_buf(),
            source,
        })
    }

    fn cache_key(&self) -> Option<String> {
        Some(self.config.marker.clone())
    }
}
