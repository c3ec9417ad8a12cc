//! Manifest parsing.
//!
//! A manifest is line-oriented text made of sections. Each section opens
//! with `__name__` and closes with `__end__`:
//!
//! ```text
//! __repos__
//! https://repo.maven.apache.org/maven2/
//! __end__
//! __deps__
//! org.example:lib:1.2.3 <sha256>
//! org.example:lib:1.2.3:sources@jar <sha256>
//! __end__
//! __relocation__
//! org.example shaded.org.example
//! __end__
//! ```
//!
//! `repos` and `deps` are built in; every other section belongs to the
//! extension registered under its name. Blank lines are ignored.

use crate::extensions::ExtensionRegistry;
use crate::pipeline::{ConfigError, ExtensionConfig};
use std::collections::HashSet;
use std::io::{self, BufRead};
use stowaway_common::coordinate::{ArtifactCoordinate, ArtifactKey, CoordinateError};
use thiserror::Error;

const REPOS_SECTION: &str = "repos";
const DEPS_SECTION: &str = "deps";
const END_MARKER: &str = "__end__";

/// Errors raised while parsing a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// A section was still open at the end of input.
    #[error("section `{name}` opened on line {line} is never closed")]
    UnterminatedSection {
        /// Section name.
        name: String,
        /// Line of the opening header.
        line: usize,
    },

    /// A section header appeared inside another section.
    #[error("line {line}: section `{name}` opened inside section `{open}`")]
    NestedSection {
        /// Line of the nested header.
        line: usize,
        /// Nested section name.
        name: String,
        /// The section that was still open.
        open: String,
    },

    /// A content line appeared outside any section.
    #[error("line {line}: `{content}` is outside any section")]
    ContentOutsideSection {
        /// Line number.
        line: usize,
        /// The stray content.
        content: String,
    },

    /// `__end__` appeared with no open section.
    #[error("line {line}: `__end__` without an open section")]
    EndOutsideSection {
        /// Line number.
        line: usize,
    },

    /// A section names no registered extension.
    #[error("line {line}: no extension is registered for section `{name}`")]
    UnknownExtension {
        /// Line of the header.
        line: usize,
        /// Section name.
        name: String,
    },

    /// A `deps` line is not a valid coordinate.
    #[error("line {line}: {source}")]
    InvalidDependency {
        /// Line number.
        line: usize,
        /// Parse failure.
        #[source]
        source: CoordinateError,
    },

    /// The same artifact is declared twice.
    #[error("line {line}: artifact {key} is declared more than once")]
    DuplicateArtifact {
        /// Line of the second declaration.
        line: usize,
        /// The repeated key.
        key: ArtifactKey,
    },

    /// An extension rejected its section.
    #[error("invalid `{name}` section: {source}")]
    ExtensionConfig {
        /// Section name.
        name: String,
        /// The extension's error.
        #[source]
        source: ConfigError,
    },

    /// Reading the input failed.
    #[error("failed to read manifest: {0}")]
    Io(#[from] io::Error),
}

/// A parsed manifest.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    repositories: Vec<String>,
    artifacts: Vec<ArtifactCoordinate>,
    extensions: Vec<(String, ExtensionConfig)>,
}

impl Manifest {
    /// Build a manifest from repositories and artifacts, without extensions.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::DuplicateArtifact`] when two artifacts share a
    /// key; `line` is the 1-based position in `artifacts`.
    pub fn new(
        repositories: Vec<String>,
        artifacts: Vec<ArtifactCoordinate>,
    ) -> Result<Self, ManifestError> {
        let mut seen = HashSet::new();
        for (index, artifact) in artifacts.iter().enumerate() {
            if !seen.insert(artifact.key()) {
                return Err(ManifestError::DuplicateArtifact {
                    line: index + 1,
                    key: artifact.key().clone(),
                });
            }
        }
        Ok(Self {
            repositories,
            artifacts,
            extensions: Vec::new(),
        })
    }

    /// Append an extension configuration as the last pipeline stage.
    #[must_use]
    pub fn with_extension(mut self, name: impl Into<String>, config: ExtensionConfig) -> Self {
        self.extensions.push((name.into(), config));
        self
    }

    /// Parse manifest text.
    ///
    /// # Errors
    ///
    /// Returns a [`ManifestError`] describing the first problem found.
    pub fn parse_str(text: &str, registry: &ExtensionRegistry) -> Result<Self, ManifestError> {
        Self::parse(text.as_bytes(), registry)
    }

    /// Parse a manifest from a reader.
    ///
    /// Repeated sections with the same name are concatenated. Extension
    /// stages run in the order their sections first appear.
    ///
    /// # Errors
    ///
    /// Returns a [`ManifestError`] describing the first problem found.
    pub fn parse(reader: impl BufRead, registry: &ExtensionRegistry) -> Result<Self, ManifestError> {
        let mut parser = Parser::default();
        for (index, line) in reader.lines().enumerate() {
            parser.feed(index + 1, &line?, registry)?;
        }
        parser.finish(registry)
    }

    /// Repository base URLs, in priority order.
    #[must_use]
    pub fn repositories(&self) -> &[String] {
        &self.repositories
    }

    /// Declared artifacts, in declaration order.
    #[must_use]
    pub fn artifacts(&self) -> &[ArtifactCoordinate] {
        &self.artifacts
    }

    /// Extension configurations, in stage order.
    #[must_use]
    pub fn extensions(&self) -> &[(String, ExtensionConfig)] {
        &self.extensions
    }

    /// The configuration of the extension section `name`.
    #[must_use]
    pub fn extension_config(&self, name: &str) -> Option<&ExtensionConfig> {
        self.extensions
            .iter()
            .find(|(section, _)| section == name)
            .map(|(_, config)| config)
    }
}

#[derive(Default)]
struct Parser {
    open: Option<(String, usize)>,
    repositories: Vec<String>,
    artifacts: Vec<ArtifactCoordinate>,
    seen: HashSet<ArtifactKey>,
    sections: Vec<(String, Vec<String>)>,
}

impl Parser {
    fn feed(
        &mut self,
        number: usize,
        raw: &str,
        registry: &ExtensionRegistry,
    ) -> Result<(), ManifestError> {
        let line = raw.trim();
        if line.is_empty() {
            return Ok(());
        }
        if line == END_MARKER {
            return self
                .open
                .take()
                .map(drop)
                .ok_or(ManifestError::EndOutsideSection { line: number });
        }
        if let Some(name) = section_header(line) {
            return self.open_section(number, name, registry);
        }
        let Some((section, _)) = self.open.clone() else {
            return Err(ManifestError::ContentOutsideSection {
                line: number,
                content: line.to_owned(),
            });
        };
        match section.as_str() {
            REPOS_SECTION => self.repositories.push(line.to_owned()),
            DEPS_SECTION => self.add_artifact(number, line)?,
            name => self.push_section_line(name, line),
        }
        Ok(())
    }

    fn open_section(
        &mut self,
        number: usize,
        name: &str,
        registry: &ExtensionRegistry,
    ) -> Result<(), ManifestError> {
        if let Some((open, _)) = &self.open {
            return Err(ManifestError::NestedSection {
                line: number,
                name: name.to_owned(),
                open: open.clone(),
            });
        }
        if name != REPOS_SECTION && name != DEPS_SECTION {
            if !registry.contains(name) {
                return Err(ManifestError::UnknownExtension {
                    line: number,
                    name: name.to_owned(),
                });
            }
            self.register_section(name);
        }
        self.open = Some((name.to_owned(), number));
        Ok(())
    }

    fn add_artifact(&mut self, number: usize, line: &str) -> Result<(), ManifestError> {
        let artifact = ArtifactCoordinate::parse_line(line)
            .map_err(|source| ManifestError::InvalidDependency {
                line: number,
                source,
            })?;
        if !self.seen.insert(artifact.key().clone()) {
            return Err(ManifestError::DuplicateArtifact {
                line: number,
                key: artifact.key().clone(),
            });
        }
        self.artifacts.push(artifact);
        Ok(())
    }

    /// Sections are created on first use so the first appearance fixes the
    /// stage order.
    fn register_section(&mut self, name: &str) {
        if !self.sections.iter().any(|(section, _)| section == name) {
            self.sections.push((name.to_owned(), Vec::new()));
        }
    }

    fn push_section_line(&mut self, name: &str, line: &str) {
        self.register_section(name);
        if let Some((_, lines)) = self
            .sections
            .iter_mut()
            .find(|(section, _)| section == name)
        {
            lines.push(line.to_owned());
        }
    }

    fn finish(self, registry: &ExtensionRegistry) -> Result<Manifest, ManifestError> {
        if let Some((name, line)) = self.open {
            return Err(ManifestError::UnterminatedSection { name, line });
        }
        let mut extensions = Vec::with_capacity(self.sections.len());
        for (name, lines) in self.sections {
            let Some(extension) = registry.get(&name) else {
                return Err(ManifestError::UnknownExtension { line: 0, name });
            };
            let config = extension
                .parse_config(&lines)
                .map_err(|source| ManifestError::ExtensionConfig {
                    name: name.clone(),
                    source,
                })?;
            extensions.push((name, config));
        }
        Ok(Manifest {
            repositories: self.repositories,
            artifacts: self.artifacts,
            extensions,
        })
    }
}

/// `__name__` yields `name`.
fn section_header(line: &str) -> Option<&str> {
    line.strip_prefix("__")
        .and_then(|rest| rest.strip_suffix("__"))
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
#[path = "manifest_tests.rs"]
mod tests;
