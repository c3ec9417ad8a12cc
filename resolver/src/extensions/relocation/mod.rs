//! Package relocation for jar archives.
//!
//! A rule `org.example org.shaded.example` moves every archive entry under
//! `org/example/` to `org/shaded/example/`. Trailing `:pattern` arguments
//! restrict a rule to matching entries and `-pattern` arguments exclude
//! entries; patterns are globs over dotted names, so `org.example.api.**`
//! covers the whole `api` package.
//!
//! Class files have their constant pools rewritten, so internal names,
//! descriptors, signatures and dotted string literals all follow the move.
//! `META-INF/services/` files are renamed after the interface they name and
//! their provider lines are relocated. Every other entry is copied raw, so
//! its compressed data is never re-encoded.

mod classfile;

use crate::pipeline::{
    ConfigError, ExecutionScope, Export, Extension, ExtensionConfig, Processor, ProcessorError,
};
use camino::Utf8Path;
use glob::Pattern;
use std::fs::File;
use std::io::{BufWriter, Read, Seek, Write};
use stowaway_common::coordinate::ArtifactCoordinate;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

/// Manifest section name of the relocation extension.
pub const NAME: &str = "relocation";

/// Symbol the relocation processor is published under.
pub const PROCESSOR: &str = "stowaway.relocation";

const SERVICES_DIR: &str = "META-INF/services/";

/// Parsed `__relocation__` section.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RelocationConfig {
    rules: Vec<String>,
    dependencies: Vec<ArtifactCoordinate>,
}

impl RelocationConfig {
    /// Raw rule lines, in declared order.
    #[must_use]
    pub fn rules(&self) -> &[String] {
        &self.rules
    }

    /// Supporting artifacts declared with `dep` lines.
    #[must_use]
    pub fn dependencies(&self) -> &[ArtifactCoordinate] {
        &self.dependencies
    }
}

/// The `relocation` extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelocationExtension;

impl Extension for RelocationExtension {
    fn parse_config(&self, lines: &[String]) -> Result<ExtensionConfig, ConfigError> {
        let mut config = RelocationConfig::default();
        for line in lines {
            if let Some(dep) = line.strip_prefix("dep ") {
                config.dependencies.push(ArtifactCoordinate::parse_line(dep)?);
            } else {
                Relocation::parse(line)?;
                config.rules.push(line.clone());
            }
        }
        Ok(ExtensionConfig::new(config))
    }

    fn dependencies(&self, config: &ExtensionConfig) -> Vec<ArtifactCoordinate> {
        config
            .downcast_ref::<RelocationConfig>()
            .map(|relocation| relocation.dependencies.clone())
            .unwrap_or_default()
    }

    fn processor_identity(&self) -> String {
        PROCESSOR.to_owned()
    }

    fn exports(&self) -> Vec<Export> {
        vec![Export::new(PROCESSOR, RelocationProcessor::construct)]
    }
}

/// One `from to [:include|-exclude]...` rule.
#[derive(Debug, Clone)]
struct Relocation {
    from: String,
    to: String,
    includes: Vec<Pattern>,
    excludes: Vec<Pattern>,
}

impl Relocation {
    fn parse(line: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidLine {
            line: line.to_owned(),
            reason: reason.to_owned(),
        };
        let mut parts = line.split_whitespace();
        let (Some(from), Some(to)) = (parts.next(), parts.next()) else {
            return Err(invalid("expected `<from> <to>`"));
        };
        let mut rule = Self {
            from: to_path_prefix(from),
            to: to_path_prefix(to),
            includes: Vec::new(),
            excludes: Vec::new(),
        };
        for filter in parts {
            let (target, pattern) = if let Some(pattern) = filter.strip_prefix(':') {
                (&mut rule.includes, pattern)
            } else if let Some(pattern) = filter.strip_prefix('-') {
                (&mut rule.excludes, pattern)
            } else {
                return Err(invalid("filters must start with `:` or `-`"));
            };
            let compiled = Pattern::new(&pattern.replace('.', "/"))
                .map_err(|e| invalid(&format!("bad pattern `{pattern}`: {e}")))?;
            target.push(compiled);
        }
        Ok(rule)
    }

    /// The relocated name of `entry`, if this rule applies to it.
    fn apply(&self, entry: &str) -> Option<String> {
        let rest = entry.strip_prefix(&self.from)?;
        let subject = entry.strip_suffix(".class").unwrap_or(entry);
        if !self.includes.is_empty() && !self.includes.iter().any(|p| p.matches(subject)) {
            return None;
        }
        if self.excludes.iter().any(|p| p.matches(subject)) {
            return None;
        }
        Some(format!("{}{rest}", self.to))
    }
}

/// `org.example` becomes `org/example/`.
fn to_path_prefix(package: &str) -> String {
    let mut prefix = package.replace('.', "/");
    if !prefix.ends_with('/') {
        prefix.push('/');
    }
    prefix
}

/// Rewrites archive entry names according to the configured rules.
pub struct RelocationProcessor {
    relocations: Vec<Relocation>,
    cache_key: String,
}

impl RelocationProcessor {
    /// Build a processor from a parsed [`RelocationConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ProcessorError::Config`] when the section has no rules or a
    /// rule is malformed.
    pub fn from_config(config: &RelocationConfig) -> Result<Self, ProcessorError> {
        if config.rules.is_empty() {
            return Err(ConfigError::Incomplete {
                reason: "relocation configured without any rules".to_owned(),
            }
            .into());
        }
        let relocations = config
            .rules
            .iter()
            .map(String::as_str)
            .map(Relocation::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            relocations,
            cache_key: config.rules.join(";"),
        })
    }

    fn construct(
        config: &ExtensionConfig,
        _scope: &ExecutionScope,
    ) -> Result<Box<dyn Processor>, ProcessorError> {
        let relocation = config.expect_type::<RelocationConfig>(PROCESSOR)?;
        Ok(Box::new(Self::from_config(relocation)?))
    }

    fn relocate(&self, entry: &str) -> Option<String> {
        self.relocations.iter().find_map(|rule| rule.apply(entry))
    }

    /// `org.example.Foo` relocated as a dotted class name.
    fn relocate_dotted(&self, name: &str) -> Option<String> {
        if name.contains('/') {
            return None;
        }
        self.relocate(&name.replace('.', "/"))
            .map(|moved| moved.replace('/', "."))
    }

    /// Every `L<name>;` type inside a descriptor or generic signature.
    fn relocate_descriptor(&self, text: &str) -> Option<String> {
        if !text.contains(';') {
            return None;
        }
        let mut out = String::with_capacity(text.len());
        let mut changed = false;
        let mut rest = text;
        while let Some(start) = rest.find('L') {
            let (before, tail) = rest.split_at(start + 1);
            out.push_str(before);
            let end = tail.find([';', '<']).unwrap_or(tail.len());
            let (name, after) = tail.split_at(end);
            let moved = self.relocate(name);
            changed |= moved.is_some();
            out.push_str(moved.as_deref().unwrap_or(name));
            rest = after;
        }
        out.push_str(rest);
        changed.then_some(out)
    }

    fn relocate_constant(&self, text: &str) -> Option<String> {
        self.relocate(text)
            .or_else(|| self.relocate_dotted(text))
            .or_else(|| self.relocate_descriptor(text))
    }

    /// The relocated name of an archive entry.
    fn entry_name(&self, name: &str) -> Option<String> {
        if let Some(service) = name.strip_prefix(SERVICES_DIR) {
            return self
                .relocate_dotted(service)
                .map(|moved| format!("{SERVICES_DIR}{moved}"));
        }
        self.relocate(name)
    }

    fn relocate_services(&self, text: &str) -> String {
        text.split_inclusive('\n')
            .map(|line| {
                let provider = line.trim();
                self.relocate_dotted(provider)
                    .map_or_else(|| line.to_owned(), |moved| line.replacen(provider, &moved, 1))
            })
            .collect()
    }

    /// Decompress, rewrite and re-add an entry whose contents relocate.
    fn rewrite_entry<R, W>(
        &self,
        archive: &mut ZipArchive<R>,
        index: usize,
        writer: &mut ZipWriter<W>,
    ) -> Result<(), String>
    where
        R: Read + Seek,
        W: Write + Seek,
    {
        let mut entry = archive.by_index(index).map_err(|e| e.to_string())?;
        let name = entry.name().to_owned();
        let mut contents = Vec::new();
        entry
            .read_to_end(&mut contents)
            .map_err(|e| format!("{name}: {e}"))?;
        let rewritten = if name.ends_with(".class") {
            classfile::rewrite_constants(&contents, |text| self.relocate_constant(text))
                .map_err(|e| format!("{name}: {e}"))?
        } else {
            self.relocate_services(&String::from_utf8_lossy(&contents))
                .into_bytes()
        };
        let mut options = SimpleFileOptions::default().compression_method(entry.compression());
        if let Some(modified) = entry.last_modified() {
            options = options.last_modified_time(modified);
        }
        let target = self.entry_name(&name).unwrap_or(name);
        writer
            .start_file(target, options)
            .map_err(|e| e.to_string())?;
        writer.write_all(&rewritten).map_err(|e| e.to_string())
    }
}

/// Entries whose contents, not only their names, are relocated.
fn rewrites_contents(name: &str) -> bool {
    name.ends_with(".class")
        || name
            .strip_prefix(SERVICES_DIR)
            .is_some_and(|service| !service.is_empty() && !service.ends_with('/'))
}

impl Processor for RelocationProcessor {
    fn process(&self, input: &Utf8Path, output: &Utf8Path) -> Result<(), ProcessorError> {
        let archive_error = |path: &Utf8Path, e: zip::result::ZipError| ProcessorError::Archive {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };
        let original = File::open(input).map_err(|source| ProcessorError::Io {
            path: input.to_path_buf(),
            source,
        })?;
        let mut archive = ZipArchive::new(original).map_err(|e| archive_error(input, e))?;
        let sink = File::create(output).map_err(|source| ProcessorError::Io {
            path: output.to_path_buf(),
            source,
        })?;
        let mut writer = ZipWriter::new(BufWriter::new(sink));

        for index in 0..archive.len() {
            let name = archive
                .by_index_raw(index)
                .map_err(|e| archive_error(input, e))?
                .name()
                .to_owned();
            if rewrites_contents(&name) {
                self.rewrite_entry(&mut archive, index, &mut writer)
                    .map_err(|reason| ProcessorError::Archive {
                        path: input.to_path_buf(),
                        reason,
                    })?;
                continue;
            }
            let entry = archive
                .by_index_raw(index)
                .map_err(|e| archive_error(input, e))?;
            let target = self.entry_name(&name).unwrap_or(name);
            writer
                .raw_copy_file_rename(entry, target)
                .map_err(|e| archive_error(output, e))?;
        }
        writer
            .finish()
            .map_err(|e| archive_error(output, e))?
            .into_inner().map_err(|e| ProcessorError::Io {
            path: output.to_path_buf(),
            source: e.into_error(),
        })?;
        Ok(())
    }

    fn cache_key(&self) -> Option<String> {
        Some(self.cache_key.clone())
    }
}
