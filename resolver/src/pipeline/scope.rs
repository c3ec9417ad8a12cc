//! Execution scopes: symbol tables that processors are instantiated from.
//!
//! The host scope sees every registered extension's exports. An isolated
//! scope sees only its own extension's exports, the shared contract and the
//! supporting artifacts fetched for it; it never falls through to symbols
//! published by other extensions.

use super::PipelineError;
use super::extension::{Export, ExtensionConfig, Processor, ProcessorConstructor, ProcessorError};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::sync::Arc;

/// Symbol of the pass-through processor in the shared contract.
pub const COPY_PROCESSOR: &str = "stowaway.copy";

/// Which kind of scope a processor runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// Shared host scope, used by extensions without supporting artifacts.
    Host,
    /// Per-extension scope with its own supporting artifacts.
    Isolated,
}

/// Symbols every scope can resolve.
#[derive(Clone)]
pub struct SharedContract {
    symbols: BTreeMap<&'static str, ProcessorConstructor>,
}

impl SharedContract {
    /// A contract with no symbols.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            symbols: BTreeMap::new(),
        }
    }

    /// Add a symbol.
    #[must_use]
    pub fn with(mut self, export: Export) -> Self {
        self.symbols.insert(export.identity(), export.constructor());
        self
    }

    fn get(&self, identity: &str) -> Option<ProcessorConstructor> {
        self.symbols.get(identity).copied()
    }
}

impl Default for SharedContract {
    /// The contract exposing [`COPY_PROCESSOR`].
    fn default() -> Self {
        Self::empty().with(Export::new(COPY_PROCESSOR, CopyProcessor::construct))
    }
}

impl fmt::Debug for SharedContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.symbols.keys()).finish()
    }
}

/// A symbol table plus the supporting artifacts visible to it.
pub struct ExecutionScope {
    kind: ScopeKind,
    symbols: BTreeMap<&'static str, ProcessorConstructor>,
    contract: Arc<SharedContract>,
    support: Vec<Utf8PathBuf>,
}

impl ExecutionScope {
    /// The host scope over the exports of every registered extension.
    #[must_use]
    pub fn host(exports: impl IntoIterator<Item = Export>, contract: Arc<SharedContract>) -> Self {
        Self {
            kind: ScopeKind::Host,
            symbols: collect(exports),
            contract,
            support: Vec::new(),
        }
    }

    /// An isolated scope over one extension's exports and its supporting
    /// artifacts.
    #[must_use]
    pub fn isolated(
        exports: impl IntoIterator<Item = Export>,
        contract: Arc<SharedContract>,
        support: Vec<Utf8PathBuf>,
    ) -> Self {
        Self {
            kind: ScopeKind::Isolated,
            symbols: collect(exports),
            contract,
            support,
        }
    }

    /// The kind of this scope.
    #[must_use]
    pub const fn kind(&self) -> ScopeKind {
        self.kind
    }

    /// Supporting artifacts available to processors in this scope.
    #[must_use]
    pub fn support_artifacts(&self) -> &[Utf8PathBuf] {
        &self.support
    }

    /// Look up `identity`: own symbols first, then the shared contract.
    #[must_use]
    pub fn resolve_symbol(&self, identity: &str) -> Option<ProcessorConstructor> {
        self.symbols
            .get(identity)
            .copied()
            .or_else(|| self.contract.get(identity))
    }

    /// Construct the processor published as `identity`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnknownProcessor`] when the symbol is not
    /// visible, and [`PipelineError::Construct`] when the constructor fails.
    pub fn instantiate(
        &self,
        extension: &str,
        identity: &str,
        config: &ExtensionConfig,
    ) -> Result<Box<dyn Processor>, PipelineError> {
        let constructor =
            self.resolve_symbol(identity)
                .ok_or_else(|| PipelineError::UnknownProcessor {
                    extension: extension.to_owned(),
                    identity: identity.to_owned(),
                })?;
        constructor(config, self).map_err(|source| PipelineError::Construct {
            extension: extension.to_owned(),
            source,
        })
    }
}

impl fmt::Debug for ExecutionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionScope")
            .field("kind", &self.kind)
            .field("symbols", &self.symbols.keys().collect::<Vec<_>>())
            .field("support", &self.support)
            .finish_non_exhaustive()
    }
}

fn collect(exports: impl IntoIterator<Item = Export>) -> BTreeMap<&'static str, ProcessorConstructor> {
    exports
        .into_iter()
        .map(|export| (export.identity(), export.constructor()))
        .collect()
}

/// Copies the input unchanged.
struct CopyProcessor;

impl CopyProcessor {
    #[expect(
        clippy::unnecessary_wraps,
        reason = "must match the ProcessorConstructor signature"
    )]
    fn construct(
        _config: &ExtensionConfig,
        _scope: &ExecutionScope,
    ) -> Result<Box<dyn Processor>, ProcessorError> {
        Ok(Box::new(Self))
    }
}

impl Processor for CopyProcessor {
    fn process(&self, input: &Utf8Path, output: &Utf8Path) -> Result<(), ProcessorError> {
        fs::copy(input, output)
            .map(|_| ())
            .map_err(|source| ProcessorError::Io {
                path: input.to_path_buf(),
                source,
            })
    }

    fn cache_key(&self) -> Option<String> {
        Some(COPY_PROCESSOR.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Marker(&'static str);

    impl Processor for Marker {
        fn process(&self, _input: &Utf8Path, _output: &Utf8Path) -> Result<(), ProcessorError> {
            Ok(())
        }

        fn cache_key(&self) -> Option<String> {
            Some(self.0.to_owned())
        }
    }

    fn own(_: &ExtensionConfig, _: &ExecutionScope) -> Result<Box<dyn Processor>, ProcessorError> {
        Ok(Box::new(Marker("own")))
    }

    fn other(_: &ExtensionConfig, _: &ExecutionScope) -> Result<Box<dyn Processor>, ProcessorError> {
        Ok(Box::new(Marker("other")))
    }

    fn config() -> ExtensionConfig {
        ExtensionConfig::new(())
    }

    #[test]
    fn isolated_scope_resolves_own_symbols_and_contract() {
        let scope = ExecutionScope::isolated(
            [Export::new("ext.own", own)],
            Arc::new(SharedContract::default()),
            vec![Utf8PathBuf::from("/cache/support.jar")],
        );
        let processor = scope
            .instantiate("ext", "ext.own", &config())
            .expect("own symbol");
        assert_eq!(processor.cache_key().as_deref(), Some("own"));
        assert!(scope.resolve_symbol(COPY_PROCESSOR).is_some());
        assert_eq!(scope.kind(), ScopeKind::Isolated);
        assert_eq!(scope.support_artifacts().len(), 1);
    }

    #[test]
    fn isolated_scope_does_not_see_other_extensions() {
        let host = ExecutionScope::host(
            [Export::new("ext.own", own), Export::new("ext.other", other)],
            Arc::new(SharedContract::empty()),
        );
        assert!(host.resolve_symbol("ext.other").is_some());

        let isolated = ExecutionScope::isolated(
            [Export::new("ext.own", own)],
            Arc::new(SharedContract::empty()),
            Vec::new(),
        );
        let err = isolated
            .instantiate("ext", "ext.other", &config())
            .err()
            .expect("symbol belongs to another extension");
        assert!(matches!(err, PipelineError::UnknownProcessor { .. }));
    }

    #[test]
    fn own_symbol_shadows_contract() {
        let contract = SharedContract::empty().with(Export::new("shared", other));
        let scope = ExecutionScope::isolated(
            [Export::new("shared", own)],
            Arc::new(contract),
            Vec::new(),
        );
        let processor = scope
            .instantiate("ext", "shared", &config())
            .expect("resolves");
        assert_eq!(processor.cache_key().as_deref(), Some("own"));
    }

    #[test]
    fn copy_processor_copies_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).expect("utf-8");
        let input = root.join("in.jar");
        let output = root.join("out.jar");
        fs::write(&input, b"payload").expect("write input");

        let scope = ExecutionScope::host([], Arc::new(SharedContract::default()));
        let processor = scope
            .instantiate("copy", COPY_PROCESSOR, &config())
            .expect("contract symbol");
        processor.process(&input, &output).expect("copy");

        assert_eq!(fs::read(&output).expect("read output"), b"payload");
    }
}
