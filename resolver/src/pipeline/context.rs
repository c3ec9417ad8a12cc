//! Extension contexts and the cache of execution scopes behind them.

use super::extension::Processor;
use super::scope::ExecutionScope;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use stowaway_common::coordinate::ArtifactCoordinate;
use stowaway_common::digest::DigestAlgorithm;

/// Identity of an execution scope.
///
/// Two extension configurations share a scope when they name the same
/// extension and processor and declare the same supporting artifacts, in any
/// order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextKey {
    extension: String,
    processor: String,
    dependencies: String,
}

impl ContextKey {
    /// Derive the key for an extension's processor and supporting artifacts.
    #[must_use]
    pub fn new(extension: &str, processor: &str, dependencies: &[ArtifactCoordinate]) -> Self {
        let mut sorted: Vec<&ArtifactCoordinate> = dependencies.iter().collect();
        sorted.sort();
        let listing = sorted
            .iter()
            .map(|coordinate| coordinate.to_manifest_line())
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            extension: extension.to_owned(),
            processor: processor.to_owned(),
            dependencies: DigestAlgorithm::Sha1.hash_str(&listing).as_hex(),
        }
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.extension, self.processor, self.dependencies)
    }
}

type Slot = Arc<OnceCell<Arc<ExecutionScope>>>;

/// Single-assignment cache of execution scopes.
///
/// Concurrent requests for the same key build the scope once; the others
/// wait for and share the result. A failed build leaves the slot empty so a
/// later call can retry.
#[derive(Debug, Default)]
pub struct ContextCache {
    slots: Mutex<HashMap<ContextKey, Slot>>,
}

impl ContextCache {
    /// An empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the scope for `key`, building it with `build` if absent.
    ///
    /// # Errors
    ///
    /// Propagates the error returned by `build`.
    pub fn get_or_build<E>(
        &self,
        key: &ContextKey,
        build: impl FnOnce() -> Result<ExecutionScope, E>,
    ) -> Result<Arc<ExecutionScope>, E> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        slot.get_or_try_init(|| build().map(Arc::new)).cloned()
    }

    /// Number of built scopes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|slot| slot.get().is_some())
            .count()
    }

    /// Whether no scope has been built.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached scope.
    pub fn clear(&self) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// A configured pipeline stage: an extension name, the scope its processor
/// was resolved in and the processor itself.
pub struct ExtensionContext {
    name: String,
    scope: Arc<ExecutionScope>,
    processor: Box<dyn Processor>,
}

impl ExtensionContext {
    /// Assemble a context.
    #[must_use]
    pub fn new(name: impl Into<String>, scope: Arc<ExecutionScope>, processor: Box<dyn Processor>) -> Self {
        Self {
            name: name.into(),
            scope,
            processor,
        }
    }

    /// The extension (manifest section) name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The scope the processor was resolved in.
    #[must_use]
    pub fn scope(&self) -> &ExecutionScope {
        &self.scope
    }

    /// The stage transform.
    #[must_use]
    pub fn processor(&self) -> &dyn Processor {
        self.processor.as_ref()
    }
}

impl fmt::Debug for ExtensionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionContext")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::scope::SharedContract;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn coordinate(notation: &str) -> ArtifactCoordinate {
        ArtifactCoordinate::parse(notation, &"a".repeat(64)).expect("coordinate")
    }

    fn empty_scope() -> ExecutionScope {
        ExecutionScope::isolated([], Arc::new(SharedContract::empty()), Vec::new())
    }

    #[test]
    fn key_ignores_dependency_order() {
        let a = coordinate("g:a:1");
        let b = coordinate("g:b:1");
        assert_eq!(
            ContextKey::new("ext", "proc", &[a.clone(), b.clone()]),
            ContextKey::new("ext", "proc", &[b, a])
        );
    }

    #[test]
    fn key_distinguishes_processor_and_dependencies() {
        let a = coordinate("g:a:1");
        let base = ContextKey::new("ext", "proc", &[a.clone()]);
        assert_ne!(base, ContextKey::new("ext", "other", &[a]));
        assert_ne!(base, ContextKey::new("ext", "proc", &[coordinate("g:a:2")]));
    }

    #[test]
    fn concurrent_requests_build_once() {
        let cache = Arc::new(ContextCache::new());
        let builds = Arc::new(AtomicUsize::new(0));
        let key = ContextKey::new("ext", "proc", &[]);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let builds = Arc::clone(&builds);
                let key = key.clone();
                thread::spawn(move || {
                    cache
                        .get_or_build::<()>(&key, || {
                            builds.fetch_add(1, Ordering::SeqCst);
                            Ok(empty_scope())
                        })
                        .expect("build succeeds")
                })
            })
            .collect();
        let scopes: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread"))
            .collect();

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(scopes.windows(2).all(|pair| match pair {
            [left, right] => Arc::ptr_eq(left, right),
            _ => true,
        }));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn failed_build_can_be_retried() {
        let cache = ContextCache::new();
        let key = ContextKey::new("ext", "proc", &[]);
        let first = cache.get_or_build(&key, || Err("offline"));
        assert_eq!(first.map(|_| ()), Err("offline"));
        assert!(cache.is_empty());

        cache
            .get_or_build::<&str>(&key, || Ok(empty_scope()))
            .expect("second attempt builds");
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }
}
