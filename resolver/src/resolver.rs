//! The resolution orchestrator.
//!
//! [`Resolver::resolve`] builds the pipeline for a manifest, then fetches and
//! transforms every declared artifact on a bounded worker pool. Per-artifact
//! failures are collected into one aggregate error. Isolated execution scopes
//! are cached on the resolver and reused by later calls until
//! [`Resolver::close`].

use crate::cache::CacheStore;
use crate::error::{LifecycleError, ResolveError, TaskError};
use crate::extensions::ExtensionRegistry;
use crate::fetch::{FetchedArtifact, Fetcher};
use crate::manifest::Manifest;
use crate::pipeline::{
    ContextCache, ContextKey, ExecutionScope, ExtensionContext, Pipeline, PipelineError,
};
use crate::pool::{AbortHandle, DEFAULT_BATCH_TIMEOUT, Task, WorkSignal, WorkerPool, default_workers};
use crate::resolved::ResolvedSet;
use crate::transport::ArtifactTransport;
use camino::Utf8PathBuf;
use log::{debug, warn};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;
use stowaway_common::coordinate::ArtifactCoordinate;

/// Tuning knobs for a [`Resolver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverOptions {
    /// Worker threads per batch.
    pub workers: usize,
    /// Time a batch may take before outstanding tasks fail.
    pub batch_timeout: Duration,
    /// When set, both caches are swept with this TTL after a successful
    /// resolution.
    pub cache_ttl: Option<Duration>,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
            cache_ttl: None,
        }
    }
}

#[derive(Debug, Default)]
struct Lifecycle {
    closed: bool,
    resolving: HashMap<ThreadId, usize>,
}

/// Marks the current thread as resolving until dropped.
struct ResolveGuard<'a> {
    lifecycle: &'a Mutex<Lifecycle>,
    thread: ThreadId,
}

impl Drop for ResolveGuard<'_> {
    fn drop(&mut self) {
        let mut lifecycle = self
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(depth) = lifecycle.resolving.get_mut(&self.thread) {
            *depth -= 1;
            if *depth == 0 {
                lifecycle.resolving.remove(&self.thread);
            }
        }
    }
}

/// Resolves manifests into verified, transformed, cached files.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use stowaway_resolver::{CacheStore, HttpTransport, Manifest, Resolver};
///
/// let resolver = Resolver::new(Arc::new(HttpTransport::default()));
/// let manifest = Manifest::parse_str("__repos__\n__end__\n", resolver.registry())?;
/// let resolved = resolver.resolve(&manifest, &CacheStore::new("/tmp/stowaway"))?;
/// for (coordinate, path) in resolved.iter() {
///     println!("{coordinate} -> {path}");
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Resolver {
    fetcher: Fetcher,
    registry: ExtensionRegistry,
    options: ResolverOptions,
    host: OnceCell<Arc<ExecutionScope>>,
    contexts: ContextCache,
    lifecycle: Mutex<Lifecycle>,
    abort: AbortHandle,
}

impl Resolver {
    /// A resolver with the default registry and options.
    #[must_use]
    pub fn new(transport: Arc<dyn ArtifactTransport>) -> Self {
        Self {
            fetcher: Fetcher::new(transport),
            registry: ExtensionRegistry::default(),
            options: ResolverOptions::default(),
            host: OnceCell::new(),
            contexts: ContextCache::new(),
            lifecycle: Mutex::new(Lifecycle::default()),
            abort: AbortHandle::default(),
        }
    }

    /// Replace the extension registry.
    #[must_use]
    pub fn with_registry(mut self, registry: ExtensionRegistry) -> Self {
        self.registry = registry;
        self.host = OnceCell::new();
        self
    }

    /// Replace the options.
    #[must_use]
    pub fn with_options(mut self, options: ResolverOptions) -> Self {
        self.options = options;
        self
    }

    /// The extension registry manifests should be parsed against.
    #[must_use]
    pub const fn registry(&self) -> &ExtensionRegistry {
        &self.registry
    }

    /// The options in effect.
    #[must_use]
    pub const fn options(&self) -> &ResolverOptions {
        &self.options
    }

    /// A handle that aborts the batch currently being collected.
    #[must_use]
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Number of isolated execution scopes currently cached.
    #[must_use]
    pub fn cached_contexts(&self) -> usize {
        self.contexts.len()
    }

    /// Resolve `manifest`, caching artifacts and extension dependencies in
    /// `cache`.
    ///
    /// # Errors
    ///
    /// See [`Resolver::resolve_with`].
    pub fn resolve(
        &self,
        manifest: &Manifest,
        cache: &CacheStore,
    ) -> Result<ResolvedSet, ResolveError> {
        self.resolve_with(manifest, cache, cache)
    }

    /// Resolve `manifest`, caching artifacts in `cache` and extension
    /// supporting artifacts in `extension_cache`.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Lifecycle`] on a closed resolver,
    /// [`ResolveError::Pipeline`] when a stage cannot be set up,
    /// [`ResolveError::Failed`] naming every artifact that could not be
    /// resolved, and [`ResolveError::Aborted`] when aborted.
    pub fn resolve_with(
        &self,
        manifest: &Manifest,
        cache: &CacheStore,
        extension_cache: &CacheStore,
    ) -> Result<ResolvedSet, ResolveError> {
        let _guard = self.enter()?;
        self.abort.reset();

        let work = Arc::new(WorkSignal::new());
        let pool = WorkerPool::new(
            self.options.workers,
            self.options.batch_timeout,
            self.abort.clone(),
        );
        let pipeline = Arc::new(self.build_pipeline(manifest, extension_cache, &pool, &work)?);
        let repositories: Arc<[String]> = manifest.repositories().into();

        let tasks = manifest
            .artifacts()
            .iter()
            .map(|declared| {
                let coordinate = declared.clone();
                let fetcher = self.fetcher.clone();
                let store = cache.clone();
                let sources = Arc::clone(&repositories);
                let stages = Arc::clone(&pipeline);
                let signal = Arc::clone(&work);
                Task::new(coordinate.to_string(), move || {
                    let fetched = fetcher.fetch(&coordinate, &sources, &store, &signal)?;
                    let path = if coordinate.is_default_packaging() {
                        stages.apply(&fetched, &store, &signal)?
                    } else {
                        fetched.into_path()
                    };
                    Ok((coordinate, path))
                })
            })
            .collect();
        let resolved = pool.run_batch(tasks)?;

        work.finish();
        self.sweep(cache, extension_cache);
        Ok(ResolvedSet::new(resolved.into_iter().collect()))
    }

    /// Release cached execution scopes.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::AlreadyClosed`] on a second call and
    /// [`LifecycleError::ResolveInProgress`] while any thread is inside
    /// `resolve`.
    pub fn close(&self) -> Result<(), LifecycleError> {
        let mut lifecycle = self
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if lifecycle.closed {
            return Err(LifecycleError::AlreadyClosed);
        }
        if !lifecycle.resolving.is_empty() {
            return Err(LifecycleError::ResolveInProgress);
        }
        lifecycle.closed = true;
        self.contexts.clear();
        Ok(())
    }

    fn enter(&self) -> Result<ResolveGuard<'_>, LifecycleError> {
        let mut lifecycle = self
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if lifecycle.closed {
            return Err(LifecycleError::Closed);
        }
        let thread = thread::current().id();
        *lifecycle.resolving.entry(thread).or_insert(0) += 1;
        Ok(ResolveGuard {
            lifecycle: &self.lifecycle,
            thread,
        })
    }

    fn build_pipeline(
        &self,
        manifest: &Manifest,
        extension_cache: &CacheStore,
        pool: &WorkerPool,
        work: &Arc<WorkSignal>,
    ) -> Result<Pipeline, ResolveError> {
        let mut stages = Vec::with_capacity(manifest.extensions().len());
        for (name, config) in manifest.extensions() {
            let extension =
                self.registry
                    .get(name)
                    .ok_or_else(|| PipelineError::UnregisteredExtension {
                        extension: name.clone(),
                    })?;
            let identity = extension.processor_identity();
            let mut dependencies = extension.dependencies(config);
            dependencies.sort();

            let scope = if dependencies.is_empty() {
                Arc::clone(
                    self.host
                        .get_or_init(|| Arc::new(self.registry.host_scope())),
                )
            } else {
                let key = ContextKey::new(name, &identity, &dependencies);
                self.contexts.get_or_build(&key, || {
                    debug!("building isolated scope {key}");
                    let support = self.fetch_support(
                        &dependencies,
                        manifest.repositories(),
                        extension_cache,
                        pool,
                        work,
                    )?;
                    Ok::<_, ResolveError>(ExecutionScope::isolated(
                        extension.exports(),
                        self.registry.contract(),
                        support,
                    ))
                })?
            };
            let processor = scope.instantiate(name, &identity, config)?;
            stages.push(ExtensionContext::new(name.clone(), scope, processor));
        }
        Ok(Pipeline::new(stages))
    }

    fn fetch_support(
        &self,
        dependencies: &[ArtifactCoordinate],
        repositories: &[String],
        cache: &CacheStore,
        pool: &WorkerPool,
        work: &Arc<WorkSignal>,
    ) -> Result<Vec<Utf8PathBuf>, ResolveError> {
        let shared: Arc<[String]> = repositories.into();
        let tasks = dependencies
            .iter()
            .map(|dependency| {
                let coordinate = dependency.clone();
                let fetcher = self.fetcher.clone();
                let store = cache.clone();
                let sources = Arc::clone(&shared);
                let signal = Arc::clone(work);
                Task::new(coordinate.to_string(), move || {
                    fetcher
                        .fetch(&coordinate, &sources, &store, &signal)
                        .map(FetchedArtifact::into_path)
                        .map_err(TaskError::from)
                })
            })
            .collect();
        pool.run_batch(tasks)
    }

    fn sweep(&self, cache: &CacheStore, extension_cache: &CacheStore) {
        let Some(ttl) = self.options.cache_ttl else {
            return;
        };
        let mut stores = vec![cache];
        if extension_cache != cache {
            stores.push(extension_cache);
        }
        for store in stores {
            store.sweep(ttl).map_or_else(
                |e| warn!("failed to sweep cache {}: {e}", store.root()),
                |report| {
                    debug!(
                        "swept {}: {} evicted, {} retained",
                        store.root(),
                        report.evicted,
                        report.retained
                    );
                },
            );
        }
    }
}

#[cfg(test)]
#[path = "resolver_tests.rs"]
mod tests;
