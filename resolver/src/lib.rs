//! Stowaway resolver library.
//!
//! Resolves the artifacts declared in a manifest into verified local files.
//! Each artifact is looked up in a content-verified cache, downloaded from the
//! first repository that serves it, checked against its expected SHA-256 and,
//! for default-packaging artifacts, threaded through the configured extension
//! pipeline. Every intermediate file is cached under a content-derived key.
//!
//! # Modules
//!
//! - [`cache`] - Cache layout, last-used markers and TTL eviction
//! - [`error`] - Lifecycle, task and aggregate resolution errors
//! - [`extensions`] - Extension registry and the built-in extensions
//! - [`fetch`] - Cache lookup, ordered download attempts and verification
//! - [`manifest`] - Sectioned manifest parsing
//! - [`pipeline`] - Execution scopes, scope caching and stage application
//! - [`pool`] - Bounded worker pool, abort handle and work signal
//! - [`resolved`] - The mapping returned by a resolution
//! - [`resolver`] - The orchestrator tying the above together
//! - [`transport`] - HTTP downloads behind a mockable trait

pub mod cache;
pub mod error;
pub mod extensions;
pub mod fetch;
pub mod manifest;
pub mod pipeline;
pub mod pool;
pub mod resolved;
pub mod resolver;
pub mod transport;

#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;

pub use cache::{CacheError, CacheStore, SweepReport};
pub use error::{LifecycleError, ResolveError, TaskError, TaskFailure};
pub use extensions::{ExtensionRegistry, RegistryError};
pub use fetch::{FetchError, FetchedArtifact};
pub use manifest::{Manifest, ManifestError};
pub use pipeline::PipelineError;
pub use pool::{AbortHandle, WorkSignal};
pub use resolved::ResolvedSet;
pub use resolver::{Resolver, ResolverOptions};
pub use transport::{ArtifactTransport, HttpTransport, TransportError};
