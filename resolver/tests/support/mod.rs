//! Shared fixtures for resolver integration tests.
//!
//! A [`World`] owns a temporary cache directory and an in-memory repository
//! transport. Artifacts are published by notation and come back as
//! coordinates carrying the correct expected hash.

use camino::Utf8PathBuf;
use std::sync::Arc;
use stowaway_common::coordinate::ArtifactCoordinate;
use stowaway_resolver::test_utils::{StubTransport, sha256_hex};
use stowaway_resolver::transport::artifact_url;
use stowaway_resolver::{ArtifactTransport, CacheStore, Resolver};
use tempfile::TempDir;

/// Primary repository base URL.
pub const PRIMARY: &str = "https://primary.example/maven2";

/// Fallback repository base URL, with a trailing slash.
pub const MIRROR: &str = "https://mirror.example/maven2/";

/// A temporary cache plus an in-memory repository.
pub struct World {
    dir: TempDir,
    /// Artifact cache rooted inside the temporary directory.
    pub cache: CacheStore,
    /// Repository serving whatever [`World::publish`] registered.
    pub transport: Arc<StubTransport>,
}

impl World {
    /// A fresh temporary cache and an empty repository.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = Utf8PathBuf::try_from(dir.path().join("cache")).expect("utf-8 tempdir");
        Self {
            dir,
            cache: CacheStore::new(root),
            transport: Arc::new(StubTransport::new()),
        }
    }

    /// A second cache under the same temporary directory.
    pub fn sibling_cache(&self, name: &str) -> CacheStore {
        CacheStore::new(Utf8PathBuf::try_from(self.dir.path().join(name)).expect("utf-8 tempdir"))
    }

    /// Serve `bytes` for `notation` from `repository`.
    pub fn publish(&self, repository: &str, notation: &str, bytes: &[u8]) -> ArtifactCoordinate {
        let coordinate =
            ArtifactCoordinate::parse(notation, &sha256_hex(bytes)).expect("valid notation");
        self.transport.serve(
            artifact_url(repository, coordinate.repository_path().as_str()),
            bytes,
        );
        coordinate
    }

    /// A resolver over this world's transport with default settings.
    pub fn resolver(&self) -> Resolver {
        Resolver::new(self.transport_handle())
    }

    /// The repository as a trait object, for resolvers built by hand.
    pub fn transport_handle(&self) -> Arc<dyn ArtifactTransport> {
        Arc::clone(&self.transport) as Arc<dyn ArtifactTransport>
    }
}

/// Manifest text declaring `repositories` and `artifacts`, followed by
/// `extra` sections verbatim.
pub fn manifest_text(
    repositories: &[&str],
    artifacts: &[&ArtifactCoordinate],
    extra: &str,
) -> String {
    let mut text = String::from("__repos__\n");
    for repository in repositories {
        text.push_str(repository);
        text.push('\n');
    }
    text.push_str("__end__\n__deps__\n");
    for artifact in artifacts {
        text.push_str(&artifact.to_manifest_line());
        text.push('\n');
    }
    text.push_str("__end__\n");
    text.push_str(extra);
    text
}
