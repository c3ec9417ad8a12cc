//! Unit tests for resolver lifecycle and scope caching.

use super::*;
use crate::test_utils::{CountingExtension, StubTransport, jar_bytes, sha256_hex};
use crate::transport::TransportError;
use camino::Utf8Path;
use rstest::{fixture, rstest};
use std::sync::mpsc;

const REPO: &str = "https://repo.example/maven2";

struct Workspace {
    _dir: tempfile::TempDir,
    cache: CacheStore,
}

#[fixture]
fn workspace() -> Workspace {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = Utf8PathBuf::try_from(dir.path().join("cache")).expect("utf-8");
    Workspace {
        _dir: dir,
        cache: CacheStore::new(root),
    }
}

/// Blocks inside `download` until released, so a resolve stays in flight.
struct GateTransport {
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl ArtifactTransport for GateTransport {
    fn download(&self, url: &str, _dest: &Utf8Path) -> Result<(), TransportError> {
        self.entered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(())
            .expect("signal entry");
        self.release
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recv()
            .expect("wait for release");
        Err(TransportError::NotFound {
            url: url.to_owned(),
        })
    }
}

#[rstest]
fn close_twice_fails(workspace: Workspace) {
    let resolver = Resolver::new(Arc::new(StubTransport::new()));
    resolver
        .resolve(&Manifest::default(), &workspace.cache)
        .expect("empty manifest resolves");

    resolver.close().expect("first close");
    assert!(matches!(resolver.close(), Err(LifecycleError::AlreadyClosed)));
}

#[rstest]
fn resolve_after_close_fails(workspace: Workspace) {
    let resolver = Resolver::new(Arc::new(StubTransport::new()));
    resolver.close().expect("close");

    let err = resolver
        .resolve(&Manifest::default(), &workspace.cache)
        .expect_err("closed");
    assert!(matches!(err, ResolveError::Lifecycle(LifecycleError::Closed)));
}

#[rstest]
fn close_during_resolve_is_rejected(workspace: Workspace) {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let resolver = Resolver::new(Arc::new(GateTransport {
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    }))
    .with_options(ResolverOptions {
        workers: 1,
        ..ResolverOptions::default()
    });
    let coordinate = ArtifactCoordinate::parse("org.example:lib:1.0", &"0".repeat(64))
        .expect("coordinate");
    let manifest = Manifest::new(vec![REPO.to_owned()], vec![coordinate]).expect("manifest");

    thread::scope(|scope| {
        let handle = scope.spawn(|| resolver.resolve(&manifest, &workspace.cache));
        entered_rx.recv().expect("download started");

        assert!(matches!(resolver.close(), Err(LifecycleError::ResolveInProgress)));

        release_tx.send(()).expect("release download");
        let outcome = handle.join().expect("resolve thread");
        assert!(matches!(outcome, Err(ResolveError::Failed { .. })));
    });

    resolver.close().expect("close once idle");
}

#[rstest]
fn isolated_scopes_are_cached_until_close(workspace: Workspace) {
    let support = jar_bytes(&[("support/Tool.class", b"tool")]).expect("jar");
    let transport = Arc::new(StubTransport::new().with(
        format!("{REPO}/org/example/tool/2.0/tool-2.0.jar"),
        support.clone(),
    ));
    let registry = ExtensionRegistry::empty()
        .with("count", Arc::new(CountingExtension::new("count")))
        .expect("register");
    let resolver = Resolver::new(Arc::clone(&transport) as Arc<dyn ArtifactTransport>)
        .with_registry(registry);
    let text = format!(
        "__repos__\n{REPO}\n__end__\n__count__\ndep org.example:tool:2.0 {}\n__end__\n",
        sha256_hex(&support)
    );
    let manifest = Manifest::parse_str(&text, resolver.registry()).expect("manifest");

    resolver.resolve(&manifest, &workspace.cache).expect("first");
    resolver.resolve(&manifest, &workspace.cache).expect("second");

    assert_eq!(resolver.cached_contexts(), 1);
    assert_eq!(transport.request_count(), 1);

    resolver.close().expect("close");
    assert_eq!(resolver.cached_contexts(), 0);
}

#[test]
fn default_options_bound_workers() {
    let options = ResolverOptions::default();
    assert!((1..=crate::pool::MAX_WORKERS).contains(&options.workers));
    assert_eq!(options.batch_timeout, DEFAULT_BATCH_TIMEOUT);
    assert_eq!(options.cache_ttl, None);
}
