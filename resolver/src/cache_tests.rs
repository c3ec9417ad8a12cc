//! Unit tests for cache layout, last-used markers and eviction.

use super::*;
use rstest::{fixture, rstest};

const HOUR: Duration = Duration::from_secs(60 * 60);

struct TempCache {
    _dir: tempfile::TempDir,
    store: CacheStore,
}

#[fixture]
fn cache() -> TempCache {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = Utf8PathBuf::try_from(dir.path().join("cache")).expect("utf-8");
    TempCache {
        _dir: dir,
        store: CacheStore::new(root),
    }
}

fn write_entry(store: &CacheStore, relative: &str) -> Utf8PathBuf {
    let path = store.locate(Utf8Path::new(relative));
    ensure_parent_dirs(&path).expect("parents");
    fs::write(&path, b"entry").expect("write entry");
    path
}

#[rstest]
fn locate_is_pure_path_arithmetic(cache: TempCache) {
    let path = cache.store.locate(Utf8Path::new("a/b/c.jar"));
    assert_eq!(path, cache.store.root().join("a/b/c.jar"));
    assert!(!cache.store.root().exists());
}

#[rstest]
fn mark_used_round_trips_timestamp(cache: TempCache) {
    let entry = write_entry(&cache.store, "g/n/1/n-1.jar");
    let when = UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);
    cache.store.mark_used_at(&entry, when).expect("mark");

    let marker = fs::read_to_string(last_used_marker(&entry)).expect("marker");
    assert_eq!(marker, "1700000000123");
    assert_eq!(cache.store.last_used(&entry).expect("read"), Some(when));
}

#[rstest]
fn last_used_is_none_without_marker(cache: TempCache) {
    let entry = write_entry(&cache.store, "g/n/1/n-1.jar");
    assert_eq!(cache.store.last_used(&entry).expect("read"), None);
}

#[rstest]
fn sweep_of_missing_root_is_empty(cache: TempCache) {
    let report = cache.store.sweep(HOUR).expect("sweep");
    assert_eq!(report, SweepReport::default());
}

#[rstest]
fn sweep_evicts_stale_entry_and_prunes_parents(cache: TempCache) {
    let now = SystemTime::now();
    let stale = write_entry(&cache.store, "org/example/lib/1.0/lib-1.0.jar");
    cache
        .store
        .mark_used_at(&stale, now - HOUR - Duration::from_secs(1))
        .expect("mark");

    let report = cache.store.sweep_at(HOUR, now).expect("sweep");

    assert_eq!(report.evicted, 1);
    assert!(!stale.exists());
    assert!(!last_used_marker(&stale).exists());
    assert!(!cache.store.root().join("org").exists());
    assert!(cache.store.root().is_dir(), "cache root must survive");
}

#[rstest]
fn sweep_keeps_fresh_entries_and_their_directories(cache: TempCache) {
    let now = SystemTime::now();
    let stale = write_entry(&cache.store, "org/example/lib/1.0/lib-1.0.jar");
    let fresh = write_entry(&cache.store, "org/example/lib/2.0/lib-2.0.jar");
    cache
        .store
        .mark_used_at(&stale, now - HOUR * 2)
        .expect("mark stale");
    cache
        .store
        .mark_used_at(&fresh, now - Duration::from_secs(60))
        .expect("mark fresh");

    let report = cache.store.sweep_at(HOUR, now).expect("sweep");

    assert_eq!(report.evicted, 1);
    assert_eq!(report.retained, 1);
    assert!(fresh.exists());
    assert!(!cache.store.root().join("org/example/lib/1.0").exists());
    assert!(cache.store.root().join("org/example/lib").is_dir());
}

#[rstest]
fn sweep_skips_unmarked_and_temporary_files(cache: TempCache) {
    let unmarked = write_entry(&cache.store, "g/n/1/n-1.jar");
    let temp = write_entry(&cache.store, "g/n/1/n-1.pom.tmp");

    let report = cache
        .store
        .sweep_at(Duration::ZERO, SystemTime::now() + HOUR)
        .expect("sweep");

    assert_eq!(report.unmarked, 1);
    assert_eq!(report.evicted, 0);
    assert!(unmarked.exists());
    assert!(temp.exists());
}

#[rstest]
fn sweep_tolerates_corrupt_marker(cache: TempCache) {
    let entry = write_entry(&cache.store, "g/n/1/n-1.jar");
    fs::write(last_used_marker(&entry), "yesterday").expect("write marker");

    let report = cache.store.sweep_at(HOUR, SystemTime::now()).expect("sweep");

    assert_eq!(report.unmarked, 1);
    assert!(entry.exists());
}

#[rstest]
fn artifact_path_follows_repository_layout(cache: TempCache) {
    let coordinate = ArtifactCoordinate::parse("org.example:lib:1.0:tests@zip", &"1".repeat(64))
        .expect("valid");
    assert_eq!(
        cache.store.artifact_path(&coordinate),
        cache
            .store
            .root()
            .join("org/example/lib/1.0/lib-1.0-tests.zip")
    );
}
