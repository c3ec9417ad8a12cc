//! Unit tests for stage keys and cached stage application.

use super::*;
use crate::pipeline::{Extension, ExecutionScope, SharedContract};
use crate::test_utils::{COUNTING_PROCESSOR, CountingExtension};
use rstest::{fixture, rstest};
use std::fs;
use std::sync::Arc;
use stowaway_common::digest::MultiHasher;
use stowaway_common::fs::{ensure_parent_dirs, temp_siblings};

const INPUT_HASH: &str = "a9993e364706816aba3e25717850c26c9cd0d89d";

struct Workspace {
    _dir: tempfile::TempDir,
    cache: CacheStore,
    artifact: FetchedArtifact,
}

#[fixture]
fn workspace() -> Workspace {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = Utf8PathBuf::try_from(dir.path().join("cache")).expect("utf-8");
    let cache = CacheStore::new(root);
    let path = cache.locate(Utf8Path::new("org/example/lib/1.0/lib-1.0.jar"));
    ensure_parent_dirs(&path).expect("parents");
    fs::write(&path, "original").expect("seed artifact");
    let digests = MultiHasher::integrity().hash_file(&path).expect("hash");
    Workspace {
        _dir: dir,
        cache,
        artifact: FetchedArtifact::new(path, digests),
    }
}

fn stage(extension: &CountingExtension, name: &str, lines: &[&str]) -> ExtensionContext {
    let lines: Vec<String> = lines.iter().map(|line| (*line).to_owned()).collect();
    let config = extension.parse_config(&lines).expect("config");
    let scope = Arc::new(ExecutionScope::host(
        extension.exports(),
        Arc::new(SharedContract::default()),
    ));
    let processor = scope
        .instantiate(name, COUNTING_PROCESSOR, &config)
        .expect("processor");
    ExtensionContext::new(name, scope, processor)
}

#[test]
fn stage_key_without_processor_key_is_input_hash() {
    assert_eq!(stage_key(None, INPUT_HASH), INPUT_HASH);
}

#[test]
fn stage_key_mixes_processor_key_and_input() {
    let key = stage_key(Some("org.a org.b"), INPUT_HASH);
    assert_eq!(key.len(), 40);
    assert_eq!(key, stage_key(Some("org.a org.b"), INPUT_HASH));
    assert_ne!(key, stage_key(Some("org.a org.c"), INPUT_HASH));
    assert_ne!(key, stage_key(Some("org.a org.b"), &"0".repeat(40)));
}

#[test]
fn output_path_suffixes_the_input() {
    let output = stage_output_path(Utf8Path::new("/c/lib-1.0.jar"), "relocation", "abc");
    assert_eq!(output, Utf8Path::new("/c/lib-1.0.jar-relocation-abc"));
}

#[rstest]
fn empty_pipeline_returns_the_artifact(workspace: Workspace) {
    let output = Pipeline::default()
        .apply(&workspace.artifact, &workspace.cache, &WorkSignal::new())
        .expect("apply");
    assert_eq!(output, workspace.artifact.path());
}

#[rstest]
fn stages_run_in_order_and_chain_paths(workspace: Workspace) {
    let first = CountingExtension::new("a");
    let second = CountingExtension::new("b");
    let pipeline = Pipeline::new(vec![stage(&first, "a", &[]), stage(&second, "b", &[])]);
    let work = WorkSignal::new();

    let output = pipeline
        .apply(&workspace.artifact, &workspace.cache, &work)
        .expect("apply");

    assert_eq!(pipeline.stage_names().collect::<Vec<_>>(), ["a", "b"]);
    assert_eq!(
        fs::read_to_string(&output).expect("read output"),
        "original\na support=0\nb support=0"
    );
    let input_sha1 = workspace
        .artifact
        .digest(DigestAlgorithm::Sha1)
        .expect("sha1")
        .as_hex();
    let middle = stage_output_path(
        workspace.artifact.path(),
        "a",
        &stage_key(Some("a"), &input_sha1),
    );
    assert!(middle.is_file());
    let middle_sha1 = DigestAlgorithm::Sha1.hash_file(&middle).expect("hash").as_hex();
    assert_eq!(
        output,
        stage_output_path(&middle, "b", &stage_key(Some("b"), &middle_sha1))
    );
    assert!(workspace.cache.last_used(&middle).expect("marker").is_some());
    assert!(workspace.cache.last_used(&output).expect("marker").is_some());
    assert!(work.started());
}

#[rstest]
fn cached_outputs_are_reused(workspace: Workspace) {
    let first = CountingExtension::new("a");
    let second = CountingExtension::new("b");
    let pipeline = Pipeline::new(vec![stage(&first, "a", &[]), stage(&second, "b", &[])]);

    let output = pipeline
        .apply(&workspace.artifact, &workspace.cache, &WorkSignal::new())
        .expect("first apply");
    let work = WorkSignal::new();
    let again = pipeline
        .apply(&workspace.artifact, &workspace.cache, &work)
        .expect("second apply");

    assert_eq!(output, again);
    assert_eq!((first.runs(), second.runs()), (1, 1));
    assert!(!work.started());
}

#[rstest]
fn deleting_a_late_output_reruns_only_that_stage(workspace: Workspace) {
    let first = CountingExtension::new("a");
    let second = CountingExtension::new("b");
    let pipeline = Pipeline::new(vec![stage(&first, "a", &[]), stage(&second, "b", &[])]);

    let output = pipeline
        .apply(&workspace.artifact, &workspace.cache, &WorkSignal::new())
        .expect("first apply");
    fs::remove_file(&output).expect("delete final output");
    let again = pipeline
        .apply(&workspace.artifact, &workspace.cache, &WorkSignal::new())
        .expect("second apply");

    assert_eq!(output, again);
    assert_eq!((first.runs(), second.runs()), (1, 2));
}

#[rstest]
fn processor_key_changes_the_output(workspace: Workspace) {
    let extension = CountingExtension::new("a");
    let one = Pipeline::new(vec![stage(&extension, "a", &["marker one"])])
        .apply(&workspace.artifact, &workspace.cache, &WorkSignal::new())
        .expect("apply one");
    let two = Pipeline::new(vec![stage(&extension, "a", &["marker two"])])
        .apply(&workspace.artifact, &workspace.cache, &WorkSignal::new())
        .expect("apply two");

    assert_ne!(one, two);
    assert_eq!(extension.runs(), 2);
}

#[rstest]
fn failing_stage_leaves_no_output(workspace: Workspace) {
    let extension = CountingExtension::new("a");
    let pipeline = Pipeline::new(vec![stage(&extension, "a", &["fail"])]);

    let err = pipeline
        .apply(&workspace.artifact, &workspace.cache, &WorkSignal::new())
        .expect_err("stage fails");

    assert!(matches!(err, PipelineError::Stage { ref extension, .. } if extension == "a"));
    let input_sha1 = workspace
        .artifact
        .digest(DigestAlgorithm::Sha1)
        .expect("sha1")
        .as_hex();
    let output = stage_output_path(
        workspace.artifact.path(),
        "a",
        &stage_key(Some("a"), &input_sha1),
    );
    assert!(!output.exists());
    assert!(temp_siblings(&output).expect("list temps").is_empty());
}
