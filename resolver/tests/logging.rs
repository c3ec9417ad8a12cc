//! Start and completion notices are logged only when work happens.

mod support;

use logtest::Logger;
use stowaway_resolver::Manifest;
use support::{MIRROR, PRIMARY, World, manifest_text};

const STARTED: &str = "Resolving artifacts...";
const FINISHED: &str = "Done resolving artifacts.";

fn drain(logger: &mut Logger) -> Vec<String> {
    let mut messages = Vec::new();
    while let Some(record) = logger.pop() {
        messages.push(record.args().to_string());
    }
    messages
}

#[test]
fn progress_notices_bracket_only_real_work() {
    let mut logger = Logger::start();
    let world = World::new();
    let jar = world.publish(PRIMARY, "org.example:api:1.0", b"api");
    let resolver = world.resolver();
    let manifest = Manifest::parse_str(&manifest_text(&[PRIMARY, MIRROR], &[&jar], ""), resolver.registry())
        .expect("manifest");
    let extension_cache = world.sibling_cache("extensions");

    resolver
        .resolve_with(&manifest, &world.cache, &extension_cache)
        .expect("first resolve");
    let first = drain(&mut logger);
    let started = first.iter().position(|message| message == STARTED);
    let finished = first.iter().position(|message| message == FINISHED);
    assert!(
        matches!((started, finished), (Some(start), Some(end)) if start < end),
        "unexpected log sequence: {first:?}"
    );
    assert_eq!(first.iter().filter(|message| *message == STARTED).count(), 1);

    resolver
        .resolve_with(&manifest, &world.cache, &extension_cache)
        .expect("cached resolve");
    let second = drain(&mut logger);
    assert!(
        !second.iter().any(|message| message == STARTED || message == FINISHED),
        "cached resolution logged progress: {second:?}"
    );
}
