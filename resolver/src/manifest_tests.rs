//! Unit tests for manifest parsing.

use super::*;
use crate::pipeline::MockExtension;
use crate::test_utils::CountingExtension;
use rstest::{fixture, rstest};
use std::sync::Arc;

const HASH_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const HASH_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

#[fixture]
fn registry() -> ExtensionRegistry {
    ExtensionRegistry::empty()
        .with("first", Arc::new(CountingExtension::new("first")))
        .and_then(|registry| registry.with("second", Arc::new(CountingExtension::new("second"))))
        .expect("register test extensions")
}

#[rstest]
fn parses_repositories_and_dependencies(registry: ExtensionRegistry) {
    let text = format!(
        "__repos__\n\
         https://repo.example/maven2\n\
         https://mirror.example/maven2/\n\
         __end__\n\
         \n\
         __deps__\n\
         org.example:lib:1.2.3 {HASH_A}\n\
         org.example:lib:1.2.3:sources@jar {HASH_B}\n\
         __end__\n"
    );
    let manifest = Manifest::parse_str(&text, &registry).expect("valid manifest");

    assert_eq!(
        manifest.repositories(),
        ["https://repo.example/maven2", "https://mirror.example/maven2/"]
    );
    let notations: Vec<String> = manifest.artifacts().iter().map(ToString::to_string).collect();
    assert_eq!(
        notations,
        ["org.example:lib:1.2.3@jar", "org.example:lib:1.2.3:sources@jar"]
    );
    assert!(manifest.extensions().is_empty());
}

#[rstest]
fn extension_sections_keep_first_appearance_order(registry: ExtensionRegistry) {
    let text = "__second__\nmarker two\n__end__\n__first__\nmarker one\n__end__\n";
    let manifest = Manifest::parse_str(text, &registry).expect("valid manifest");
    let names: Vec<&str> = manifest
        .extensions()
        .iter()
        .map(|(name, _)| name.as_str())
        .collect();
    assert_eq!(names, ["second", "first"]);
    assert!(manifest.extension_config("first").is_some());
    assert!(manifest.extension_config("third").is_none());
}

#[test]
fn repeated_sections_are_concatenated() {
    let mut extension = MockExtension::new();
    extension
        .expect_parse_config()
        .withf(|lines: &[String]| lines == ["a.b c.d", "e.f g.h"])
        .times(1)
        .returning(|_| Ok(ExtensionConfig::new(())));
    let registry = ExtensionRegistry::empty()
        .with("shade", Arc::new(extension))
        .expect("register mock");

    let text = "__shade__\na.b c.d\n__end__\n__deps__\n__end__\n__shade__\ne.f g.h\n__end__\n";
    let manifest = Manifest::parse_str(text, &registry).expect("valid manifest");
    assert_eq!(manifest.extensions().len(), 1);
}

#[rstest]
#[case::unterminated("__repos__\nhttps://repo.example\n", "never closed")]
#[case::nested("__repos__\n__deps__\n__end__\n", "opened inside section `repos`")]
#[case::outside("https://repo.example\n", "outside any section")]
#[case::stray_end("__end__\n", "without an open section")]
#[case::unknown("__shade__\n__end__\n", "no extension is registered for section `shade`")]
#[case::bad_dependency("__deps__\norg.example:lib 123\n__end__\n", "line 2")]
fn structural_errors_are_reported(
    registry: ExtensionRegistry,
    #[case] text: &str,
    #[case] expected: &str,
) {
    let err = Manifest::parse_str(text, &registry).expect_err("invalid manifest");
    let message = err.to_string();
    assert!(message.contains(expected), "unexpected error: {message}");
}

#[rstest]
fn unterminated_section_names_opening_line(registry: ExtensionRegistry) {
    let err = Manifest::parse_str("\n\n__deps__\n", &registry).expect_err("unterminated");
    assert!(matches!(
        err,
        ManifestError::UnterminatedSection { ref name, line: 3 } if name == "deps"
    ));
}

#[rstest]
fn duplicate_artifacts_are_rejected(registry: ExtensionRegistry) {
    let text = format!(
        "__deps__\norg.example:lib:1.0 {HASH_A}\norg.example:lib:1.0@jar {HASH_B}\n__end__\n"
    );
    let err = Manifest::parse_str(&text, &registry).expect_err("duplicate");
    assert!(matches!(err, ManifestError::DuplicateArtifact { line: 3, .. }));
}

#[rstest]
fn classifier_distinguishes_artifacts(registry: ExtensionRegistry) {
    let text = format!(
        "__deps__\norg.example:lib:1.0 {HASH_A}\norg.example:lib:1.0:tests {HASH_B}\n__end__\n"
    );
    let manifest = Manifest::parse_str(&text, &registry).expect("valid manifest");
    assert_eq!(manifest.artifacts().len(), 2);
}

#[rstest]
fn extension_config_errors_name_the_section(registry: ExtensionRegistry) {
    let err = Manifest::parse_str("__first__\nbogus line\n__end__\n", &registry)
        .expect_err("invalid extension config");
    assert!(matches!(err, ManifestError::ExtensionConfig { ref name, .. } if name == "first"));
}

#[test]
fn relocation_section_is_understood_by_default() {
    let text = "__relocation__\norg.example shaded.example\n__end__\n";
    let manifest =
        Manifest::parse_str(text, &ExtensionRegistry::default()).expect("valid manifest");
    assert!(manifest.extension_config("relocation").is_some());
}

#[test]
fn new_rejects_duplicate_keys() {
    let first = ArtifactCoordinate::parse("g:n:1", HASH_A).expect("coordinate");
    let second = ArtifactCoordinate::parse("g:n:1", HASH_B).expect("coordinate");
    let err = Manifest::new(Vec::new(), vec![first, second]).expect_err("duplicate");
    assert!(matches!(err, ManifestError::DuplicateArtifact { line: 2, .. }));
}

#[test]
fn read_errors_surface_as_io() {
    struct Broken;

    impl io::Read for Broken {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("disk on fire"))
        }
    }

    let err = Manifest::parse(io::BufReader::new(Broken), &ExtensionRegistry::default())
        .expect_err("read failure");
    assert!(matches!(err, ManifestError::Io(_)));
}
