//! Unit tests for command-line parsing.

use super::*;
use rstest::rstest;

fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
    Cli::try_parse_from(std::iter::once("stowaway").chain(args.iter().copied()))
}

#[test]
fn resolve_takes_a_manifest_and_flags() {
    let cli = parse(&["resolve", "deps.txt", "--cache-dir", "/c", "--json"]).expect("valid");
    let Command::Resolve(args) = cli.command else {
        panic!("expected resolve");
    };
    assert_eq!(args.manifest, "deps.txt");
    assert_eq!(args.common.cache_dir.as_deref(), Some(camino::Utf8Path::new("/c")));
    assert!(args.json);
    assert!(!args.allow_exec);
    assert!(!args.default_packaging_only);
}

#[test]
fn sweep_accepts_a_ttl() {
    let cli = parse(&["sweep", "--ttl-secs", "60", "--config", "s.toml"]).expect("valid");
    assert_eq!(
        cli.command,
        Command::Sweep(SweepArgs {
            common: CommonArgs {
                config: Some("s.toml".into()),
                ..CommonArgs::default()
            },
            ttl_secs: Some(60),
        })
    );
}

#[rstest]
#[case::no_subcommand(&[])]
#[case::missing_manifest(&["resolve"])]
#[case::zero_ttl(&["sweep", "--ttl-secs", "0"])]
#[case::unknown_flag(&["resolve", "deps.txt", "--frobnicate"])]
fn rejects_invalid_invocations(#[case] args: &[&str]) {
    assert!(parse(args).is_err());
}
