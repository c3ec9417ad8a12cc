//! `stowaway` CLI entrypoint.
//!
//! Resolves a manifest into cached local files and prints one
//! `notation<TAB>path` line per artifact, or sweeps stale cache entries.
//! Progress is logged to stderr through `env_logger` (`RUST_LOG`, default
//! `info`).

use clap::Parser;
use std::io::{self, Write};
use stowaway::AppError;
use stowaway::cli::Cli;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let mut stdout = io::stdout().lock();
    let mut stderr = io::stderr();
    let exit_code = exit_code_for_run_result(stowaway::run(&cli, &mut stdout), &mut stderr);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

fn exit_code_for_run_result(result: Result<(), AppError>, stderr: &mut dyn Write) -> i32 {
    result.map_or_else(
        |err| {
            if writeln!(stderr, "error: {err}").is_err() {
                // stderr is gone; the exit code still reports the failure.
            }
            1
        },
        |()| 0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use stowaway::SettingsError;

    #[test]
    fn success_exits_zero_silently() {
        let mut stderr = Vec::new();
        assert_eq!(exit_code_for_run_result(Ok(()), &mut stderr), 0);
        assert!(stderr.is_empty());
    }

    #[test]
    fn failure_is_printed_and_exits_one() {
        let mut stderr = Vec::new();
        let err = AppError::Settings(SettingsError::NoCacheDir);

        assert_eq!(exit_code_for_run_result(Err(err), &mut stderr), 1);

        let text = String::from_utf8(stderr).expect("stderr was not UTF-8");
        assert!(text.starts_with("error: no cache directory configured"), "{text}");
    }
}
