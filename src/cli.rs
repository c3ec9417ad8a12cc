//! Command-line definitions for the `stowaway` binary.

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};

/// Resolve, verify, transform and cache external artifacts.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "stowaway")]
#[command(version, about)]
#[command(after_help = concat!(
    "EXAMPLES:\n",
    "  Resolve a manifest and list the local files:\n",
    "    $ stowaway resolve deps.txt\n\n",
    "  Resolve into a specific cache and emit JSON:\n",
    "    $ stowaway resolve deps.txt --cache-dir /var/cache/stowaway --json\n\n",
    "  Evict entries unused for a day:\n",
    "    $ stowaway sweep --ttl-secs 86400",
))]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Resolve every artifact declared in a manifest.
    Resolve(ResolveArgs),

    /// Evict cache entries that have not been used recently.
    Sweep(SweepArgs),
}

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct CommonArgs {
    /// Settings file [default: built-in defaults].
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<Utf8PathBuf>,

    /// Artifact cache root, overriding settings and environment.
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<Utf8PathBuf>,

    /// Extension cache root, overriding settings.
    #[arg(long, value_name = "DIR")]
    pub extension_cache_dir: Option<Utf8PathBuf>,
}

/// Arguments for `stowaway resolve`.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ResolveArgs {
    /// Manifest to resolve.
    #[arg(value_name = "MANIFEST")]
    pub manifest: Utf8PathBuf,

    /// Settings file and cache locations.
    #[command(flatten)]
    pub common: CommonArgs,

    /// Enable the `exec` extension, which runs external programs.
    #[arg(long)]
    pub allow_exec: bool,

    /// Only list artifacts of the default packaging type.
    #[arg(long)]
    pub default_packaging_only: bool,

    /// Print a JSON object instead of tab-separated lines.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `stowaway sweep`.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct SweepArgs {
    /// Settings file and cache locations.
    #[command(flatten)]
    pub common: CommonArgs,

    /// Time-to-live in seconds, overriding settings.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    pub ttl_secs: Option<u64>,
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
