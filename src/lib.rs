//! Stowaway application facade.
//!
//! Wires settings, the HTTP transport and the resolver together behind the
//! `stowaway` binary. [`resolve_manifest`] and [`sweep_caches`] take their
//! transport and output sink as arguments so they can run against in-memory
//! doubles.

pub mod cli;
pub mod config;

pub use config::{Settings, SettingsError};

use camino::{Utf8Path, Utf8PathBuf};
use cli::{Cli, Command, CommonArgs, ResolveArgs, SweepArgs};
use log::debug;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::sync::Arc;
use stowaway_resolver::{
    ArtifactTransport, CacheError, CacheStore, ExtensionRegistry, HttpTransport, Manifest,
    ManifestError, RegistryError, ResolveError, ResolvedSet, Resolver,
};
use thiserror::Error;

/// Errors surfaced by the binary.
#[derive(Debug, Error)]
pub enum AppError {
    /// Settings could not be loaded.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// The manifest file could not be opened.
    #[error("failed to open manifest {path}: {source}")]
    OpenManifest {
        /// Manifest path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The manifest is malformed.
    #[error("invalid manifest {path}: {source}")]
    Manifest {
        /// Manifest path.
        path: Utf8PathBuf,
        /// Parse failure.
        #[source]
        source: ManifestError,
    },

    /// An extension could not be registered.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Resolution failed.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// A sweep failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Writing results failed.
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),

    /// Serialising JSON output failed.
    #[error("failed to encode output: {0}")]
    Json(#[from] serde_json::Error),
}

/// Run the parsed command line, writing results to `out`.
///
/// # Errors
///
/// Returns an [`AppError`] describing the first failure.
pub fn run(cli: &Cli, out: &mut dyn Write) -> Result<(), AppError> {
    match &cli.command {
        Command::Resolve(args) => {
            let settings = load_settings(&args.common)?;
            let transport = Arc::new(HttpTransport::new(settings.http_timeout()));
            resolve_manifest(args, &settings, transport, out).map(|_| ())
        }
        Command::Sweep(args) => {
            let settings = load_settings(&args.common)?;
            sweep_caches(args, &settings, out)
        }
    }
}

/// Load settings and apply command-line cache overrides.
///
/// # Errors
///
/// Returns [`AppError::Settings`] when the settings file is unusable.
pub fn load_settings(common: &CommonArgs) -> Result<Settings, AppError> {
    let mut settings = Settings::load(common.config.as_deref())?;
    apply_overrides(&mut settings, common);
    Ok(settings)
}

fn apply_overrides(settings: &mut Settings, common: &CommonArgs) {
    if let Some(dir) = &common.cache_dir {
        settings.cache_dir = Some(dir.clone());
    }
    if let Some(dir) = &common.extension_cache_dir {
        settings.extension_cache_dir = Some(dir.clone());
    }
}

/// Resolve the manifest named in `args` and print the resolved paths.
///
/// Each line is `notation<TAB>path`; with `--json` a single object maps
/// notations to paths.
///
/// # Errors
///
/// Returns an [`AppError`] when the manifest cannot be read or parsed,
/// resolution fails, or output cannot be written.
pub fn resolve_manifest(
    args: &ResolveArgs,
    settings: &Settings,
    transport: Arc<dyn ArtifactTransport>,
    out: &mut dyn Write,
) -> Result<ResolvedSet, AppError> {
    let mut registry = ExtensionRegistry::default();
    if args.allow_exec {
        registry = registry.with_exec()?;
    }
    let resolver = Resolver::new(transport)
        .with_registry(registry)
        .with_options(settings.resolver_options());
    let manifest = read_manifest(&args.manifest, resolver.registry())?;
    let cache = CacheStore::new(settings.cache_dir()?);
    let extension_cache = CacheStore::new(settings.extension_cache_dir()?);
    debug!(
        "resolving {} artifact(s) from {} into {}",
        manifest.artifacts().len(),
        args.manifest,
        cache.root()
    );

    let resolved = resolver.resolve_with(&manifest, &cache, &extension_cache)?;
    write_resolved(&resolved, args, out)?;
    Ok(resolved)
}

fn read_manifest(path: &Utf8Path, registry: &ExtensionRegistry) -> Result<Manifest, AppError> {
    let file = File::open(path).map_err(|source| AppError::OpenManifest {
        path: path.to_path_buf(),
        source,
    })?;
    Manifest::parse(BufReader::new(file), registry).map_err(|source| AppError::Manifest {
        path: path.to_path_buf(),
        source,
    })
}

fn write_resolved(
    resolved: &ResolvedSet,
    args: &ResolveArgs,
    out: &mut dyn Write,
) -> Result<(), AppError> {
    let entries: Vec<_> = if args.default_packaging_only {
        resolved.default_packaging().collect()
    } else {
        resolved.iter().collect()
    };
    if args.json {
        let object: BTreeMap<String, &str> = entries
            .iter()
            .map(|(coordinate, path)| (coordinate.to_string(), path.as_str()))
            .collect();
        serde_json::to_writer_pretty(&mut *out, &object)?;
        writeln!(out)?;
    } else {
        for (coordinate, path) in entries {
            writeln!(out, "{coordinate}\t{path}")?;
        }
    }
    Ok(())
}

/// Sweep the configured caches and report how many entries were evicted.
///
/// # Errors
///
/// Returns [`AppError::Cache`] when a cache cannot be swept.
pub fn sweep_caches(args: &SweepArgs, settings: &Settings, out: &mut dyn Write) -> Result<(), AppError> {
    let ttl = args
        .ttl_secs
        .map_or_else(|| settings.cache_ttl(), std::time::Duration::from_secs);
    let mut roots = vec![settings.cache_dir()?];
    let extension_root = settings.extension_cache_dir()?;
    if !roots.contains(&extension_root) {
        roots.push(extension_root);
    }
    for root in roots {
        let report = CacheStore::new(root.clone()).sweep(ttl)?;
        writeln!(
            out,
            "{root}: evicted {}, retained {}, unmarked {}",
            report.evicted, report.retained, report.unmarked
        )?;
    }
    Ok(())
}
