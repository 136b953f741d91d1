//! Fetch command - download packages and their dependencies into the cache.

use std::sync::Arc;

use clap::Args;
use fhirpkg::cache::CacheListener;
use fhirpkg::Downloader;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::common::{parse_package, GlobalArgs};
use crate::error::CliError;
use crate::progress::ProgressListener;

/// Arguments for `fhirpkg fetch`.
#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Packages as name@version, e.g. hl7.fhir.r4.core@4.0.1
    #[arg(required = true)]
    pub packages: Vec<String>,

    /// Skip dependencies declared in package manifests
    #[arg(long)]
    pub no_deps: bool,

    /// Re-download packages that are already cached
    #[arg(long, short = 'f')]
    pub force: bool,

    /// Concurrent downloads (0 = one per CPU)
    #[arg(long, short = 'j')]
    pub workers: Option<usize>,

    /// Do not draw progress bars
    #[arg(long, short = 'q')]
    pub quiet: bool,
}

/// Run the fetch command.
pub fn run(args: FetchArgs, global: &GlobalArgs) -> Result<(), CliError> {
    let config = global.load_config()?;
    let registry = config.default_registry.clone();

    let progress = Arc::new(if args.quiet {
        ProgressListener::hidden()
    } else {
        ProgressListener::new()
    });
    let listener: Arc<dyn CacheListener> = progress.clone();
    let cache = Arc::new(global.build_cache(&config, Some(listener))?);

    let mut downloader = Downloader::new(Arc::clone(&cache))
        .force(args.force || config.force)
        .workers(args.workers.unwrap_or(config.workers));

    let mut requested = Vec::new();
    for spec in &args.packages {
        let package = parse_package(&registry, spec)?;
        downloader.add_ref(package.clone(), !args.no_deps);
        requested.push(package);
    }

    // Set up signal handler for graceful cancellation
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("Received interrupt, cancelling downloads...");
        on_signal.cancel();
    })?;

    info!(registry = %registry, packages = requested.len(), "fetching packages");
    let result = downloader.start(&cancel);
    let downloaded = progress.downloads();
    progress.finish();
    result?;
    info!(downloaded, "fetch complete");

    if !args.quiet {
        println!();
        println!("Cache: {}", cache.root().display());
        for package in &requested {
            let entry = cache.get(package)?;
            println!(
                "  {}@{}  ({} dependencies)",
                entry.name(),
                entry.version(),
                entry.dependencies().len()
            );
        }
    }
    Ok(())
}
