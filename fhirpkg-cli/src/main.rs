//! fhirpkg CLI - download and cache FHIR packages.
//!
//! This binary provides a command-line interface to the fhirpkg library.

mod commands;
mod error;
mod progress;

use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::cache::CacheAction;
use commands::common::GlobalArgs;
use commands::fetch::FetchArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "fhirpkg")]
#[command(version, about = "Download and cache FHIR packages", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download packages and their dependencies into the cache
    Fetch(FetchArgs),

    /// Inspect and manage the package cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

fn init_logging(verbose: u8) -> Result<(), CliError> {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    // RUST_LOG wins unless -v was given explicitly
    let filter = if verbose == 0 {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    } else {
        EnvFilter::new(level)
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| CliError::LoggingInit(e.to_string()))
}

fn run(cli: Cli) -> Result<(), CliError> {
    init_logging(cli.verbose)?;

    match cli.command {
        Command::Fetch(args) => commands::fetch::run(args, &cli.global),
        Command::Cache { action } => commands::cache::run(action, &cli.global),
    }
}

fn main() {
    if let Err(e) = run(Cli::parse()) {
        e.exit();
    }
}
