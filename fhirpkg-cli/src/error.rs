//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::process;

use fhirpkg::cache::CacheError;
use fhirpkg::package::PackageRefError;
use fhirpkg::{ConfigError, DownloadError, RegistryError};
use thiserror::Error;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug, Error)]
pub enum CliError {
    /// Failed to initialize logging
    #[error("failed to initialize logging: {0}")]
    LoggingInit(String),

    /// Configuration file could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A registry name not present in the configuration
    #[error("unknown registry '{0}'")]
    UnknownRegistry(String),

    /// A package argument could not be parsed
    #[error("invalid package '{spec}': {source}")]
    InvalidPackage {
        spec: String,
        #[source]
        source: PackageRefError,
    },

    /// Registry client setup failed
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// A cache operation failed
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// A download run failed
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// Ctrl+C handler could not be installed
    #[error("failed to set signal handler: {0}")]
    SignalHandler(#[from] ctrlc::Error),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::Download(DownloadError::Cancelled) => process::exit(130),
            CliError::Download(DownloadError::Fetch {
                source: CacheError::Registry(RegistryError::StatusCode { status: 404, .. }),
                ..
            }) => {
                eprintln!();
                eprintln!("The registry does not know this package version.");
                eprintln!("Check the name and version, or pick another registry with --registry.");
            }
            CliError::UnknownRegistry(_) => {
                eprintln!();
                eprintln!("Registries are configured in the [registries] section of config.ini.");
            }
            _ => {}
        }

        process::exit(1)
    }
}
