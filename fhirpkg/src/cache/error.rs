//! Error types for the package cache.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::archive::ArchiveError;
use crate::package::{ManifestError, PackageRef, PackageRefError};
use crate::registry::RegistryError;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur during cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The package has no complete entry in the cache.
    #[error("package {package} is not cached")]
    NotExist { package: PackageRef },

    /// No registry client is registered under this name.
    #[error("unknown registry {registry:?}")]
    UnknownRegistry { registry: String },

    /// A package reference could not be built.
    #[error(transparent)]
    InvalidRef(#[from] PackageRefError),

    /// The registry request failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The downloaded archive could not be unpacked.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// The package manifest could not be read or parsed.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// The archive unpacked cleanly but carried no manifest.
    #[error("package {package} has no {file} in its archive")]
    MissingManifest { package: PackageRef, file: String },

    /// A filesystem operation on the cache directory failed.
    #[error("cache I/O error at {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    /// The operation was cancelled.
    #[error("cache operation cancelled")]
    Cancelled,
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error is a cache miss.
    pub fn is_not_exist(&self) -> bool {
        matches!(self, Self::NotExist { .. })
    }
}
