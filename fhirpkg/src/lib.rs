//! fhirpkg - FHIR package cache and dependency-resolving downloader
//!
//! This library fetches versioned FHIR packages from package registries,
//! keeps their extracted contents in an on-disk cache and resolves their
//! transitive dependencies with bounded, cancellable concurrency.
//!
//! ```text
//!  Downloader ──► Scheduler ──► FetchTask ──► Cache ──► RegistryClient
//!                     ▲                         │            │
//!                     └──── dependencies ◄──────┤            ▼
//!                                               └──── archive::unpack
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use fhirpkg::{Cache, CacheConfig, Downloader, HttpRegistryClient, RegistryConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let client = HttpRegistryClient::new(&RegistryConfig::default())?;
//! let cache = Arc::new(
//!     Cache::new(CacheConfig::new("/var/cache/fhir")).with_registry("fhir", Arc::new(client)),
//! );
//!
//! let mut downloader = Downloader::new(Arc::clone(&cache)).workers(8);
//! downloader.add("fhir", "hl7.fhir.us.core", "6.1.0", true)?;
//! downloader.start(&CancellationToken::new())?;
//! ```

pub mod archive;
pub mod cache;
pub mod config;
pub mod downloader;
pub mod package;
pub mod registry;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{Cache, CacheConfig, CacheError, CacheListener};
pub use config::{ConfigError, ConfigFile};
pub use downloader::{DownloadError, Downloader};
pub use package::{Manifest, Package, PackageRef};
pub use registry::{HttpRegistryClient, RegistryClient, RegistryConfig, RegistryError};

/// Re-exported so callers can build the cancellation tokens the API takes.
pub use tokio_util::sync::CancellationToken;
