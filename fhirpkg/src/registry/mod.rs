//! Package registry access.
//!
//! A [`RegistryClient`] turns a package name and version into the raw bytes of
//! the package archive. The HTTP implementation, [`HttpRegistryClient`],
//! understands the two response shapes registries use:
//!
//! ```text
//! GET {base}/{name}/{version}
//!   ├── 200 application/tar+gzip ──► archive body
//!   └── 200 application/json     ──► { "tarball": url } ──► GET url ──► archive body
//! ```
//!
//! Requests carry credentials through the pluggable [`Credentials`] seam.

mod auth;
mod error;
mod http;

pub use auth::{BasicAuth, BearerToken, Credentials, NoCredentials};
pub use error::{RegistryError, RegistryResult};
pub use http::{HttpRegistryClient, RegistryConfig, DEFAULT_REGISTRY_URL};

use std::fmt;
use std::io::Read;

use tokio_util::sync::CancellationToken;

/// An archive stream returned by a registry.
pub struct FetchedArchive {
    /// Archive bytes, tar or tar.gz.
    pub body: Box<dyn Read + Send>,
    /// Body length when the registry announced it.
    pub content_length: Option<u64>,
}

impl FetchedArchive {
    pub fn new(body: impl Read + Send + 'static, content_length: Option<u64>) -> Self {
        Self {
            body: Box::new(body),
            content_length,
        }
    }
}

impl fmt::Debug for FetchedArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchedArchive")
            .field("content_length", &self.content_length)
            .finish()
    }
}

/// Fetches package archives from one registry.
///
/// Implementations hold no per-call state; one client serves concurrent
/// fetches from many worker threads.
pub trait RegistryClient: Send + Sync {
    /// Fetches the archive of `name` at `version`.
    ///
    /// `cancel` is checked before each network request.
    fn fetch(
        &self,
        cancel: &CancellationToken,
        name: &str,
        version: &str,
    ) -> RegistryResult<FetchedArchive>;
}
