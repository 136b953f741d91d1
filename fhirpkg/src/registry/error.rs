//! Error types for registry access.

use std::io;

use thiserror::Error;

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors that can occur while fetching from a registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The registry answered with a status other than 200.
    #[error("registry returned status {status} for {url}")]
    StatusCode { url: String, status: u16 },

    /// The response was neither an archive nor a JSON envelope.
    #[error("unexpected content type {content_type:?} from {url}")]
    BadContentType { url: String, content_type: String },

    /// A JSON envelope could not be parsed or had no tarball location.
    #[error("bad registry response from {url}: {reason}")]
    BadContent { url: String, reason: String },

    /// The registry base URL cannot address packages.
    #[error("invalid registry URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Network-level failure.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    /// Reading the response body failed part way.
    #[error("failed to read registry response: {0}")]
    Body(#[source] io::Error),

    /// The fetch was cancelled before the request was sent.
    #[error("registry request cancelled")]
    Cancelled,
}

impl RegistryError {
    /// Classifies an error raised while reading a response body.
    ///
    /// Blocking `reqwest` bodies wrap transport failures in `io::Error`; those
    /// are unwrapped back into [`RegistryError::Transport`].
    pub fn from_body(err: io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<reqwest::Error>()) {
            return Self::Body(err);
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<reqwest::Error>()) {
            Some(Ok(transport)) => Self::Transport(*transport),
            Some(Err(inner)) => Self::Body(io::Error::new(kind, inner)),
            None => Self::Body(io::Error::from(kind)),
        }
    }
}
