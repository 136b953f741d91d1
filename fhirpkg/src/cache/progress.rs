//! Archive stream plumbing for cache fetches.
//!
//! [`FetchReader`] sits between the registry response and the archive
//! reader. Every chunk it yields is also appended to the entry's raw archive
//! copy and reported to the listeners, and the cancellation token is checked
//! before each read.
//!
//! The archive reader only sees an `io::Error` when a read fails, so the
//! reader keeps the original failure aside. That lets the cache report a
//! dropped connection as a registry error and a full disk as an I/O error
//! instead of a corrupt archive.

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

use tokio_util::sync::CancellationToken;

use crate::package::PackageRef;
use crate::registry::RegistryError;

use super::error::CacheError;
use super::listener::CacheListener;

/// Why a [`FetchReader`] stopped yielding bytes.
#[derive(Debug)]
pub(crate) enum FetchFailure {
    /// The cancellation token fired.
    Cancelled,
    /// Reading the registry response failed.
    Body(io::Error),
    /// Writing the raw archive copy failed.
    Copy(io::Error),
}

impl FetchFailure {
    /// Maps the failure onto the cache error taxonomy. `partial` is the raw
    /// copy being written.
    pub(crate) fn into_cache_error(self, partial: &Path) -> CacheError {
        match self {
            Self::Cancelled => CacheError::Cancelled,
            Self::Body(err) => CacheError::Registry(RegistryError::from_body(err)),
            Self::Copy(err) => CacheError::io(partial, err),
        }
    }
}

pub(crate) struct FetchReader<'a, R> {
    inner: R,
    copy: BufWriter<File>,
    cancel: &'a CancellationToken,
    package: &'a PackageRef,
    listener: &'a dyn CacheListener,
    total: u64,
    failure: Option<FetchFailure>,
}

impl<'a, R: Read> FetchReader<'a, R> {
    pub(crate) fn new(
        inner: R,
        copy: File,
        cancel: &'a CancellationToken,
        package: &'a PackageRef,
        listener: &'a dyn CacheListener,
    ) -> Self {
        Self {
            inner,
            copy: BufWriter::new(copy),
            cancel,
            package,
            listener,
            total: 0,
            failure: None,
        }
    }

    /// The failure behind the last read error, if the read failed here
    /// rather than in the archive reader above.
    pub(crate) fn take_failure(&mut self) -> Option<FetchFailure> {
        self.failure.take()
    }

    /// Reads whatever the archive reader left unconsumed, so the raw copy is
    /// complete, and flushes it. Returns the total bytes received.
    pub(crate) fn finish(mut self) -> Result<u64, FetchFailure> {
        if let Err(err) = io::copy(&mut self, &mut io::sink()) {
            return Err(self.failure.take().unwrap_or(FetchFailure::Body(err)));
        }
        self.copy.flush().map_err(FetchFailure::Copy)?;
        Ok(self.total)
    }

    /// Records `failure` and returns a stand-in error for the caller.
    fn fail(&mut self, kind: io::ErrorKind, failure: FetchFailure) -> io::Error {
        let message = match &failure {
            FetchFailure::Cancelled => "fetch cancelled".to_string(),
            FetchFailure::Body(err) | FetchFailure::Copy(err) => err.to_string(),
        };
        self.failure = Some(failure);
        io::Error::new(kind, message)
    }
}

impl<R: Read> Read for FetchReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(self.fail(io::ErrorKind::Other, FetchFailure::Cancelled));
        }

        let n = match self.inner.read(buf) {
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Err(err),
            Err(err) => return Err(self.fail(err.kind(), FetchFailure::Body(err))),
        };
        if n > 0 {
            if let Err(err) = self.copy.write_all(&buf[..n]) {
                return Err(self.fail(err.kind(), FetchFailure::Copy(err)));
            }
            self.total += n as u64;
            self.listener.on_fetch_write(self.package, n);
        }
        Ok(n)
    }
}
