//! Streaming tar archive reader.
//!
//! [`unpack`] walks a tar stream, optionally gzip-compressed, and hands each
//! regular file entry to an [`EntrySink`]. Callers control which entries are
//! delivered with a name filter and how they are named with a name transform:
//!
//! ```text
//! bytes ──► gzip? ──► tar entries ──► filter(name) ──► transform(name) ──► sink
//! ```
//!
//! The gzip layer is detected from the stream's magic bytes, so callers never
//! need to know which flavour a registry served.
//!
//! # Example
//!
//! ```ignore
//! use fhirpkg::archive::{unpack, MemorySink, UnpackOptions};
//!
//! let options = UnpackOptions::new()
//!     .with_filter(|name| name.ends_with("package.json"));
//! let mut sink = MemorySink::new();
//! unpack(reader, &options, &mut sink)?;
//! let manifest = sink.get("package/package.json");
//! ```

mod sink;

pub use sink::{DiskSink, MemorySink, UnpackEvent};

use std::io::{self, Cursor, Read};

use flate2::read::GzDecoder;
use thiserror::Error;

/// Magic bytes opening every gzip member.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Tar block size; headers and entry data are padded to it.
const BLOCK_SIZE: u64 = 512;

/// A tar archive closes with two zero blocks.
const END_OF_ARCHIVE: u64 = 2 * BLOCK_SIZE;

/// Errors raised while reading an archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Gzip or tar framing is malformed or truncated.
    #[error("corrupt archive: {0}")]
    Corrupt(#[source] io::Error),

    /// The sink rejected or failed to store an entry.
    #[error("failed to unpack {name}: {source}")]
    Sink { name: String, source: io::Error },
}

/// Result type for archive operations.
pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Predicate deciding whether an entry (by its original name) is delivered.
pub type NameFilter = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Maps an entry's original name to the name handed to the sink.
pub type NameTransform = Box<dyn Fn(&str) -> String + Send + Sync>;

/// Receives the entries of an archive.
pub trait EntrySink {
    /// Consumes one entry.
    ///
    /// `reader` yields exactly `size` bytes; any bytes the sink leaves unread
    /// are drained by [`unpack`].
    fn accept(&mut self, name: &str, size: u64, reader: &mut dyn Read) -> io::Result<()>;
}

/// Filter and name transform applied by [`unpack`].
#[derive(Default)]
pub struct UnpackOptions {
    filter: Option<NameFilter>,
    transform: Option<NameTransform>,
}

impl UnpackOptions {
    /// Options delivering every entry under its original name.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only deliver entries whose original name passes `filter`.
    pub fn with_filter(mut self, filter: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    /// Rename delivered entries with `transform`.
    pub fn with_transform(
        mut self,
        transform: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        self.transform = Some(Box::new(transform));
        self
    }

    fn accepts(&self, name: &str) -> bool {
        self.filter.as_ref().map_or(true, |f| f(name))
    }

    fn rename(&self, name: &str) -> String {
        match &self.transform {
            Some(transform) => transform(name),
            None => name.to_string(),
        }
    }
}

impl std::fmt::Debug for UnpackOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnpackOptions")
            .field("filter", &self.filter.is_some())
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

/// Reads a tar or tar.gz stream, delivering accepted file entries to `sink`.
///
/// Directories, links and other non-file entries are skipped. Returns the
/// number of entries delivered. On the first framing or sink error the walk
/// stops and no further entries reach the sink.
///
/// The stream is read to its end: a gzip trailer with a bad checksum or a tar
/// stream missing its end-of-archive blocks is reported as
/// [`ArchiveError::Corrupt`], even after every entry has been delivered.
pub fn unpack<R: Read>(
    stream: R,
    options: &UnpackOptions,
    sink: &mut dyn EntrySink,
) -> ArchiveResult<usize> {
    let mut stream = stream;
    let mut magic = [0u8; 2];
    let read = read_prefix(&mut stream, &mut magic).map_err(ArchiveError::Corrupt)?;
    let restored = Cursor::new(magic[..read].to_vec()).chain(stream);

    if magic[..read] == GZIP_MAGIC {
        unpack_tar(GzDecoder::new(restored), options, sink)
    } else {
        unpack_tar(restored, options, sink)
    }
}

fn unpack_tar<R: Read>(
    stream: R,
    options: &UnpackOptions,
    sink: &mut dyn EntrySink,
) -> ArchiveResult<usize> {
    let mut archive = tar::Archive::new(CountingReader::new(stream));
    let mut delivered = 0;
    // Offset just past the last entry's padded data.
    let mut entries_end = 0;

    for entry in archive.entries().map_err(ArchiveError::Corrupt)? {
        let entry = entry.map_err(ArchiveError::Corrupt)?;
        let stored = entry.header().entry_size().map_err(ArchiveError::Corrupt)?;
        entries_end = entry.raw_file_position() + stored.div_ceil(BLOCK_SIZE) * BLOCK_SIZE;

        if !entry.header().entry_type().is_file() {
            continue;
        }

        let original = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        if !options.accepts(&original) {
            continue;
        }

        let name = options.rename(&original);
        let size = entry.header().size().map_err(ArchiveError::Corrupt)?;

        let mut reader = TrackedReader::new(entry);
        if let Err(source) = sink.accept(&name, size, &mut reader) {
            return Err(match reader.read_error.take() {
                Some(err) => ArchiveError::Corrupt(err),
                None => ArchiveError::Sink { name, source },
            });
        }

        io::copy(&mut reader, &mut io::sink()).map_err(ArchiveError::Corrupt)?;
        if reader.consumed != size {
            return Err(ArchiveError::Corrupt(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "entry {} truncated: expected {} bytes, got {}",
                    original, size, reader.consumed
                ),
            )));
        }

        delivered += 1;
    }

    // Drain the rest so a gzip decoder reaches its trailer and checks it.
    let mut rest = archive.into_inner();
    io::copy(&mut rest, &mut io::sink()).map_err(ArchiveError::Corrupt)?;
    if rest.count < entries_end + END_OF_ARCHIVE {
        return Err(ArchiveError::Corrupt(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!(
                "archive ends after {} bytes without its end-of-archive blocks",
                rest.count
            ),
        )));
    }

    Ok(delivered)
}

/// Fills `buf` from `reader`, stopping early only at end of stream.
fn read_prefix<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Counts the bytes the tar parser pulls from the stream.
struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R> CountingReader<R> {
    fn new(inner: R) -> Self {
        Self { inner, count: 0 }
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

/// Entry reader that remembers how much was read and whether reading failed,
/// so a sink error caused by corrupt input is reported as corruption.
struct TrackedReader<R> {
    inner: R,
    consumed: u64,
    read_error: Option<io::Error>,
}

impl<R: Read> TrackedReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            consumed: 0,
            read_error: None,
        }
    }
}

impl<R: Read> Read for TrackedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.read(buf) {
            Ok(n) => {
                self.consumed += n as u64;
                Ok(n)
            }
            Err(e) => {
                self.read_error = Some(io::Error::new(e.kind(), e.to_string()));
                Err(e)
            }
        }
    }
}
