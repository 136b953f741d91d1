//! On-disk package cache.
//!
//! The [`Cache`] stores one directory per package version:
//!
//! ```text
//! <root>/<registry>/<name>/<version>/
//!     package.json                    manifest, always kept
//!     StructureDefinition-*.json ...  resources matching a prefix
//!     package.tgz                     raw archive, written last
//! ```
//!
//! The raw archive doubles as the completeness marker. A fetch streams the
//! registry response through the archive reader and, at the same time, into a
//! hidden partial file; only after every entry has been extracted and the
//! manifest verified is the partial file renamed to `package.tgz`. A fetch
//! that fails at any point removes the whole entry directory, so
//! [`Cache::has`] never reports a half-written entry.
//!
//! # Concurrency
//!
//! Writers serialize per [`PackageRef`]: each ref has its own mutex, so
//! different packages fetch in parallel while concurrent fetches of the same
//! package run one after the other (the second one then hits the cache).
//!
//! # Example
//!
//! ```ignore
//! use fhirpkg::cache::{Cache, CacheConfig};
//! use fhirpkg::registry::{HttpRegistryClient, RegistryConfig};
//!
//! let client = HttpRegistryClient::new(&RegistryConfig::default())?;
//! let cache = Cache::new(CacheConfig::new("/var/cache/fhir"))
//!     .with_registry("fhir", Arc::new(client));
//!
//! let package = PackageRef::new("fhir", "hl7.fhir.r4.core", "4.0.1")?;
//! cache.fetch(&CancellationToken::new(), &package)?;
//! for file in cache.get(&package)?.files()? {
//!     println!("{}", file.display());
//! }
//! ```

mod config;
mod error;
mod listener;
mod progress;

pub use config::{
    CacheConfig, ARCHIVE_FILE, DEFAULT_MANIFEST_FILE, DEFAULT_RESOURCE_PREFIXES,
    DEFAULT_SKIP_FILES,
};
pub use error::{CacheError, CacheResult};
pub use listener::{CacheListener, Listeners, NoopListener};

use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::archive::{self, ArchiveError, DiskSink, UnpackEvent, UnpackOptions};
use crate::package::{Manifest, Package, PackageRef};
use crate::registry::{RegistryClient, RegistryError};

use progress::FetchReader;

/// Name of the raw archive while it is still being written.
const PARTIAL_ARCHIVE_FILE: &str = ".package.tgz.partial";

/// Versioned package store backed by a directory tree.
pub struct Cache {
    config: CacheConfig,
    registries: HashMap<String, Arc<dyn RegistryClient>>,
    listeners: Listeners,
    locks: DashMap<PackageRef, Arc<Mutex<()>>>,
}

impl Cache {
    /// Create a cache with no registries and no listeners.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            registries: HashMap::new(),
            listeners: Listeners::new(),
            locks: DashMap::new(),
        }
    }

    /// Register the client used to fetch packages of `registry`.
    pub fn with_registry(
        mut self,
        registry: impl Into<String>,
        client: Arc<dyn RegistryClient>,
    ) -> Self {
        self.registries.insert(registry.into(), client);
        self
    }

    /// Add a listener notified of cache activity.
    pub fn with_listener(mut self, listener: Arc<dyn CacheListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    /// Names of the registered registries, sorted.
    pub fn registries(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.registries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Whether a complete entry exists for `package`.
    pub fn has(&self, package: &PackageRef) -> bool {
        self.archive_path(package).is_file()
    }

    /// The entry directory of a cached package.
    pub fn path(&self, package: &PackageRef) -> CacheResult<PathBuf> {
        if !self.has(package) {
            return Err(CacheError::NotExist {
                package: package.clone(),
            });
        }
        Ok(package.entry_dir(&self.config.root))
    }

    /// Opens a cached package.
    pub fn get(&self, package: &PackageRef) -> CacheResult<Package> {
        let dir = self.path(package)?;
        Ok(Package::open(
            package.clone(),
            dir,
            &self.config.manifest_file,
            ARCHIVE_FILE,
        )?)
    }

    /// Fetches `package` unless it is already cached.
    ///
    /// A cache hit performs no network request and only notifies listeners.
    pub fn fetch(&self, cancel: &CancellationToken, package: &PackageRef) -> CacheResult<()> {
        self.fetch_entry(cancel, package, false)
    }

    /// Fetches `package`, replacing any existing entry.
    pub fn force_fetch(&self, cancel: &CancellationToken, package: &PackageRef) -> CacheResult<()> {
        self.fetch_entry(cancel, package, true)
    }

    /// Removes the entry of `package`. Absent entries are not an error.
    pub fn delete(&self, package: &PackageRef) -> CacheResult<()> {
        self.with_entry_lock(package, || {
            let dir = package.entry_dir(&self.config.root);
            if !dir.exists() {
                return Ok(());
            }

            fs::remove_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;
            info!(package = %package, "deleted cache entry");
            self.listeners.on_delete(package);
            Ok(())
        })
    }

    /// Every complete entry in the cache, sorted.
    ///
    /// Directories that do not form a valid reference or lack the archive
    /// marker are ignored.
    pub fn list(&self) -> CacheResult<Vec<PackageRef>> {
        let mut packages = Vec::new();
        for registry in subdirs(&self.config.root)? {
            for name in subdirs(&registry)? {
                for version in subdirs(&name)? {
                    if !version.join(ARCHIVE_FILE).is_file() {
                        continue;
                    }
                    if let Some(package) = ref_from_dirs(&registry, &name, &version) {
                        packages.push(package);
                    }
                }
            }
        }
        packages.sort();
        Ok(packages)
    }

    fn archive_path(&self, package: &PackageRef) -> PathBuf {
        package.entry_dir(&self.config.root).join(ARCHIVE_FILE)
    }

    /// Runs `f` holding the entry lock of `package`.
    ///
    /// The lock is dropped from the map once no other caller holds it.
    fn with_entry_lock<T>(&self, package: &PackageRef, f: impl FnOnce() -> T) -> T {
        let lock = Arc::clone(self.locks.entry(package.clone()).or_default().value());
        let result = {
            let _guard = lock.lock();
            f()
        };
        drop(lock);
        self.locks
            .remove_if(package, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    fn client_for(&self, package: &PackageRef) -> CacheResult<&Arc<dyn RegistryClient>> {
        self.registries
            .get(package.registry())
            .ok_or_else(|| CacheError::UnknownRegistry {
                registry: package.registry().to_string(),
            })
    }

    fn fetch_entry(
        &self,
        cancel: &CancellationToken,
        package: &PackageRef,
        force: bool,
    ) -> CacheResult<()> {
        // Cancellation does not turn a cache hit into a failure.
        if cancel.is_cancelled() && (force || !self.has(package)) {
            return Err(CacheError::Cancelled);
        }
        self.with_entry_lock(package, || self.fetch_locked(cancel, package, force))
    }

    fn fetch_locked(
        &self,
        cancel: &CancellationToken,
        package: &PackageRef,
        force: bool,
    ) -> CacheResult<()> {
        if !force && self.has(package) {
            debug!(package = %package, "cache hit");
            self.listeners.on_cache_hit(package);
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err(CacheError::Cancelled);
        }

        let client = self.client_for(package)?;
        let dir = package.entry_dir(&self.config.root);

        // Clear out a forced entry or the leftovers of an interrupted process.
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;
        }
        fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;

        match self.populate(cancel, client.as_ref(), package, &dir) {
            Ok(bytes) => {
                info!(package = %package, bytes, "cached package");
                Ok(())
            }
            Err(err) => {
                if let Err(cleanup) = fs::remove_dir_all(&dir) {
                    warn!(
                        package = %package,
                        error = %cleanup,
                        "failed to remove partial cache entry"
                    );
                }
                debug!(package = %package, error = %err, "fetch failed, entry removed");
                Err(err)
            }
        }
    }

    /// Downloads and extracts into `dir`, then publishes the archive marker.
    fn populate(
        &self,
        cancel: &CancellationToken,
        client: &dyn RegistryClient,
        package: &PackageRef,
        dir: &Path,
    ) -> CacheResult<u64> {
        let fetched = client
            .fetch(cancel, package.name(), package.version())
            .map_err(|err| match err {
                RegistryError::Cancelled => CacheError::Cancelled,
                other => CacheError::Registry(other),
            })?;

        debug!(
            package = %package,
            content_length = ?fetched.content_length,
            "fetching package"
        );
        let content_length = fetched.content_length;
        self.listeners.on_fetch(package, content_length);

        let partial = dir.join(PARTIAL_ARCHIVE_FILE);
        let copy = File::create(&partial).map_err(|e| CacheError::io(&partial, e))?;
        let mut reader = FetchReader::new(fetched.body, copy, cancel, package, &self.listeners);

        let filter = self.config.entry_filter();
        let rename = filter.clone();
        let options = UnpackOptions::new()
            .with_filter(move |name| filter.accepts(name))
            .with_transform(move |name| rename.rename(name));

        let listeners = &self.listeners;
        let mut sink = DiskSink::new(dir).with_progress(|event| match event {
            UnpackEvent::Entry { name, size } => listeners.on_unpack(package, name, size),
            UnpackEvent::Write { name, bytes } => listeners.on_unpack_write(package, name, bytes),
        });

        let unpacked = archive::unpack(&mut reader, &options, &mut sink);
        if cancel.is_cancelled() {
            return Err(CacheError::Cancelled);
        }
        // A failed read of the response or the raw copy surfaces as an
        // archive error; report what actually went wrong.
        let entries = unpacked.map_err(|err| match reader.take_failure() {
            Some(failure) => failure.into_cache_error(&partial),
            None => CacheError::Archive(err),
        })?;

        let bytes = reader
            .finish()
            .map_err(|failure| failure.into_cache_error(&partial))?;
        if let Some(expected) = content_length {
            if bytes != expected {
                return Err(CacheError::Archive(ArchiveError::Corrupt(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("received {bytes} of {expected} announced bytes"),
                ))));
            }
        }

        let manifest_path = dir.join(&self.config.manifest_file);
        if !manifest_path.is_file() {
            return Err(CacheError::MissingManifest {
                package: package.clone(),
                file: self.config.manifest_file.clone(),
            });
        }
        let manifest = Manifest::load(&manifest_path)?;
        if manifest.name != package.name() || manifest.version != package.version() {
            warn!(
                package = %package,
                manifest_name = %manifest.name,
                manifest_version = %manifest.version,
                "manifest does not match requested package"
            );
        }

        let archive = dir.join(ARCHIVE_FILE);
        fs::rename(&partial, &archive).map_err(|e| CacheError::io(&archive, e))?;
        debug!(package = %package, entries, bytes, "extracted package");
        Ok(bytes)
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("root", &self.config.root)
            .field("registries", &self.registries())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Subdirectories of `dir`, or nothing when `dir` does not exist.
fn subdirs(dir: &Path) -> CacheResult<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(CacheError::io(dir, e)),
    };

    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| CacheError::io(dir, e))?;
        let file_type = entry.file_type().map_err(|e| CacheError::io(entry.path(), e))?;
        if file_type.is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

fn ref_from_dirs(registry: &Path, name: &Path, version: &Path) -> Option<PackageRef> {
    let segment = |p: &Path| p.file_name().and_then(|s| s.to_str()).map(str::to_string);
    PackageRef::new(segment(registry)?, segment(name)?, segment(version)?).ok()
}
