//! Cache observability hooks.
//!
//! Listeners are notified as the cache works; they never influence control
//! flow. Every method has a no-op default so an observer implements only the
//! events it cares about.

use std::fmt;
use std::sync::Arc;

use crate::package::PackageRef;

/// Observer of cache activity.
///
/// Methods are called from worker threads, possibly concurrently for
/// different packages, and should return quickly.
pub trait CacheListener: Send + Sync {
    /// A network fetch started. `total_bytes` is the announced archive size.
    fn on_fetch(&self, _package: &PackageRef, _total_bytes: Option<u64>) {}

    /// A chunk of the archive was received.
    fn on_fetch_write(&self, _package: &PackageRef, _bytes: usize) {}

    /// An archive entry is about to be extracted.
    fn on_unpack(&self, _package: &PackageRef, _file: &str, _size: u64) {}

    /// A chunk of an extracted entry was written.
    fn on_unpack_write(&self, _package: &PackageRef, _file: &str, _bytes: usize) {}

    /// A fetch found the package already cached.
    fn on_cache_hit(&self, _package: &PackageRef) {}

    /// A cache entry was deleted.
    fn on_delete(&self, _package: &PackageRef) {}
}

/// Listener that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl CacheListener for NoopListener {}

/// Fans every event out to a set of listeners, in registration order.
#[derive(Clone, Default)]
pub struct Listeners {
    listeners: Vec<Arc<dyn CacheListener>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, listener: Arc<dyn CacheListener>) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.listeners.len())
            .finish()
    }
}

impl CacheListener for Listeners {
    fn on_fetch(&self, package: &PackageRef, total_bytes: Option<u64>) {
        for l in &self.listeners {
            l.on_fetch(package, total_bytes);
        }
    }

    fn on_fetch_write(&self, package: &PackageRef, bytes: usize) {
        for l in &self.listeners {
            l.on_fetch_write(package, bytes);
        }
    }

    fn on_unpack(&self, package: &PackageRef, file: &str, size: u64) {
        for l in &self.listeners {
            l.on_unpack(package, file, size);
        }
    }

    fn on_unpack_write(&self, package: &PackageRef, file: &str, bytes: usize) {
        for l in &self.listeners {
            l.on_unpack_write(package, file, bytes);
        }
    }

    fn on_cache_hit(&self, package: &PackageRef) {
        for l in &self.listeners {
            l.on_cache_hit(package);
        }
    }

    fn on_delete(&self, package: &PackageRef) {
        for l in &self.listeners {
            l.on_delete(package);
        }
    }
}
