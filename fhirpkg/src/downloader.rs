//! Dependency-resolving package downloader.
//!
//! The [`Downloader`] drives a [`Cache`] through the [`Scheduler`]: every
//! requested package becomes a fetch task, and a fetch task for a package
//! whose dependencies were requested enqueues one more fetch task per declared
//! dependency once the manifest is on disk.
//!
//! ```text
//!  add(a, deps) ─┐
//!  add(b, deps) ─┼─► visited? ──► FetchTask ──► Cache::fetch ──► manifest
//!                │      ▲                                          │
//!                │      └────────────── dependencies ◄─────────────┘
//!                ▼
//!           Scheduler::run  (drains when nothing is pending)
//! ```
//!
//! The visited set is checked and updated atomically before a task is
//! scheduled, so a package reachable along several paths (a diamond) is
//! fetched once per run.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{Cache, CacheError};
use crate::package::{PackageRef, PackageRefError};
use crate::scheduler::{RunError, Scheduler, Task, TaskContext};

/// Result type for downloader operations.
pub type DownloadResult<T> = Result<T, DownloadError>;

/// Errors returned by a download run.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// A requested package reference is malformed.
    #[error(transparent)]
    InvalidRef(#[from] PackageRefError),

    /// Fetching a package failed.
    #[error("failed to fetch {package}: {source}")]
    Fetch {
        package: PackageRef,
        #[source]
        source: CacheError,
    },

    /// A manifest declares a dependency that cannot be addressed.
    #[error("{package} declares an invalid dependency: {source}")]
    InvalidDependency {
        package: PackageRef,
        #[source]
        source: PackageRefError,
    },

    /// The run was cancelled.
    #[error("download cancelled")]
    Cancelled,

    /// A fetch task panicked.
    #[error("task {task} panicked: {message}")]
    Panicked { task: String, message: String },
}

impl From<RunError<DownloadError>> for DownloadError {
    fn from(err: RunError<DownloadError>) -> Self {
        match err {
            RunError::Cancelled => Self::Cancelled,
            RunError::Task(err) => err,
            RunError::Panicked { task, message } => Self::Panicked { task, message },
        }
    }
}

/// Fetches requested packages and, on request, their transitive dependencies.
///
/// Requests accumulate with [`add`](Self::add) and are fetched on every call
/// to [`start`](Self::start); each run starts from an empty visited set.
pub struct Downloader {
    cache: Arc<Cache>,
    requests: BTreeMap<PackageRef, bool>,
    force: bool,
    workers: usize,
}

impl Downloader {
    pub fn new(cache: Arc<Cache>) -> Self {
        Self {
            cache,
            requests: BTreeMap::new(),
            force: false,
            workers: 0,
        }
    }

    /// Re-download packages even when they are cached.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Number of concurrent fetches. Zero means one per CPU.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    /// Registers a package to fetch.
    ///
    /// Adding the same package again only widens the request: dependency
    /// expansion is enabled if any of the requests asked for it.
    pub fn add(
        &mut self,
        registry: &str,
        name: &str,
        version: &str,
        include_dependencies: bool,
    ) -> DownloadResult<()> {
        let package = PackageRef::new(registry, name, version)?;
        self.add_ref(package, include_dependencies);
        Ok(())
    }

    /// Registers an already validated package reference.
    pub fn add_ref(&mut self, package: PackageRef, include_dependencies: bool) {
        let entry = self.requests.entry(package).or_insert(false);
        *entry |= include_dependencies;
    }

    /// Requested packages, in order, with their dependency flag.
    pub fn requests(&self) -> impl Iterator<Item = (&PackageRef, bool)> {
        self.requests.iter().map(|(package, deps)| (package, *deps))
    }

    /// Fetches every requested package, and dependencies where requested.
    ///
    /// Blocks until all reachable packages are cached or the first failure,
    /// which cancels the rest of the run and is returned.
    pub fn start(&self, cancel: &CancellationToken) -> DownloadResult<()> {
        let run = Arc::new(Run {
            cache: Arc::clone(&self.cache),
            visited: DashMap::new(),
            force: self.force,
        });

        let scheduler = Scheduler::<DownloadError>::new(self.workers);
        for (package, &include_dependencies) in &self.requests {
            if run.claim(package, include_dependencies) == Claim::New {
                scheduler.add(FetchTask::new(
                    Arc::clone(&run),
                    package.clone(),
                    include_dependencies,
                    self.force,
                ));
            }
        }

        info!(
            requests = self.requests.len(),
            workers = scheduler.workers(),
            force = self.force,
            "starting download"
        );

        let summary = scheduler.run(cancel);
        info!(
            packages = run.visited.len(),
            completed = summary.completed,
            failed = summary.failed,
            skipped = summary.skipped,
            "download finished"
        );

        summary.into_result().map(|_| ()).map_err(DownloadError::from)
    }
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("cache", &self.cache)
            .field("requests", &self.requests)
            .field("force", &self.force)
            .field("workers", &self.workers)
            .finish()
    }
}

/// State shared by the fetch tasks of one run.
struct Run {
    cache: Arc<Cache>,
    /// Packages scheduled this run, and whether their dependencies were.
    visited: DashMap<PackageRef, bool>,
    force: bool,
}

/// Outcome of claiming a package in the visited set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Claim {
    /// Already scheduled with at least the requested expansion.
    Seen,
    /// First visit this run.
    New,
    /// Scheduled before without dependency expansion; now expanding.
    Upgrade,
}

impl Run {
    /// Atomically decides whether `package` needs a fetch task.
    ///
    /// A package first scheduled without dependency expansion is scheduled
    /// once more when it is later reached with expansion; that second task
    /// hits the cache and only expands the dependencies.
    fn claim(&self, package: &PackageRef, include_dependencies: bool) -> Claim {
        match self.visited.entry(package.clone()) {
            Entry::Vacant(entry) => {
                entry.insert(include_dependencies);
                Claim::New
            }
            Entry::Occupied(mut entry) => {
                if include_dependencies && !*entry.get() {
                    entry.insert(true);
                    Claim::Upgrade
                } else {
                    Claim::Seen
                }
            }
        }
    }
}

struct FetchTask {
    run: Arc<Run>,
    package: PackageRef,
    include_dependencies: bool,
    force: bool,
    name: String,
}

impl FetchTask {
    fn new(run: Arc<Run>, package: PackageRef, include_dependencies: bool, force: bool) -> Self {
        let name = format!("fetch {package}");
        Self {
            run,
            package,
            include_dependencies,
            force,
            name,
        }
    }

    fn fetch_error(&self, source: CacheError) -> DownloadError {
        match source {
            CacheError::Cancelled => DownloadError::Cancelled,
            source => DownloadError::Fetch {
                package: self.package.clone(),
                source,
            },
        }
    }
}

impl Task<DownloadError> for FetchTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(self: Box<Self>, ctx: &TaskContext<DownloadError>) -> DownloadResult<()> {
        let cache = &self.run.cache;
        let cancel = ctx.cancel_token();

        let fetched = if self.force {
            cache.force_fetch(cancel, &self.package)
        } else {
            cache.fetch(cancel, &self.package)
        };
        fetched.map_err(|e| self.fetch_error(e))?;

        if !self.include_dependencies {
            return Ok(());
        }

        let package = cache.get(&self.package).map_err(|e| self.fetch_error(e))?;
        for (name, version) in package.dependencies() {
            let dependency = self.package.sibling(name, version).map_err(|source| {
                DownloadError::InvalidDependency {
                    package: self.package.clone(),
                    source,
                }
            })?;

            // An upgraded package was already fetched this run; never force it twice.
            let force = match self.run.claim(&dependency, true) {
                Claim::Seen => continue,
                Claim::New => self.run.force,
                Claim::Upgrade => false,
            };

            debug!(package = %self.package, dependency = %dependency, "scheduling dependency");
            let task = FetchTask::new(Arc::clone(&self.run), dependency, true, force);
            if !ctx.add(task) {
                warn!(package = %self.package, "run closed before dependency was scheduled");
            }
        }
        Ok(())
    }
}
