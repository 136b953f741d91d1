//! Terminal progress reporting for cache activity.
//!
//! [`ProgressListener`] renders one progress bar per package being downloaded.
//! Bars know their length when the registry announces a content length and
//! fall back to a spinner otherwise.

use std::collections::HashMap;
use std::time::Duration;

use fhirpkg::cache::CacheListener;
use fhirpkg::PackageRef;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use parking_lot::Mutex;

const BAR_TEMPLATE: &str =
    "{spinner:.green} {prefix:40} [{bar:30.cyan/blue}] {bytes}/{total_bytes} {msg}";
const SPINNER_TEMPLATE: &str = "{spinner:.green} {prefix:40} {bytes} {msg}";

/// Cache listener drawing download progress bars.
pub struct ProgressListener {
    multi: MultiProgress,
    bars: Mutex<HashMap<PackageRef, ProgressBar>>,
}

impl ProgressListener {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        }
    }

    /// Hidden output, for non-interactive runs.
    pub fn hidden() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(indicatif::ProgressDrawTarget::hidden()),
            bars: Mutex::new(HashMap::new()),
        }
    }

    /// Marks every bar still drawn as finished.
    pub fn finish(&self) {
        for (_, bar) in self.bars.lock().drain() {
            bar.finish_with_message("done");
        }
    }

    /// Number of packages that started a download.
    pub fn downloads(&self) -> usize {
        self.bars.lock().len()
    }

    fn new_bar(&self, package: &PackageRef, total_bytes: Option<u64>) -> ProgressBar {
        let bar = match total_bytes {
            Some(total) => {
                let bar = ProgressBar::new(total);
                if let Ok(style) = ProgressStyle::with_template(BAR_TEMPLATE) {
                    bar.set_style(style.progress_chars("=> "));
                }
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                if let Ok(style) = ProgressStyle::with_template(SPINNER_TEMPLATE) {
                    bar.set_style(style);
                }
                bar
            }
        };
        bar.set_prefix(format!("{}@{}", package.name(), package.version()));
        bar.enable_steady_tick(Duration::from_millis(120));
        self.multi.add(bar)
    }
}

impl Default for ProgressListener {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheListener for ProgressListener {
    fn on_fetch(&self, package: &PackageRef, total_bytes: Option<u64>) {
        let bar = self.new_bar(package, total_bytes);
        bar.set_message("downloading");
        if let Some(old) = self.bars.lock().insert(package.clone(), bar) {
            old.finish_and_clear();
        }
    }

    fn on_fetch_write(&self, package: &PackageRef, bytes: usize) {
        if let Some(bar) = self.bars.lock().get(package) {
            bar.inc(bytes as u64);
        }
    }

    fn on_unpack(&self, package: &PackageRef, file: &str, _size: u64) {
        if let Some(bar) = self.bars.lock().get(package) {
            bar.set_message(file.to_string());
        }
    }

    fn on_cache_hit(&self, package: &PackageRef) {
        let _ = self.multi.println(format!("  cached  {package}"));
    }

    fn on_delete(&self, package: &PackageRef) {
        let _ = self.multi.println(format!("  deleted {package}"));
    }
}
