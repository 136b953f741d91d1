//! Read-only view over one cache entry.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::manifest::{Manifest, ManifestError};
use super::reference::PackageRef;

/// A cached package.
///
/// Built by the cache from an entry directory. The manifest accessors return
/// a snapshot taken by [`open`](Self::open) or the last
/// [`reload`](Self::reload); a `Package` held across a `force_fetch` keeps
/// the old manifest until reloaded. [`files`](Self::files) lists the
/// directory on every call.
#[derive(Debug, Clone)]
pub struct Package {
    reference: PackageRef,
    dir: PathBuf,
    manifest_file: String,
    archive_file: String,
    manifest: Manifest,
}

impl Package {
    /// Opens the entry at `dir`, reading `<dir>/<manifest_file>`.
    pub fn open(
        reference: PackageRef,
        dir: PathBuf,
        manifest_file: &str,
        archive_file: &str,
    ) -> Result<Self, ManifestError> {
        let manifest = Manifest::load(&dir.join(manifest_file))?;
        Ok(Self {
            reference,
            dir,
            manifest_file: manifest_file.to_string(),
            archive_file: archive_file.to_string(),
            manifest,
        })
    }

    /// Re-reads the manifest from the entry directory.
    pub fn reload(&mut self) -> Result<(), ManifestError> {
        self.manifest = Manifest::load(&self.manifest_path())?;
        Ok(())
    }

    pub fn reference(&self) -> &PackageRef {
        &self.reference
    }

    /// Name declared by the manifest.
    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    /// Version declared by the manifest.
    pub fn version(&self) -> &str {
        &self.manifest.version
    }

    /// FHIR releases this package targets.
    pub fn fhir_versions(&self) -> &[String] {
        &self.manifest.fhir_versions
    }

    /// Declared dependencies, name to version.
    pub fn dependencies(&self) -> &BTreeMap<String, String> {
        &self.manifest.dependencies
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// The entry directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(&self.manifest_file)
    }

    /// Path of the raw archive kept alongside the extracted files.
    pub fn archive_path(&self) -> PathBuf {
        self.dir.join(&self.archive_file)
    }

    /// Extracted resource files, sorted by path.
    ///
    /// The manifest and the raw archive are not resources and are left out.
    pub fn files(&self) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == self.manifest_file.as_str() || name == self.archive_file.as_str() {
                continue;
            }
            files.push(entry.path());
        }
        files.sort();
        Ok(files)
    }
}
