//! Configuration for the package cache.

use std::path::PathBuf;

/// Manifest file name inside every FHIR package.
pub const DEFAULT_MANIFEST_FILE: &str = "package.json";

/// Raw archive kept in each entry. Its presence marks the entry complete.
pub const ARCHIVE_FILE: &str = "package.tgz";

/// Conformance resource files retained from package archives, by name prefix.
pub const DEFAULT_RESOURCE_PREFIXES: &[&str] = &[
    "CapabilityStatement-",
    "CodeSystem-",
    "CompartmentDefinition-",
    "ConceptMap-",
    "ImplementationGuide-",
    "NamingSystem-",
    "OperationDefinition-",
    "SearchParameter-",
    "StructureDefinition-",
    "StructureMap-",
    "ValueSet-",
];

/// Sidecar files never extracted.
pub const DEFAULT_SKIP_FILES: &[&str] = &[".index.json"];

/// Configuration for the package cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Root directory; entries live at `<root>/<registry>/<name>/<version>`.
    pub root: PathBuf,

    /// Manifest file name, always extracted.
    pub manifest_file: String,

    /// Name prefixes of resource files to extract.
    pub resource_prefixes: Vec<String>,

    /// File names skipped even when a prefix matches.
    pub skip_files: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new(Self::default_root())
    }
}

impl CacheConfig {
    /// Create a configuration rooted at `root` with the FHIR defaults.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            manifest_file: DEFAULT_MANIFEST_FILE.to_string(),
            resource_prefixes: DEFAULT_RESOURCE_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
            skip_files: DEFAULT_SKIP_FILES.iter().map(|f| f.to_string()).collect(),
        }
    }

    /// Platform cache location, e.g. `~/.cache/fhirpkg/packages` on Linux.
    pub fn default_root() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("fhirpkg")
            .join("packages")
    }

    /// Set the manifest file name.
    pub fn with_manifest_file(mut self, name: impl Into<String>) -> Self {
        self.manifest_file = name.into();
        self
    }

    /// Replace the retained resource prefixes.
    pub fn with_resource_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resource_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    /// Add a file name to skip.
    pub fn with_skip_file(mut self, name: impl Into<String>) -> Self {
        self.skip_files.push(name.into());
        self
    }

    /// Build the extraction filter for this configuration.
    pub(crate) fn entry_filter(&self) -> EntryFilter {
        EntryFilter {
            manifest_file: self.manifest_file.clone(),
            resource_prefixes: self.resource_prefixes.clone(),
            skip_files: self.skip_files.clone(),
        }
    }
}

/// Decides which archive entries land in a cache entry and under what name.
///
/// Package archives wrap their content in a single top-level directory
/// (`package/`). The filter looks at the name below that directory: it must be
/// a single path segment, not a skip file, and either the manifest or a file
/// with a resource prefix. Entries kept are stored under that segment.
#[derive(Debug, Clone)]
pub(crate) struct EntryFilter {
    manifest_file: String,
    resource_prefixes: Vec<String>,
    skip_files: Vec<String>,
}

impl EntryFilter {
    pub(crate) fn accepts(&self, original: &str) -> bool {
        let name = relative_name(original);
        if name.is_empty() || name.contains('/') {
            return false;
        }
        if self.skip_files.iter().any(|skip| skip == name) {
            return false;
        }
        name == self.manifest_file
            || self
                .resource_prefixes
                .iter()
                .any(|prefix| name.starts_with(prefix.as_str()))
    }

    pub(crate) fn rename(&self, original: &str) -> String {
        relative_name(original).to_string()
    }
}

/// Strips the leading directory of an archive entry name.
///
/// `package/ValueSet-x.json` becomes `ValueSet-x.json`; names already at the
/// top level are returned unchanged.
pub(crate) fn relative_name(original: &str) -> &str {
    let trimmed = original.trim_start_matches("./");
    match trimmed.split_once('/') {
        Some((_, rest)) => rest,
        None => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::new("/tmp/fhir");
        assert_eq!(config.root, PathBuf::from("/tmp/fhir"));
        assert_eq!(config.manifest_file, "package.json");
        assert!(config
            .resource_prefixes
            .iter()
            .any(|p| p == "StructureDefinition-"));
        assert_eq!(config.skip_files, vec![".index.json".to_string()]);
    }

    #[test]
    fn test_builder_pattern() {
        let config = CacheConfig::new("/tmp/fhir")
            .with_manifest_file("manifest.json")
            .with_resource_prefixes(["Resource-"])
            .with_skip_file("README.md");

        assert_eq!(config.manifest_file, "manifest.json");
        assert_eq!(config.resource_prefixes, vec!["Resource-".to_string()]);
        assert_eq!(config.skip_files.len(), 2);
    }

    #[test]
    fn test_default_root_location() {
        let root = CacheConfig::default_root();
        assert!(root.ends_with("fhirpkg/packages"));
    }

    #[test]
    fn test_relative_name() {
        assert_eq!(relative_name("package/package.json"), "package.json");
        assert_eq!(relative_name("./package/ValueSet-a.json"), "ValueSet-a.json");
        assert_eq!(relative_name("package/other/x.json"), "other/x.json");
        assert_eq!(relative_name("package.json"), "package.json");
        assert_eq!(relative_name("package/"), "");
    }

    #[test]
    fn test_filter_keeps_manifest_and_resources() {
        let filter = CacheConfig::new("/tmp")
            .with_resource_prefixes(["Resource-"])
            .entry_filter();

        assert!(filter.accepts("pkg/package.json"));
        assert!(filter.accepts("pkg/Resource-foo.json"));
        assert!(!filter.accepts("pkg/subdir/ignored.json"));
        assert!(!filter.accepts("pkg/.index.json"));
        assert!(!filter.accepts("pkg/README.md"));
        assert!(!filter.accepts("pkg/"));

        assert_eq!(filter.rename("pkg/Resource-foo.json"), "Resource-foo.json");
    }

    #[test]
    fn test_skip_files_win_over_prefixes() {
        let filter = CacheConfig::new("/tmp")
            .with_resource_prefixes(["."])
            .entry_filter();
        assert!(!filter.accepts("package/.index.json"));
        assert!(filter.accepts("package/.other.json"));
    }

    #[test]
    fn test_nested_resource_dirs_are_dropped() {
        let filter = CacheConfig::new("/tmp").entry_filter();
        assert!(filter.accepts("package/ValueSet-a.json"));
        assert!(!filter.accepts("package/examples/ValueSet-a.json"));
        assert!(!filter.accepts("package/other/package.json"));
    }
}
