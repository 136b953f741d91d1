//! Package identity.
//!
//! A [`PackageRef`] names one fetchable unit: a package version published in a
//! registry. It is the key for everything keyed by package (cache entries,
//! the downloader's visited set, per-entry locks), and each component also
//! becomes a cache path segment, so construction validates the components.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors raised when a package reference is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PackageRefError {
    /// A component was empty.
    #[error("package {field} must not be empty")]
    Empty { field: &'static str },

    /// A component cannot be used as a single path segment.
    #[error("package {field} {value:?} is not a valid path segment")]
    InvalidSegment { field: &'static str, value: String },

    /// A `name@version` spec was missing the `@version` part.
    #[error("expected <name>@<version>, got {0:?}")]
    MissingVersion(String),
}

/// Identity of a package version in a registry.
///
/// Equality and hashing are structural over `(registry, name, version)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageRef {
    registry: String,
    name: String,
    version: String,
}

impl PackageRef {
    /// Creates a validated package reference.
    pub fn new(
        registry: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Result<Self, PackageRefError> {
        let registry = registry.into();
        let name = name.into();
        let version = version.into();

        validate_segment("registry", &registry)?;
        validate_segment("name", &name)?;
        validate_segment("version", &version)?;

        Ok(Self {
            registry,
            name,
            version,
        })
    }

    /// Parses a `name@version` spec within the given registry.
    pub fn parse(registry: impl Into<String>, spec: &str) -> Result<Self, PackageRefError> {
        let (name, version) = spec
            .rsplit_once('@')
            .ok_or_else(|| PackageRefError::MissingVersion(spec.to_string()))?;
        Self::new(registry, name, version)
    }

    /// The registry this package is published in.
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// The package name, e.g. `hl7.fhir.r4.core`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The package version, e.g. `4.0.1`.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns a reference to another version in the same registry.
    ///
    /// Used for dependencies, which are declared by name and version only.
    pub fn sibling(&self, name: &str, version: &str) -> Result<Self, PackageRefError> {
        Self::new(self.registry.clone(), name, version)
    }

    /// The entry directory for this package beneath a cache root:
    /// `<root>/<registry>/<name>/<version>`.
    pub fn entry_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.registry)
            .join(&self.name)
            .join(&self.version)
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.registry, self.name, self.version)
    }
}

fn validate_segment(field: &'static str, value: &str) -> Result<(), PackageRefError> {
    if value.is_empty() {
        return Err(PackageRefError::Empty { field });
    }

    let invalid = value == "."
        || value == ".."
        || value.contains('/')
        || value.contains('\\')
        || value.contains('\0');

    if invalid {
        return Err(PackageRefError::InvalidSegment {
            field,
            value: value.to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_new_and_accessors() {
        let r = PackageRef::new("packages.fhir.org", "hl7.fhir.r4.core", "4.0.1").unwrap();
        assert_eq!(r.registry(), "packages.fhir.org");
        assert_eq!(r.name(), "hl7.fhir.r4.core");
        assert_eq!(r.version(), "4.0.1");
        assert_eq!(r.to_string(), "packages.fhir.org/hl7.fhir.r4.core@4.0.1");
    }

    #[test]
    fn test_structural_equality() {
        let a = PackageRef::new("r", "leaf", "1.0.0").unwrap();
        let b = PackageRef::new("r", "leaf", "1.0.0").unwrap();
        let c = PackageRef::new("r", "leaf", "1.0.1").unwrap();

        let set: HashSet<_> = [a.clone(), b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert!(set.contains(&a));
    }

    #[test]
    fn test_rejects_empty_components() {
        assert_eq!(
            PackageRef::new("", "a", "1").unwrap_err(),
            PackageRefError::Empty { field: "registry" }
        );
        assert_eq!(
            PackageRef::new("r", "a", "").unwrap_err(),
            PackageRefError::Empty { field: "version" }
        );
    }

    #[test]
    fn test_rejects_path_escapes() {
        assert!(PackageRef::new("r", "..", "1").is_err());
        assert!(PackageRef::new("r", "a/b", "1").is_err());
        assert!(PackageRef::new("r", "a", "..\\x").is_err());
    }

    #[test]
    fn test_parse_spec() {
        let r = PackageRef::parse("r", "hl7.fhir.us.core@6.1.0").unwrap();
        assert_eq!(r.name(), "hl7.fhir.us.core");
        assert_eq!(r.version(), "6.1.0");

        assert_eq!(
            PackageRef::parse("r", "hl7.fhir.us.core").unwrap_err(),
            PackageRefError::MissingVersion("hl7.fhir.us.core".to_string())
        );
    }

    #[test]
    fn test_entry_dir_layout() {
        let r = PackageRef::new("r", "leaf", "1.0.0").unwrap();
        assert_eq!(
            r.entry_dir(Path::new("/cache")),
            PathBuf::from("/cache/r/leaf/1.0.0")
        );
    }

    #[test]
    fn test_sibling_keeps_registry() {
        let r = PackageRef::new("r", "dependent", "1.0.0").unwrap();
        let dep = r.sibling("leaf", "2.0.0").unwrap();
        assert_eq!(dep.registry(), "r");
        assert_eq!(dep.name(), "leaf");
    }

    proptest! {
        #[test]
        fn prop_valid_refs_stay_under_root(
            name in "[a-z][a-z0-9.\\-]{0,20}",
            version in "[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}(-[a-z]{1,6})?",
        ) {
            let r = PackageRef::new("reg", name.clone(), version.clone()).unwrap();
            let root = Path::new("/cache");
            let dir = r.entry_dir(root);
            prop_assert!(dir.starts_with(root));
            prop_assert_eq!(dir.components().count(), root.components().count() + 3);
        }

        #[test]
        fn prop_parse_roundtrips_display_spec(
            name in "[a-z][a-z0-9.]{0,20}",
            version in "[0-9]{1,2}\\.[0-9]{1,2}\\.[0-9]{1,2}",
        ) {
            let spec = format!("{}@{}", name, version);
            let r = PackageRef::parse("reg", &spec).unwrap();
            prop_assert_eq!(r.name(), name.as_str());
            prop_assert_eq!(r.version(), version.as_str());
        }

        #[test]
        fn prop_separators_are_rejected(
            left in "[a-z]{1,8}",
            right in "[a-z]{1,8}",
        ) {
            let name = format!("{}/{}", left, right);
            prop_assert!(PackageRef::new("reg", name, "1.0.0").is_err());
        }
    }
}
