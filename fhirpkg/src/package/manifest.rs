//! Package manifest (`package.json`).

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur while loading a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The manifest file could not be read.
    #[error("failed to read manifest {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    /// The manifest is not valid JSON or is missing required fields.
    #[error("failed to parse manifest {origin}: {source}")]
    Parse {
        origin: String,
        source: serde_json::Error,
    },
}

/// Metadata describing a package: identity, dependencies and the FHIR
/// specific fields consumers care about.
///
/// Unknown fields are ignored so newer manifests keep loading.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Package name.
    pub name: String,

    /// Package version.
    pub version: String,

    /// Declared dependencies, package name to exact version.
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,

    /// FHIR releases the package targets, e.g. `["4.0.1"]`.
    #[serde(default)]
    pub fhir_versions: Vec<String>,

    /// Canonical base URL of the package content.
    #[serde(default)]
    pub canonical: Option<String>,

    /// Web location of the published package.
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Package kind, e.g. `fhir.core` or `IG`.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

impl Manifest {
    /// Parses a manifest from raw bytes.
    ///
    /// `origin` names the source in error messages.
    pub fn from_slice(bytes: &[u8], origin: &str) -> Result<Self, ManifestError> {
        serde_json::from_slice(bytes).map_err(|source| ManifestError::Parse {
            origin: origin.to_string(),
            source,
        })
    }

    /// Loads a manifest from a file.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let bytes = fs::read(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_slice(&bytes, &path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const US_CORE: &str = r#"{
        "name": "hl7.fhir.us.core",
        "version": "6.1.0",
        "canonical": "http://hl7.org/fhir/us/core",
        "fhirVersions": ["4.0.1"],
        "type": "IG",
        "dependencies": {
            "hl7.fhir.r4.core": "4.0.1",
            "hl7.terminology.r4": "5.0.0"
        },
        "maintainers": [{"name": "HL7"}],
        "jurisdiction": "urn:iso:std:iso:3166#US"
    }"#;

    #[test]
    fn test_parse_full_manifest() {
        let manifest = Manifest::from_slice(US_CORE.as_bytes(), "test").unwrap();
        assert_eq!(manifest.name, "hl7.fhir.us.core");
        assert_eq!(manifest.version, "6.1.0");
        assert_eq!(manifest.fhir_versions, vec!["4.0.1"]);
        assert_eq!(manifest.kind.as_deref(), Some("IG"));
        assert_eq!(manifest.dependencies.len(), 2);
        assert_eq!(
            manifest.dependencies.get("hl7.fhir.r4.core").map(String::as_str),
            Some("4.0.1")
        );
    }

    #[test]
    fn test_parse_minimal_manifest() {
        let manifest =
            Manifest::from_slice(br#"{"name": "leaf", "version": "1.0.0"}"#, "test").unwrap();
        assert!(manifest.dependencies.is_empty());
        assert!(manifest.fhir_versions.is_empty());
        assert!(manifest.canonical.is_none());
    }

    #[test]
    fn test_parse_rejects_missing_name() {
        let err = Manifest::from_slice(br#"{"version": "1.0.0"}"#, "broken.json").unwrap_err();
        assert!(err.to_string().contains("broken.json"));
    }

    #[test]
    fn test_load_from_disk() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("package.json");
        fs::write(&path, US_CORE).unwrap();

        let manifest = Manifest::load(&path).unwrap();
        assert_eq!(manifest.name, "hl7.fhir.us.core");
    }

    #[test]
    fn test_load_missing_file() {
        let temp = TempDir::new().unwrap();
        let err = Manifest::load(&temp.path().join("package.json")).unwrap_err();
        assert!(matches!(err, ManifestError::Read { .. }));
    }
}
