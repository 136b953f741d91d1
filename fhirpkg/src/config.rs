//! Configuration file handling for `config.ini`.
//!
//! ```ini
//! [cache]
//! directory = ~/.cache/fhirpkg/packages
//!
//! [download]
//! workers = 8
//! force = false
//! timeout = 300
//!
//! [registries]
//! fhir = https://packages.fhir.org
//! simplifier = https://packages.simplifier.net
//!
//! [default]
//! registry = fhir
//! ```
//!
//! Every key is optional; anything missing keeps its default. A missing file
//! yields the defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use crate::cache::CacheConfig;
use crate::registry::{RegistryConfig, DEFAULT_REGISTRY_URL};

/// Name of the registry configured out of the box.
pub const DEFAULT_REGISTRY_NAME: &str = "fhir";

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read or parsed.
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },

    /// Inline configuration text could not be parsed.
    #[error("failed to parse config: {0}")]
    Parse(#[from] ini::ParseError),

    /// A value is present but unusable.
    #[error("invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

/// Settings loaded from `config.ini`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    /// Cache root directory.
    pub cache_dir: PathBuf,

    /// Concurrent fetches; zero means one per CPU.
    pub workers: usize,

    /// Re-download cached packages.
    pub force: bool,

    /// Registry request timeout.
    pub timeout: Duration,

    /// Registry name to base URL.
    pub registries: BTreeMap<String, String>,

    /// Registry used when a command names none.
    pub default_registry: String,
}

impl Default for ConfigFile {
    fn default() -> Self {
        let mut registries = BTreeMap::new();
        registries.insert(
            DEFAULT_REGISTRY_NAME.to_string(),
            DEFAULT_REGISTRY_URL.to_string(),
        );

        Self {
            cache_dir: CacheConfig::default_root(),
            workers: 0,
            force: false,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            registries,
            default_registry: DEFAULT_REGISTRY_NAME.to_string(),
        }
    }
}

impl ConfigFile {
    /// Default location, e.g. `~/.config/fhirpkg/config.ini` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fhirpkg")
            .join("config.ini")
    }

    /// Load configuration from a specific path.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        parse_ini(&ini)
    }

    /// Parse configuration from INI text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text)?;
        parse_ini(&ini)
    }

    /// Cache settings for the configured directory.
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new(&self.cache_dir)
    }

    /// Connection settings for a configured registry.
    pub fn registry_config(&self, name: &str) -> Option<RegistryConfig> {
        self.registries
            .get(name)
            .map(|url| RegistryConfig::new(url.clone()).with_timeout(self.timeout))
    }
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Starts from the defaults and overlays any values found in the INI.
fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigError> {
    let mut config = ConfigFile::default();

    // [cache]
    if let Some(section) = ini.section(Some("cache")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.cache_dir = expand_tilde(v);
            }
        }
    }

    // [download]
    if let Some(section) = ini.section(Some("download")) {
        if let Some(v) = section.get("workers") {
            config.workers = v
                .trim()
                .parse()
                .map_err(|_| invalid("download", "workers", v, "must be a non-negative integer"))?;
        }
        if let Some(v) = section.get("force") {
            config.force = parse_bool(v)
                .ok_or_else(|| invalid("download", "force", v, "must be true or false"))?;
        }
        if let Some(v) = section.get("timeout") {
            let secs: u64 = v.trim().parse().map_err(|_| {
                invalid("download", "timeout", v, "must be a positive integer (seconds)")
            })?;
            if secs == 0 {
                return Err(invalid(
                    "download",
                    "timeout",
                    v,
                    "must be a positive integer (seconds)",
                ));
            }
            config.timeout = Duration::from_secs(secs);
        }
    }

    // [registries]
    if let Some(section) = ini.section(Some("registries")) {
        for (name, url) in section.iter() {
            let url = url.trim();
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(invalid("registries", name, url, "must be an http(s) URL"));
            }
            config.registries.insert(name.to_string(), url.to_string());
        }
    }

    // [default]
    if let Some(section) = ini.section(Some("default")) {
        if let Some(v) = section.get("registry") {
            config.default_registry = v.trim().to_string();
        }
    }

    if !config.registries.contains_key(&config.default_registry) {
        return Err(invalid(
            "default",
            "registry",
            &config.default_registry,
            "not listed in [registries]",
        ));
    }

    Ok(config)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = ConfigFile::default();
        assert_eq!(config.workers, 0);
        assert!(!config.force);
        assert_eq!(config.default_registry, "fhir");
        assert_eq!(
            config.registries.get("fhir").map(String::as_str),
            Some(DEFAULT_REGISTRY_URL)
        );
        assert_eq!(config.cache_dir, CacheConfig::default_root());
    }

    #[test]
    fn test_load_nonexistent_returns_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = ConfigFile::load_from(&temp_dir.path().join("missing.ini")).unwrap();
        assert_eq!(config, ConfigFile::default());
    }

    #[test]
    fn test_load_full_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.ini");
        std::fs::write(
            &path,
            "[cache]\n\
             directory = /srv/fhir\n\
             [download]\n\
             workers = 8\n\
             force = yes\n\
             timeout = 30\n\
             [registries]\n\
             simplifier = https://packages.simplifier.net\n\
             [default]\n\
             registry = simplifier\n",
        )
        .unwrap();

        let config = ConfigFile::load_from(&path).unwrap();
        assert_eq!(config.cache_dir, PathBuf::from("/srv/fhir"));
        assert_eq!(config.workers, 8);
        assert!(config.force);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.registries.len(), 2);
        assert_eq!(config.default_registry, "simplifier");

        let registry = config.registry_config("simplifier").unwrap();
        assert_eq!(registry.base_url, "https://packages.simplifier.net");
        assert_eq!(registry.timeout, Duration::from_secs(30));
        assert!(config.registry_config("unknown").is_none());
        assert_eq!(config.cache_config().root, PathBuf::from("/srv/fhir"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = ConfigFile::parse("[download]\nworkers = 2\n").unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.default_registry, "fhir");
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
    }

    #[test]
    fn test_tilde_expansion() {
        let config = ConfigFile::parse("[cache]\ndirectory = ~/fhir-cache\n").unwrap();
        if let Some(home) = dirs::home_dir() {
            assert_eq!(config.cache_dir, home.join("fhir-cache"));
        }
    }

    #[test]
    fn test_invalid_values() {
        let err = ConfigFile::parse("[download]\nworkers = many\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "workers"));

        let err = ConfigFile::parse("[download]\nforce = maybe\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "force"));

        let err = ConfigFile::parse("[download]\ntimeout = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "timeout"));

        let err = ConfigFile::parse("[registries]\nlocal = /tmp/registry\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref section, .. } if section == "registries"));
    }

    #[test]
    fn test_default_registry_must_exist() {
        let err = ConfigFile::parse("[default]\nregistry = nowhere\n").unwrap_err();
        assert!(err.to_string().contains("nowhere"));
    }

    #[test]
    fn test_default_path() {
        assert!(ConfigFile::default_path().ends_with("fhirpkg/config.ini"));
    }
}
