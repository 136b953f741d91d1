//! Common types and utilities shared across CLI commands.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use fhirpkg::cache::CacheListener;
use fhirpkg::registry::BearerToken;
use fhirpkg::{Cache, ConfigFile, HttpRegistryClient, PackageRef};

use crate::error::CliError;

/// Options shared by every command.
#[derive(Debug, Clone, Default, Args)]
pub struct GlobalArgs {
    /// Configuration file (default: platform config dir/fhirpkg/config.ini)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Cache directory, overriding the configuration file
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Registry to use, overriding [default] registry
    #[arg(long, short = 'r', global = true)]
    pub registry: Option<String>,

    /// Bearer token sent to registries
    #[arg(long, global = true)]
    pub token: Option<String>,
}

impl GlobalArgs {
    /// Load the config file and apply command-line overrides.
    pub fn load_config(&self) -> Result<ConfigFile, CliError> {
        let path = self.config.clone().unwrap_or_else(ConfigFile::default_path);
        let mut config = ConfigFile::load_from(&path)?;

        if let Some(dir) = &self.cache_dir {
            config.cache_dir = dir.clone();
        }
        if let Some(registry) = &self.registry {
            if !config.registries.contains_key(registry) {
                return Err(CliError::UnknownRegistry(registry.clone()));
            }
            config.default_registry = registry.clone();
        }
        Ok(config)
    }

    /// Build a cache with a client for every configured registry.
    pub fn build_cache(
        &self,
        config: &ConfigFile,
        listener: Option<Arc<dyn CacheListener>>,
    ) -> Result<Cache, CliError> {
        let mut cache = Cache::new(config.cache_config());

        for name in config.registries.keys() {
            let registry = config
                .registry_config(name)
                .ok_or_else(|| CliError::UnknownRegistry(name.clone()))?;
            let mut client = HttpRegistryClient::new(&registry)?;
            if let Some(token) = &self.token {
                client = client.with_credentials(Arc::new(BearerToken::new(token.clone())));
            }
            cache = cache.with_registry(name.clone(), Arc::new(client));
        }

        if let Some(listener) = listener {
            cache = cache.with_listener(listener);
        }
        Ok(cache)
    }
}

/// Parse a `name@version` argument in the given registry.
pub fn parse_package(registry: &str, spec: &str) -> Result<PackageRef, CliError> {
    PackageRef::parse(registry, spec).map_err(|source| CliError::InvalidPackage {
        spec: spec.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_package() {
        let package = parse_package("fhir", "hl7.fhir.r4.core@4.0.1").unwrap();
        assert_eq!(package.registry(), "fhir");
        assert_eq!(package.name(), "hl7.fhir.r4.core");
        assert_eq!(package.version(), "4.0.1");

        assert!(matches!(
            parse_package("fhir", "hl7.fhir.r4.core"),
            Err(CliError::InvalidPackage { .. })
        ));
    }

    #[test]
    fn test_overrides_apply() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");
        std::fs::write(
            &path,
            "[registries]\nsimplifier = https://packages.simplifier.net\n",
        )
        .unwrap();

        let args = GlobalArgs {
            config: Some(path),
            cache_dir: Some(temp.path().join("cache")),
            registry: Some("simplifier".to_string()),
            token: None,
        };
        let config = args.load_config().unwrap();
        assert_eq!(config.cache_dir, temp.path().join("cache"));
        assert_eq!(config.default_registry, "simplifier");

        let cache = args.build_cache(&config, None).unwrap();
        assert_eq!(cache.registries(), vec!["fhir", "simplifier"]);
    }

    #[test]
    fn test_unknown_registry_override() {
        let temp = TempDir::new().unwrap();
        let args = GlobalArgs {
            config: Some(temp.path().join("missing.ini")),
            registry: Some("nowhere".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            args.load_config(),
            Err(CliError::UnknownRegistry(name)) if name == "nowhere"
        ));
    }
}
