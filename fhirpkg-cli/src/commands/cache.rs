//! Cache management CLI commands.

use clap::Subcommand;

use super::common::{parse_package, GlobalArgs};
use crate::error::CliError;

/// Cache action subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// List cached packages
    List,

    /// Print the cache directory, or the entry directory of a package
    Path {
        /// Package as name@version
        package: Option<String>,
    },

    /// Show the manifest and resource files of a cached package
    Info {
        /// Package as name@version
        package: String,

        /// Also list the resource files
        #[arg(long, short = 'l')]
        files: bool,
    },

    /// Remove packages from the cache
    Delete {
        /// Packages as name@version
        #[arg(required = true)]
        packages: Vec<String>,
    },
}

/// Run a cache subcommand.
pub fn run(action: CacheAction, global: &GlobalArgs) -> Result<(), CliError> {
    let config = global.load_config()?;
    let cache = global.build_cache(&config, None)?;
    let registry = config.default_registry.as_str();

    match action {
        CacheAction::List => {
            let packages = cache.list()?;
            if packages.is_empty() {
                println!("No packages cached in {}", cache.root().display());
            }
            for package in packages {
                println!("{package}");
            }
        }
        CacheAction::Path { package: None } => {
            println!("{}", cache.root().display());
        }
        CacheAction::Path {
            package: Some(spec),
        } => {
            let package = parse_package(registry, &spec)?;
            println!("{}", cache.path(&package)?.display());
        }
        CacheAction::Info {
            package,
            files: list_files,
        } => {
            let package = cache.get(&parse_package(registry, &package)?)?;
            let manifest = package.manifest();

            println!("{}", package.reference());
            println!("  Name:         {}", manifest.name);
            println!("  Version:      {}", manifest.version);
            if let Some(title) = &manifest.title {
                println!("  Title:        {}", title);
            }
            if let Some(canonical) = &manifest.canonical {
                println!("  Canonical:    {}", canonical);
            }
            if !manifest.fhir_versions.is_empty() {
                println!("  FHIR:         {}", manifest.fhir_versions.join(", "));
            }
            println!("  Directory:    {}", package.dir().display());

            let files = package
                .files()
                .map_err(|e| fhirpkg::CacheError::Io {
                    path: package.dir().to_path_buf(),
                    source: e,
                })?;
            println!("  Resources:    {}", files.len());

            if !package.dependencies().is_empty() {
                println!("  Dependencies:");
                for (name, version) in package.dependencies() {
                    println!("    {name}@{version}");
                }
            }
            if list_files {
                println!("  Files:");
                for file in files {
                    println!("    {}", file.display());
                }
            }
        }
        CacheAction::Delete { packages } => {
            for spec in packages {
                let package = parse_package(registry, &spec)?;
                if !cache.has(&package) {
                    println!("{package} is not cached");
                    continue;
                }
                cache.delete(&package)?;
                println!("Deleted {package}");
            }
        }
    }
    Ok(())
}
