//! Package identity, manifests and cached package views.
//!
//! - [`PackageRef`]: `(registry, name, version)` identity used as the cache key
//! - [`Manifest`]: the `package.json` found inside every package
//! - [`Package`]: a read-only view over one complete cache entry

mod manifest;
mod reference;
mod view;

pub use manifest::{Manifest, ManifestError};
pub use reference::{PackageRef, PackageRefError};
pub use view::Package;
