//! Shared fixtures for unit tests.

use std::collections::HashMap;
use std::io::Cursor;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::archive::tests::tgz_bytes;
use crate::registry::{FetchedArchive, RegistryClient, RegistryError, RegistryResult};

/// Builds a package tarball with a manifest declaring `deps`, plus one
/// `StructureDefinition-<name>.json` resource and the sidecar files a real
/// package carries.
pub(crate) fn package_tgz(name: &str, version: &str, deps: &[(&str, &str)]) -> Vec<u8> {
    let dependencies = deps
        .iter()
        .map(|(n, v)| format!("\"{n}\":\"{v}\""))
        .collect::<Vec<_>>()
        .join(",");
    let manifest = format!(
        r#"{{"name":"{name}","version":"{version}","fhirVersions":["4.0.1"],"dependencies":{{{dependencies}}}}}"#
    );
    let resource = format!("package/StructureDefinition-{name}.json");

    tgz_bytes(&[
        ("package/package.json", manifest.as_bytes()),
        (resource.as_str(), b"{\"resourceType\":\"StructureDefinition\"}"),
        ("package/.index.json", b"{\"files\":[]}"),
        ("package/other/spec.internals", b"ignored"),
    ])
}

/// In-memory registry serving canned archives and counting requests.
#[derive(Default)]
pub(crate) struct StubRegistry {
    archives: Mutex<HashMap<(String, String), Vec<u8>>>,
    hits: Mutex<HashMap<(String, String), usize>>,
    delay: Option<Duration>,
}

impl StubRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Sleep this long in every fetch, widening race windows.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn serve(&self, name: &str, version: &str, archive: Vec<u8>) {
        self.archives
            .lock()
            .insert((name.to_string(), version.to_string()), archive);
    }

    /// Serves a generated package archive.
    pub(crate) fn serve_package(&self, name: &str, version: &str, deps: &[(&str, &str)]) {
        self.serve(name, version, package_tgz(name, version, deps));
    }

    pub(crate) fn hits(&self, name: &str, version: &str) -> usize {
        self.hits
            .lock()
            .get(&(name.to_string(), version.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn total_hits(&self) -> usize {
        self.hits.lock().values().sum()
    }
}

impl RegistryClient for StubRegistry {
    fn fetch(
        &self,
        cancel: &CancellationToken,
        name: &str,
        version: &str,
    ) -> RegistryResult<FetchedArchive> {
        if cancel.is_cancelled() {
            return Err(RegistryError::Cancelled);
        }

        let key = (name.to_string(), version.to_string());
        *self.hits.lock().entry(key.clone()).or_insert(0) += 1;

        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }

        let archive = self.archives.lock().get(&key).cloned();
        match archive {
            Some(bytes) => {
                let len = bytes.len() as u64;
                Ok(FetchedArchive::new(Cursor::new(bytes), Some(len)))
            }
            None => Err(RegistryError::StatusCode {
                url: format!("stub:///{name}/{version}"),
                status: 404,
            }),
        }
    }
}
