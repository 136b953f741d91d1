//! HTTP registry client.

use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::CONTENT_TYPE;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::auth::{Credentials, NoCredentials};
use super::error::{RegistryError, RegistryResult};
use super::{FetchedArchive, RegistryClient};

/// The public FHIR package registry.
pub const DEFAULT_REGISTRY_URL: &str = "https://packages.fhir.org";

/// Default timeout for a whole request in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 300; // 5 minutes

/// Default timeout for establishing a connection in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Media types served for the archive itself.
const ARCHIVE_MEDIA_TYPES: &[&str] = &[
    "application/tar",
    "application/x-tar",
    "application/tar+gzip",
    "application/x-tar+gzip",
    "application/gzip",
    "application/x-gzip",
    "application/x-compressed-tar",
];

/// Connection settings for an HTTP registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Base URL; packages live at `<base_url>/<name>/<version>`.
    pub base_url: String,

    /// Timeout for a whole request, body included.
    pub timeout: Duration,

    pub connect_timeout: Duration,

    /// `User-Agent` header sent with every request.
    pub user_agent: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::new(DEFAULT_REGISTRY_URL)
    }
}

impl RegistryConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            user_agent: format!("fhirpkg/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// JSON shape of an indirect response. Both a top-level `tarball` and the
/// npm-style `dist.tarball` are understood.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    tarball: Option<String>,
    #[serde(default)]
    dist: Option<Dist>,
}

#[derive(Debug, Deserialize)]
struct Dist {
    #[serde(default)]
    tarball: Option<String>,
}

impl Envelope {
    fn tarball(self) -> Option<String> {
        self.tarball
            .or_else(|| self.dist.and_then(|d| d.tarball))
            .filter(|t| !t.trim().is_empty())
    }
}

/// What the registry answered with.
#[derive(Debug, PartialEq, Eq)]
enum ResponseShape {
    Archive,
    Json,
    Other(String),
}

fn classify(content_type: &str) -> ResponseShape {
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    if ARCHIVE_MEDIA_TYPES.contains(&media_type.as_str()) {
        ResponseShape::Archive
    } else if media_type == "application/json" || media_type.ends_with("+json") {
        ResponseShape::Json
    } else {
        ResponseShape::Other(content_type.to_string())
    }
}

/// Registry client speaking HTTP via `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpRegistryClient {
    client: Client,
    base_url: Url,
    credentials: Arc<dyn Credentials>,
}

impl HttpRegistryClient {
    /// Create a client for the registry described by `config`.
    pub fn new(config: &RegistryConfig) -> RegistryResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        Self::with_client(client, &config.base_url)
    }

    /// Create a client over a caller-supplied transport.
    pub fn with_client(client: Client, base_url: &str) -> RegistryResult<Self> {
        let base_url = Url::parse(base_url).map_err(|e| RegistryError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(RegistryError::InvalidUrl {
                url: base_url.to_string(),
                reason: "URL cannot be a base".to_string(),
            });
        }

        Ok(Self {
            client,
            base_url,
            credentials: Arc::new(NoCredentials),
        })
    }

    /// Attach credentials to registry requests.
    pub fn with_credentials(mut self, credentials: Arc<dyn Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `<base_url>/<name>/<version>`, each segment percent-encoded.
    pub fn package_url(&self, name: &str, version: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(name).push(version);
        }
        url
    }

    fn get(&self, cancel: &CancellationToken, url: &Url) -> RegistryResult<Response> {
        if cancel.is_cancelled() {
            return Err(RegistryError::Cancelled);
        }

        let mut request = self.client.get(url.clone());
        if url.origin() == self.base_url.origin() {
            request = self.credentials.apply(request);
        }

        let response = request.send()?;
        if response.status() != StatusCode::OK {
            return Err(RegistryError::StatusCode {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }

    /// Reads a JSON envelope and resolves its tarball location.
    fn tarball_location(&self, url: &Url, response: Response) -> RegistryResult<Url> {
        let body = response.bytes()?;
        let envelope: Envelope =
            serde_json::from_slice(&body).map_err(|e| RegistryError::BadContent {
                url: url.to_string(),
                reason: format!("invalid JSON: {}", e),
            })?;

        let tarball = envelope.tarball().ok_or_else(|| RegistryError::BadContent {
            url: url.to_string(),
            reason: "no tarball location in response".to_string(),
        })?;

        url.join(&tarball).map_err(|e| RegistryError::BadContent {
            url: url.to_string(),
            reason: format!("invalid tarball location {:?}: {}", tarball, e),
        })
    }
}

impl RegistryClient for HttpRegistryClient {
    fn fetch(
        &self,
        cancel: &CancellationToken,
        name: &str,
        version: &str,
    ) -> RegistryResult<FetchedArchive> {
        let url = self.package_url(name, version);
        debug!(url = %url, "requesting package");

        let response = self.get(cancel, &url)?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        match classify(&content_type) {
            ResponseShape::Archive => {
                let length = response.content_length();
                Ok(FetchedArchive::new(response, length))
            }
            ResponseShape::Json => {
                let tarball = self.tarball_location(&url, response)?;
                debug!(url = %url, tarball = %tarball, "following tarball location");
                let response = self.get(cancel, &tarball)?;
                let length = response.content_length();
                Ok(FetchedArchive::new(response, length))
            }
            ResponseShape::Other(content_type) => Err(RegistryError::BadContentType {
                url: url.to_string(),
                content_type,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::BearerToken;
    use httpmock::MockServer;
    use std::io::Read;

    fn client(server: &MockServer) -> HttpRegistryClient {
        HttpRegistryClient::new(&RegistryConfig::new(server.base_url())).unwrap()
    }

    fn read_all(archive: FetchedArchive) -> Vec<u8> {
        let mut body = Vec::new();
        let mut reader = archive.body;
        reader.read_to_end(&mut body).unwrap();
        body
    }

    #[test]
    fn test_classify_media_types() {
        assert_eq!(classify("application/tar+gzip"), ResponseShape::Archive);
        assert_eq!(classify("application/x-tar"), ResponseShape::Archive);
        assert_eq!(classify("Application/GZIP; charset=binary"), ResponseShape::Archive);
        assert_eq!(classify("application/json; charset=utf-8"), ResponseShape::Json);
        assert_eq!(classify("application/vnd.npm.install-v1+json"), ResponseShape::Json);
        assert_eq!(
            classify("text/html"),
            ResponseShape::Other("text/html".to_string())
        );
        assert_eq!(classify(""), ResponseShape::Other(String::new()));
    }

    #[test]
    fn test_package_url_encodes_segments() {
        let client = HttpRegistryClient::with_client(
            Client::new(),
            "https://registry.example.org/fhir/",
        )
        .unwrap();
        assert_eq!(
            client.package_url("hl7.fhir.r4.core", "4.0.1").as_str(),
            "https://registry.example.org/fhir/hl7.fhir.r4.core/4.0.1"
        );
        assert_eq!(
            client.package_url("a b", "1.0.0").as_str(),
            "https://registry.example.org/fhir/a%20b/1.0.0"
        );
    }

    #[test]
    fn test_rejects_unusable_base_url() {
        assert!(matches!(
            HttpRegistryClient::with_client(Client::new(), "not a url"),
            Err(RegistryError::InvalidUrl { .. })
        ));
        assert!(matches!(
            HttpRegistryClient::with_client(Client::new(), "mailto:someone@example.org"),
            Err(RegistryError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_direct_archive_response() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method("GET").path("/leaf/1.0.0");
            then.status(200)
                .header("content-type", "application/tar+gzip")
                .body(b"archive-bytes");
        });

        let archive = client(&server)
            .fetch(&CancellationToken::new(), "leaf", "1.0.0")
            .unwrap();
        assert_eq!(archive.content_length, Some(13));
        assert_eq!(read_all(archive), b"archive-bytes");
        mock.assert();
    }

    #[test]
    fn test_json_envelope_is_followed() {
        let server = MockServer::start();
        let tarball_url = server.url("/files/leaf-1.0.0.tgz");
        let envelope = server.mock(|when, then| {
            when.method("GET").path("/leaf/1.0.0");
            then.status(200)
                .header("content-type", "application/json")
                .body(format!(r#"{{"name":"leaf","tarball":"{}"}}"#, tarball_url));
        });
        let tarball = server.mock(|when, then| {
            when.method("GET").path("/files/leaf-1.0.0.tgz");
            then.status(200)
                .header("content-type", "application/octet-stream")
                .body(b"nested-bytes");
        });

        let archive = client(&server)
            .fetch(&CancellationToken::new(), "leaf", "1.0.0")
            .unwrap();
        assert_eq!(read_all(archive), b"nested-bytes");
        envelope.assert();
        tarball.assert();
    }

    #[test]
    fn test_npm_style_relative_tarball() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method("GET").path("/leaf/1.0.0");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"dist":{"tarball":"/tarballs/leaf.tgz"}}"#);
        });
        let tarball = server.mock(|when, then| {
            when.method("GET").path("/tarballs/leaf.tgz");
            then.status(200).body(b"relative");
        });

        let archive = client(&server)
            .fetch(&CancellationToken::new(), "leaf", "1.0.0")
            .unwrap();
        assert_eq!(read_all(archive), b"relative");
        tarball.assert();
    }

    #[test]
    fn test_json_without_tarball_is_bad_content() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method("GET").path("/leaf/1.0.0");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"name":"leaf","version":"1.0.0"}"#);
        });

        let err = client(&server)
            .fetch(&CancellationToken::new(), "leaf", "1.0.0")
            .unwrap_err();
        assert!(matches!(err, RegistryError::BadContent { .. }), "{err:?}");
    }

    #[test]
    fn test_malformed_json_is_bad_content() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method("GET").path("/leaf/1.0.0");
            then.status(200)
                .header("content-type", "application/json")
                .body("{not json");
        });

        let err = client(&server)
            .fetch(&CancellationToken::new(), "leaf", "1.0.0")
            .unwrap_err();
        assert!(matches!(err, RegistryError::BadContent { .. }), "{err:?}");
    }

    #[test]
    fn test_unrelated_content_type() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method("GET").path("/leaf/1.0.0");
            then.status(200)
                .header("content-type", "text/html")
                .body("<html></html>");
        });

        let err = client(&server)
            .fetch(&CancellationToken::new(), "leaf", "1.0.0")
            .unwrap_err();
        match err {
            RegistryError::BadContentType { content_type, .. } => {
                assert_eq!(content_type, "text/html")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_non_200_status() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method("GET").path("/missing/1.0.0");
            then.status(404);
        });

        let err = client(&server)
            .fetch(&CancellationToken::new(), "missing", "1.0.0")
            .unwrap_err();
        assert!(matches!(err, RegistryError::StatusCode { status: 404, .. }));
    }

    #[test]
    fn test_follow_up_status_is_checked() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method("GET").path("/leaf/1.0.0");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"tarball":"/gone.tgz"}"#);
        });
        server.mock(|when, then| {
            when.method("GET").path("/gone.tgz");
            then.status(410);
        });

        let err = client(&server)
            .fetch(&CancellationToken::new(), "leaf", "1.0.0")
            .unwrap_err();
        assert!(matches!(err, RegistryError::StatusCode { status: 410, .. }));
    }

    #[test]
    fn test_credentials_applied() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method("GET")
                .path("/leaf/1.0.0")
                .header("authorization", "Bearer s3cret");
            then.status(200)
                .header("content-type", "application/gzip")
                .body(b"ok");
        });

        let client = client(&server).with_credentials(Arc::new(BearerToken::new("s3cret")));
        let archive = client
            .fetch(&CancellationToken::new(), "leaf", "1.0.0")
            .unwrap();
        assert_eq!(read_all(archive), b"ok");
        mock.assert();
    }

    #[test]
    fn test_cancelled_before_request() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method("GET").path("/leaf/1.0.0");
            then.status(200);
        });

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client(&server).fetch(&cancel, "leaf", "1.0.0").unwrap_err();
        assert!(matches!(err, RegistryError::Cancelled));
        assert_eq!(mock.hits(), 0);
    }
}
