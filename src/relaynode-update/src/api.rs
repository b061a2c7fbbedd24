//! Release feed client.

use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::config::UpdateConfig;
use crate::error::{UpdateError, UpdateResult};
use crate::platform::Platform;
use crate::version::normalize_tag;

/// Timestamp layout of `published_at` (UTC, no fractional seconds).
const PUBLISHED_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Raw "latest release" document. Only the fields we need.
#[derive(Debug, Clone, Deserialize)]
pub struct LatestRelease {
    pub tag_name: String,
    pub published_at: String,
}

/// Where the artifacts of a release live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseLayout {
    /// Base URL that `v{version}/` directories live under
    pub download_base_url: String,
    /// Product name used in artifact file names
    pub product_name: String,
}

impl ReleaseLayout {
    pub fn from_config(config: &UpdateConfig) -> Self {
        Self {
            download_base_url: config.download_base_url.trim_end_matches('/').to_string(),
            product_name: config.product_name.clone(),
        }
    }

    /// URL of the zip archive for `version` on `platform`.
    pub fn archive_url(&self, version: &str, platform: Platform) -> String {
        format!(
            "{}/v{}/{}-{}-{}-{}.zip",
            self.download_base_url, version, self.product_name, version, platform.os, platform.arch
        )
    }
}

/// One published version and the locations of its platform artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseDescriptor {
    version: String,
    published_at: DateTime<Utc>,
    download_url: String,
    checksum_url: String,
    signature_url: String,
}

impl ReleaseDescriptor {
    /// Build a descriptor from a tag; every URL derives from the tag and platform.
    pub fn new(
        tag: &str,
        published_at: DateTime<Utc>,
        layout: &ReleaseLayout,
        platform: Platform,
    ) -> Self {
        let version = normalize_tag(tag).to_string();
        let download_url = layout.archive_url(&version, platform);
        let checksum_url = format!("{}.sha512", download_url);
        let signature_url = format!("{}.asc", download_url);

        Self {
            version,
            published_at,
            download_url,
            checksum_url,
            signature_url,
        }
    }

    /// Build a descriptor from the raw metadata document.
    pub fn from_latest(
        release: &LatestRelease,
        layout: &ReleaseLayout,
        platform: Platform,
    ) -> UpdateResult<Self> {
        let version = normalize_tag(&release.tag_name);
        if version.is_empty() {
            return Err(UpdateError::InvalidMetadata {
                message: "empty tag_name".to_string(),
            });
        }

        let published_at = parse_published_at(&release.published_at)?;
        Ok(Self::new(version, published_at, layout, platform))
    }

    /// Version with any leading `v` removed.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    pub fn download_url(&self) -> &str {
        &self.download_url
    }

    pub fn checksum_url(&self) -> &str {
        &self.checksum_url
    }

    pub fn signature_url(&self) -> &str {
        &self.signature_url
    }
}

/// Parse `YYYY-MM-DDTHH:MM:SSZ` as UTC.
pub fn parse_published_at(value: &str) -> UpdateResult<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value.trim(), PUBLISHED_AT_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| UpdateError::InvalidTimestamp {
            value: value.to_string(),
        })
}

/// Client for the release metadata endpoint and artifact downloads.
#[derive(Clone)]
pub struct ReleaseClient {
    client: Client,
    release_url: String,
    layout: ReleaseLayout,
    platform: Platform,
}

impl ReleaseClient {
    /// Create a client for the current platform from configuration.
    pub fn new(config: &UpdateConfig) -> Self {
        Self::with_platform(config, Platform::current())
    }

    /// Create a client that resolves artifacts for `platform`.
    pub fn with_platform(config: &UpdateConfig, platform: Platform) -> Self {
        let client = Client::builder()
            .user_agent(concat!("relaynode-update/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            release_url: config.release_url.clone(),
            layout: ReleaseLayout::from_config(config),
            platform,
        }
    }

    /// Get the release metadata URL.
    pub fn release_url(&self) -> &str {
        &self.release_url
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Fetch and parse the latest release.
    pub async fn fetch_latest(&self) -> UpdateResult<ReleaseDescriptor> {
        let response = self
            .client
            .get(&self.release_url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| UpdateError::ConnectionFailed {
                message: e.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(UpdateError::NotFound {
                url: self.release_url.clone(),
            });
        }

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(UpdateError::ServerError {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.bytes().await?;
        let latest: LatestRelease = serde_json::from_slice(&body)?;
        ReleaseDescriptor::from_latest(&latest, &self.layout, self.platform)
    }

    /// Fetch the latest release, or `None` when it is not available for any reason.
    pub async fn check_latest(&self) -> Option<ReleaseDescriptor> {
        match self.fetch_latest().await {
            Ok(release) => {
                tracing::debug!(
                    version = %release.version(),
                    published_at = %release.published_at(),
                    "Fetched latest release"
                );
                Some(release)
            }
            Err(e) => {
                tracing::warn!(url = %self.release_url, "Latest release not available: {}", e);
                None
            }
        }
    }

    /// Download `url` into memory. A 404 is reported as [`UpdateError::NotFound`].
    pub async fn download(&self, url: &str) -> UpdateResult<Bytes> {
        let response =
            self.client
                .get(url)
                .send()
                .await
                .map_err(|e| UpdateError::ConnectionFailed {
                    message: e.to_string(),
                })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(UpdateError::NotFound {
                url: url.to_string(),
            });
        }

        if !status.is_success() {
            return Err(UpdateError::ServerError {
                status: status.as_u16(),
                message: format!("GET {}", url),
            });
        }

        let bytes = response.bytes().await?;
        tracing::debug!(url = %url, size = bytes.len(), "Downloaded");
        Ok(bytes)
    }

    /// Download a text document such as the checksum manifest.
    pub async fn download_text(&self, url: &str) -> UpdateResult<String> {
        let bytes = self.download(url).await?;
        String::from_utf8(bytes.to_vec()).map_err(|_| UpdateError::InvalidMetadata {
            message: format!("{} is not valid UTF-8", url),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const LINUX_AMD64: Platform = Platform {
        os: "linux",
        arch: "amd64",
    };

    fn test_config(server_uri: &str) -> UpdateConfig {
        UpdateConfig {
            release_url: format!("{}/releases/latest", server_uri),
            download_base_url: format!("{}/download", server_uri),
            ..Default::default()
        }
    }

    #[test]
    fn test_descriptor_urls() {
        let layout = ReleaseLayout {
            download_base_url: "https://example.com/releases/download".to_string(),
            product_name: "RelayNode".to_string(),
        };
        let published = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let release = ReleaseDescriptor::new("v1.4.2", published, &layout, LINUX_AMD64);

        assert_eq!(release.version(), "1.4.2");
        assert_eq!(
            release.download_url(),
            "https://example.com/releases/download/v1.4.2/RelayNode-1.4.2-linux-amd64.zip"
        );
        assert_eq!(
            release.checksum_url(),
            "https://example.com/releases/download/v1.4.2/RelayNode-1.4.2-linux-amd64.zip.sha512"
        );
        assert_eq!(
            release.signature_url(),
            "https://example.com/releases/download/v1.4.2/RelayNode-1.4.2-linux-amd64.zip.asc"
        );
    }

    #[test]
    fn test_parse_published_at() {
        let parsed = parse_published_at("2024-05-01T12:30:45Z").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 45).unwrap());

        assert!(matches!(
            parse_published_at("2024-05-01 12:30:45"),
            Err(UpdateError::InvalidTimestamp { .. })
        ));
        assert!(parse_published_at("2024-05-01T12:30:45.123Z").is_err());
    }

    #[test]
    fn test_empty_tag_is_rejected() {
        let layout = ReleaseLayout::from_config(&UpdateConfig::default());
        let latest = LatestRelease {
            tag_name: "v".to_string(),
            published_at: "2024-05-01T12:30:45Z".to_string(),
        };
        let result = ReleaseDescriptor::from_latest(&latest, &layout, LINUX_AMD64);
        assert!(matches!(result, Err(UpdateError::InvalidMetadata { .. })));
    }

    #[tokio::test]
    async fn test_fetch_latest_happy_path() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/releases/latest"))
            .respond_with(
                wiremock::ResponseTemplate::new(200).set_body_raw(
                    serde_json::json!({
                        "tag_name": "v2.0.1",
                        "published_at": "2024-05-01T12:00:00Z",
                        "name": "RelayNode 2.0.1",
                        "assets": []
                    })
                    .to_string(),
                    "application/json",
                ),
            )
            .mount(&server)
            .await;

        let client = ReleaseClient::with_platform(&test_config(&server.uri()), LINUX_AMD64);
        let release = client.fetch_latest().await.expect("fetch latest");
        assert_eq!(release.version(), "2.0.1");
        assert_eq!(
            release.download_url(),
            format!(
                "{}/download/v2.0.1/RelayNode-2.0.1-linux-amd64.zip",
                server.uri()
            )
        );
    }

    #[tokio::test]
    async fn test_check_latest_unparseable_is_not_available() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/releases/latest"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let client = ReleaseClient::with_platform(&test_config(&server.uri()), LINUX_AMD64);
        assert!(matches!(
            client.fetch_latest().await,
            Err(UpdateError::Json(_))
        ));
        assert!(client.check_latest().await.is_none());
    }

    #[tokio::test]
    async fn test_check_latest_server_error_is_not_available() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = ReleaseClient::with_platform(&test_config(&server.uri()), LINUX_AMD64);
        assert!(client.check_latest().await.is_none());
    }

    #[tokio::test]
    async fn test_download_404_is_not_found() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = ReleaseClient::with_platform(&test_config(&server.uri()), LINUX_AMD64);
        let url = format!("{}/download/v1/missing.zip", server.uri());
        match client.download(&url).await {
            Err(UpdateError::NotFound { url: reported }) => assert_eq!(reported, url),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_download_bytes() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/download/file.bin"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
            .mount(&server)
            .await;

        let client = ReleaseClient::with_platform(&test_config(&server.uri()), LINUX_AMD64);
        let bytes = client
            .download(&format!("{}/download/file.bin", server.uri()))
            .await
            .unwrap();
        assert_eq!(bytes.as_ref(), &[1u8, 2, 3]);
    }
}
