//! Published channel endpoints
//!
//! A channel publishes three kinds of objects under one base URL: the
//! manifest (`checksums.json`), the version marker (`version.txt`) and the
//! game files themselves at their manifest paths. [`RemoteChannel`] knows
//! the layout; the orchestrator only talks to the [`ManifestSource`] trait
//! so tests can substitute canned manifests.

use async_trait::async_trait;
use caravel_manifest::Manifest;
use caravel_transfer::{Fetcher, join_url};
use tracing::debug;

use crate::error::Result;

/// Object name of the published manifest.
pub const MANIFEST_NAME: &str = "checksums.json";

/// Object name of the published version marker.
pub const VERSION_NAME: &str = "version.txt";

/// Where manifests and versions come from.
#[async_trait]
pub trait ManifestSource: Send + Sync {
    /// Fetch and parse the published manifest.
    async fn fetch_manifest(&self) -> Result<Manifest>;

    /// Fetch the published version string.
    async fn fetch_version(&self) -> Result<String>;

    /// Base URL that file paths join onto.
    fn base_url(&self) -> &str;
}

/// One published branch of a game, rooted at a base URL.
#[derive(Debug, Clone)]
pub struct RemoteChannel {
    base_url: String,
    fetcher: Fetcher,
}

impl RemoteChannel {
    /// Create a channel handle.
    pub fn new(base_url: impl Into<String>, fetcher: Fetcher) -> Self {
        Self {
            base_url: base_url.into(),
            fetcher,
        }
    }

    /// Underlying HTTP fetcher.
    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    /// Absolute URL of a published file.
    pub fn file_url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    /// Absolute URL of a published file's compressed form.
    pub fn compressed_url(&self, path: &str) -> String {
        format!("{}{}", self.file_url(path), caravel_transfer::COMPRESSED_SUFFIX)
    }

    async fn get_text(&self, url: String) -> Result<String> {
        debug!(url = %url, "fetching channel object");
        let send = async {
            let response = self.fetcher.client().get(&url).send().await?;
            let status = response.status();
            if status.as_u16() == 404 {
                return Err(caravel_transfer::Error::not_found(&url));
            }
            if !status.is_success() {
                return Err(caravel_transfer::Error::unexpected_status(
                    status.as_u16(),
                    &url,
                ));
            }
            Ok(response.text().await?)
        };
        Ok(send.await?)
    }
}

#[async_trait]
impl ManifestSource for RemoteChannel {
    async fn fetch_manifest(&self) -> Result<Manifest> {
        let text = self.get_text(self.file_url(MANIFEST_NAME)).await?;
        Ok(Manifest::from_json_lenient(&text)?)
    }

    async fn fetch_version(&self) -> Result<String> {
        let text = self.get_text(self.file_url(VERSION_NAME)).await?;
        Ok(text.trim().to_string())
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_version_trims_whitespace() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/version.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("v2.3.1\n"))
            .mount(&server)
            .await;

        let channel = RemoteChannel::new(server.uri(), Fetcher::new().unwrap());
        assert_eq!(channel.fetch_version().await.unwrap(), "v2.3.1");
    }

    #[tokio::test]
    async fn test_fetch_manifest_tolerates_trailing_commas() {
        let server = MockServer::start().await;
        let body = r#"{
            "files": [
                { "path": "bin/game.exe", "checksum": "ignore", "size": 4, },
            ],
        }"#;
        Mock::given(method("GET"))
            .and(path("/checksums.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let channel = RemoteChannel::new(server.uri(), Fetcher::new().unwrap());
        let manifest = channel.fetch_manifest().await.unwrap();
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest.files[0].path, "bin/game.exe");
    }

    #[test]
    fn test_urls_never_double_slash() {
        let channel = RemoteChannel::new(
            "https://cdn.example.com/live/",
            Fetcher::new().unwrap(),
        );
        assert_eq!(
            channel.file_url("/paks/common.rpak"),
            "https://cdn.example.com/live/paks/common.rpak"
        );
        assert_eq!(
            channel.compressed_url("paks/common.rpak"),
            "https://cdn.example.com/live/paks/common.rpak.zst"
        );
    }
}
