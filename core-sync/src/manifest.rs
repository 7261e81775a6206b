//! # Manifest Source
//!
//! Fetches the two remote listings a pass reconciles against.
//!
//! ## Listings
//!
//! - **Manifest**: JSON array `[{ "name", "size", "hash"? }]`. Hash-carrying
//!   entries are verified by content.
//! - **Other resources**: an HTML directory index. File names are discovered
//!   from `href` attributes ending in one of the configured extensions and
//!   sized with one `HEAD` request each. These entries have no hash and are
//!   compared by size only.
//!
//! Any failure here is fatal to the pass and happens before any local
//! mutation.

use crate::plan::remote_url;
use crate::{Result, SyncError};
use async_trait::async_trait;
use bridge_traits::http::{HttpClient, HttpRequest};
use core_runtime::config::RemoteEndpoints;
use futures::stream::{self, StreamExt, TryStreamExt};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Number of `HEAD` requests in flight while sizing other resources.
const HEAD_CONCURRENCY: usize = 4;

// ============================================================================
// Listing Types
// ============================================================================

/// One file of the authoritative manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub size: u64,
    #[serde(default)]
    pub hash: Option<String>,
}

impl ManifestEntry {
    pub fn new(name: impl Into<String>, size: u64, hash: Option<&str>) -> Self {
        Self {
            name: name.into(),
            size,
            hash: hash.map(str::to_string),
        }
    }

    /// The published hash, trimmed and lowercased. Blank hashes count as absent.
    pub fn expected_hash(&self) -> Option<String> {
        self.hash
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_ascii_lowercase)
    }
}

/// One file discovered in the other-resources directory index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtherResourceEntry {
    pub name: String,
    pub size: u64,
}

// ============================================================================
// Source Trait
// ============================================================================

/// Supplies the remote listings for a reconciliation pass.
#[async_trait]
pub trait ManifestSource: Send + Sync {
    /// Fetch the manifest. Duplicate names keep their first occurrence.
    async fn fetch_manifest(&self) -> Result<Vec<ManifestEntry>>;

    /// Discover and size the other resources.
    async fn fetch_other_resources(&self) -> Result<Vec<OtherResourceEntry>>;
}

// ============================================================================
// HTTP Implementation
// ============================================================================

/// [`ManifestSource`] backed by the configured remote endpoints.
pub struct HttpManifestSource {
    http: Arc<dyn HttpClient>,
    endpoints: RemoteEndpoints,
    href_pattern: Regex,
}

impl HttpManifestSource {
    /// # Errors
    ///
    /// Returns `Config` if the extension list cannot be turned into a pattern.
    pub fn new(http: Arc<dyn HttpClient>, endpoints: RemoteEndpoints) -> Result<Self> {
        let href_pattern = href_pattern(&endpoints.other_resource_extensions)?;
        Ok(Self {
            http,
            endpoints,
            href_pattern,
        })
    }

    fn fetch_error(url: &str, message: impl Into<String>) -> SyncError {
        SyncError::ManifestFetch {
            url: url.to_string(),
            message: message.into(),
        }
    }

    async fn head_size(&self, name: String) -> Result<OtherResourceEntry> {
        let url = remote_url(&self.endpoints.other_resources_url, &name);
        let response = self
            .http
            .execute(HttpRequest::head(&url))
            .await
            .map_err(|e| Self::fetch_error(&url, e.to_string()))?;

        if !response.is_success() {
            return Err(Self::fetch_error(
                &url,
                format!("HEAD returned status {}", response.status),
            ));
        }

        let size = response.content_length().unwrap_or(0);
        debug!(file = %name, size, "Sized other resource");
        Ok(OtherResourceEntry { name, size })
    }
}

#[async_trait]
impl ManifestSource for HttpManifestSource {
    #[instrument(skip(self), fields(url = %self.endpoints.manifest_url))]
    async fn fetch_manifest(&self) -> Result<Vec<ManifestEntry>> {
        let url = &self.endpoints.manifest_url;
        let response = self
            .http
            .execute(HttpRequest::get(url))
            .await
            .map_err(|e| Self::fetch_error(url, e.to_string()))?;

        if !response.is_success() {
            return Err(Self::fetch_error(
                url,
                format!("Manifest request returned status {}", response.status),
            ));
        }

        let entries: Vec<ManifestEntry> = response
            .json()
            .map_err(|e| Self::fetch_error(url, format!("Invalid manifest: {}", e)))?;

        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(entries.len());
        for entry in entries {
            if seen.insert(entry.name.clone()) {
                unique.push(entry);
            } else {
                warn!(file = %entry.name, "Duplicate manifest entry ignored");
            }
        }

        debug!(entries = unique.len(), "Fetched manifest");
        Ok(unique)
    }

    #[instrument(skip(self), fields(url = %self.endpoints.other_resources_url))]
    async fn fetch_other_resources(&self) -> Result<Vec<OtherResourceEntry>> {
        let url = &self.endpoints.other_resources_url;
        let response = self
            .http
            .execute(HttpRequest::get(url))
            .await
            .map_err(|e| Self::fetch_error(url, e.to_string()))?;

        if !response.is_success() {
            return Err(Self::fetch_error(
                url,
                format!("Directory index returned status {}", response.status),
            ));
        }

        let html = response
            .text()
            .map_err(|e| Self::fetch_error(url, e.to_string()))?;
        let names = parse_directory_index(&self.href_pattern, &html);
        debug!(files = names.len(), "Discovered other resources");

        // `buffered` keeps index order.
        stream::iter(names)
            .map(|name| self.head_size(name))
            .buffered(HEAD_CONCURRENCY)
            .try_collect()
            .await
    }
}

/// Case-insensitive `href="<name>.<ext>"` matcher for the given extensions.
pub fn href_pattern(extensions: &[String]) -> Result<Regex> {
    if extensions.is_empty() {
        return Err(SyncError::Config(
            "No other-resource extensions configured".to_string(),
        ));
    }

    let alternatives: Vec<String> = extensions
        .iter()
        .map(|ext| regex::escape(ext.trim_start_matches('.')))
        .collect();
    let pattern = format!(r#"(?i)href="([^"]+\.(?:{}))""#, alternatives.join("|"));

    Regex::new(&pattern).map_err(|e| SyncError::Config(format!("Invalid extension pattern: {}", e)))
}

/// Extract file names from a directory index page.
///
/// Links into other directories or carrying a query string are skipped.
/// Names are percent-decoded and de-duplicated in page order.
pub fn parse_directory_index(pattern: &Regex, html: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();

    for captures in pattern.captures_iter(html) {
        let Some(href) = captures.get(1).map(|m| m.as_str()) else {
            continue;
        };
        if href.contains('/') || href.contains('?') {
            debug!(href, "Skipping non-local index link");
            continue;
        }

        let name = match urlencoding::decode(href) {
            Ok(decoded) => decoded.into_owned(),
            Err(_) => {
                warn!(href, "Skipping index link with invalid encoding");
                continue;
            }
        };

        if seen.insert(name.clone()) {
            names.push(name);
        }
    }

    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::http::{HttpMethod, HttpResponse, HttpStream};
    use bytes::Bytes;
    use mockall::mock;
    use std::collections::HashMap;

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
            async fn download_stream(&self, request: HttpRequest) -> BridgeResult<HttpStream>;
        }
    }

    fn endpoints() -> RemoteEndpoints {
        RemoteEndpoints::new(
            "https://mods.example.com/manifest.json",
            "https://mods.example.com/mods",
            "https://mods.example.com/other",
        )
    }

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: HashMap::new(),
            body: Bytes::from(body.to_string()),
        }
    }

    fn head_response(length: Option<u64>) -> HttpResponse {
        let mut headers = HashMap::new();
        if let Some(length) = length {
            headers.insert("Content-Length".to_string(), length.to_string());
        }
        HttpResponse {
            status: 200,
            headers,
            body: Bytes::new(),
        }
    }

    #[test]
    fn test_expected_hash_is_normalized() {
        assert_eq!(
            ManifestEntry::new("a.pbo", 1, Some("  ABCDEF ")).expected_hash(),
            Some("abcdef".to_string())
        );
        assert_eq!(ManifestEntry::new("a.pbo", 1, Some("  ")).expected_hash(), None);
        assert_eq!(ManifestEntry::new("a.pbo", 1, None).expected_hash(), None);
    }

    #[test]
    fn test_manifest_entry_deserializes_without_hash() {
        let entries: Vec<ManifestEntry> = serde_json::from_str(
            r#"[{"name":"a.pbo","size":100,"hash":"H1"},{"name":"b.pbo","size":5},{"name":"c.pbo","size":7,"hash":null}]"#,
        )
        .unwrap();

        assert_eq!(entries[0].hash.as_deref(), Some("H1"));
        assert_eq!(entries[1].hash, None);
        assert_eq!(entries[2].hash, None);
    }

    #[test]
    fn test_parse_directory_index() {
        let pattern = href_pattern(&["dll".to_string(), "ts3_plugin".to_string()]).unwrap();
        let html = r#"
            <a href="../">Parent</a>
            <a href="task_force_radio.ts3_plugin">tfr</a>
            <a href="TFR_64.DLL">tfr 64</a>
            <a href="readme.txt">readme</a>
            <a href="sub/inner.dll">nested</a>
            <a href="file.dll?download=1">query</a>
            <a href="my%20radio.dll">encoded</a>
            <a href="TFR_64.DLL">duplicate</a>
        "#;

        let names = parse_directory_index(&pattern, html);
        assert_eq!(
            names,
            vec![
                "task_force_radio.ts3_plugin".to_string(),
                "TFR_64.DLL".to_string(),
                "my radio.dll".to_string(),
            ]
        );
    }

    #[test]
    fn test_href_pattern_requires_extensions() {
        assert!(matches!(href_pattern(&[]), Err(SyncError::Config(_))));
    }

    #[tokio::test]
    async fn test_fetch_manifest_drops_duplicates() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .withf(|req| {
                req.method == HttpMethod::Get && req.url == "https://mods.example.com/manifest.json"
            })
            .times(1)
            .returning(|_| {
                Ok(response(
                    200,
                    r#"[{"name":"a.pbo","size":100,"hash":"H1"},{"name":"a.pbo","size":1}]"#,
                ))
            });

        let source = HttpManifestSource::new(Arc::new(http), endpoints()).unwrap();
        let manifest = source.fetch_manifest().await.unwrap();

        assert_eq!(manifest, vec![ManifestEntry::new("a.pbo", 100, Some("H1"))]);
    }

    #[tokio::test]
    async fn test_fetch_manifest_rejects_error_status() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .returning(|_| Ok(response(503, "unavailable")));

        let source = HttpManifestSource::new(Arc::new(http), endpoints()).unwrap();
        let err = source.fetch_manifest().await.unwrap_err();

        assert!(matches!(err, SyncError::ManifestFetch { .. }));
    }

    #[tokio::test]
    async fn test_fetch_manifest_rejects_invalid_json() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .returning(|_| Ok(response(200, "<html>not json</html>")));

        let source = HttpManifestSource::new(Arc::new(http), endpoints()).unwrap();
        let err = source.fetch_manifest().await.unwrap_err();

        assert!(matches!(err, SyncError::ManifestFetch { .. }));
    }

    #[tokio::test]
    async fn test_fetch_other_resources_sizes_each_file() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .withf(|req| req.method == HttpMethod::Get)
            .times(1)
            .returning(|_| {
                Ok(response(
                    200,
                    r#"<a href="a.dll">a</a> <a href="b.paa">b</a>"#,
                ))
            });
        http.expect_execute()
            .withf(|req| req.method == HttpMethod::Head && req.url.ends_with("/a.dll"))
            .times(1)
            .returning(|_| Ok(head_response(Some(42))));
        http.expect_execute()
            .withf(|req| req.method == HttpMethod::Head && req.url.ends_with("/b.paa"))
            .times(1)
            .returning(|_| Ok(head_response(None)));

        let source = HttpManifestSource::new(Arc::new(http), endpoints()).unwrap();
        let resources = source.fetch_other_resources().await.unwrap();

        assert_eq!(
            resources,
            vec![
                OtherResourceEntry {
                    name: "a.dll".to_string(),
                    size: 42
                },
                OtherResourceEntry {
                    name: "b.paa".to_string(),
                    size: 0
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_fetch_other_resources_fails_on_head_error() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .withf(|req| req.method == HttpMethod::Get)
            .returning(|_| Ok(response(200, r#"<a href="a.dll">a</a>"#)));
        http.expect_execute()
            .withf(|req| req.method == HttpMethod::Head)
            .returning(|_| Ok(response(404, "")));

        let source = HttpManifestSource::new(Arc::new(http), endpoints()).unwrap();
        let err = source.fetch_other_resources().await.unwrap_err();

        assert!(matches!(err, SyncError::ManifestFetch { .. }));
    }
}
