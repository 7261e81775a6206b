//! # Core Configuration Module
//!
//! Configuration for the mod synchronization core.
//!
//! ## Overview
//!
//! A builder produces a [`CoreConfig`] holding the remote endpoints, the
//! local data directory, and the bridge implementations the engine talks
//! through. `build()` validates everything up front and fails fast with an
//! actionable message when something is missing.
//!
//! ## Required Settings
//!
//! - `data_dir` - Where the checksum cache and settings database live
//! - [`RemoteEndpoints`] - Manifest URL, mods base URL, other-resources index URL
//!
//! ## Bridges (with platform defaults)
//!
//! - `HttpClient` - desktop default: reqwest
//! - `FileSystemAccess` - desktop default: tokio fs
//! - `SettingsStore` - desktop default: SQLite, opened asynchronously by the
//!   service at bootstrap
//!
//! When the `desktop-shims` feature is enabled, desktop defaults are injected
//! for bridges that were not provided. Without it, a missing bridge is a
//! [`Error::CapabilityMissing`].
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, RemoteEndpoints};
//!
//! let config = CoreConfig::builder()
//!     .data_dir("/home/player/.local/share/modsync")
//!     .endpoints(RemoteEndpoints::new(
//!         "http://mods.example.net/modsList/modsList.json",
//!         "http://mods.example.net/modsList",
//!         "http://mods.example.net/other_ressources/",
//!     ))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{FileSystemAccess, HttpClient, SettingsStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File name of the persisted checksum cache inside `data_dir`.
pub const CHECKSUM_CACHE_FILE: &str = "checksum-cache.json";

/// File name of the settings database inside `data_dir`.
pub const SETTINGS_DB_FILE: &str = "settings.db";

/// Extensions picked up from the other-resources directory index.
pub const DEFAULT_OTHER_RESOURCE_EXTENSIONS: &[&str] = &["dll", "paa", "cpp", "ts3_plugin"];

/// Where the remote file listings and payloads live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoints {
    /// JSON manifest: `[{ "name", "size", "hash"? }]`
    pub manifest_url: String,
    /// Base URL that manifest-listed files are fetched from (`<base>/<name>`)
    pub mods_base_url: String,
    /// HTML directory index listing the other resources; files are fetched
    /// from `<index>/<name>`
    pub other_resources_url: String,
    /// Extensions (without the leading dot) recognised in the directory index
    pub other_resource_extensions: Vec<String>,
}

impl RemoteEndpoints {
    pub fn new(
        manifest_url: impl Into<String>,
        mods_base_url: impl Into<String>,
        other_resources_url: impl Into<String>,
    ) -> Self {
        Self {
            manifest_url: manifest_url.into(),
            mods_base_url: mods_base_url.into(),
            other_resources_url: other_resources_url.into(),
            other_resource_extensions: DEFAULT_OTHER_RESOURCE_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }

    /// Replace the recognised other-resource extensions.
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.other_resource_extensions = extensions
            .into_iter()
            .map(|ext| ext.into().trim_start_matches('.').to_string())
            .collect();
        self
    }

    pub fn validate(&self) -> Result<()> {
        for (label, url) in [
            ("Manifest URL", &self.manifest_url),
            ("Mods base URL", &self.mods_base_url),
            ("Other resources URL", &self.other_resources_url),
        ] {
            if url.trim().is_empty() {
                return Err(Error::Config(format!("{} cannot be empty", label)));
            }
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(Error::Config(format!(
                    "{} must be an http(s) URL, got '{}'",
                    label, url
                )));
            }
        }

        if self.other_resource_extensions.is_empty() {
            return Err(Error::Config(
                "At least one other-resource extension is required".to_string(),
            ));
        }

        if let Some(bad) = self
            .other_resource_extensions
            .iter()
            .find(|ext| ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
        {
            return Err(Error::Config(format!(
                "Invalid other-resource extension '{}'",
                bad
            )));
        }

        Ok(())
    }
}

/// Feature flags control optional functionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Load the checksum cache from `data_dir` at startup and save it after
    /// every pass
    pub persist_checksum_cache: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            persist_checksum_cache: true,
        }
    }
}

/// Core configuration for the mod synchronization engine.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Directory for engine state (checksum cache, settings database)
    pub data_dir: PathBuf,

    /// Remote listing and payload locations
    pub endpoints: RemoteEndpoints,

    /// Capacity of the event bus channel
    pub event_buffer_size: usize,

    /// HTTP client used for listings and downloads
    pub http_client: Arc<dyn HttpClient>,

    /// File system access abstraction
    pub file_system: Arc<dyn FileSystemAccess>,

    /// Persisted settings (optional; the service opens a desktop default)
    pub settings_store: Option<Arc<dyn SettingsStore>>,

    /// Feature flags
    pub features: FeatureFlags,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("data_dir", &self.data_dir)
            .field("endpoints", &self.endpoints)
            .field("event_buffer_size", &self.event_buffer_size)
            .field("http_client", &"HttpClient { ... }")
            .field("file_system", &"FileSystemAccess { ... }")
            .field(
                "settings_store",
                &self.settings_store.as_ref().map(|_| "SettingsStore { ... }"),
            )
            .field("features", &self.features)
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Path of the persisted checksum cache.
    pub fn checksum_cache_path(&self) -> PathBuf {
        self.data_dir.join(CHECKSUM_CACHE_FILE)
    }

    /// Path of the default settings database.
    pub fn settings_db_path(&self) -> PathBuf {
        self.data_dir.join(SETTINGS_DB_FILE)
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - The data directory is not empty
    /// - Remote endpoints are http(s) URLs
    /// - The event buffer can hold at least one event
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(Error::Config("Data directory cannot be empty".to_string()));
        }

        self.endpoints.validate()?;

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn http_client_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "HttpClient implementation is required to fetch the manifest and mod files. \
                 Desktop: enable the 'desktop-shims' feature to use ReqwestHttpClient. \
                 Other hosts: inject a platform HTTP adapter."
            .to_string(),
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn file_system_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "FileSystemAccess".to_string(),
        message: "FileSystemAccess implementation is required to inspect and write mod files. \
                 Desktop: enable the 'desktop-shims' feature to use TokioFileSystem. \
                 Other hosts: inject a platform file system adapter."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    let client = bridge_desktop::ReqwestHttpClient::new().map_err(|e| {
        Error::CapabilityMissing {
            capability: "HttpClient".to_string(),
            message: format!("Failed to create default ReqwestHttpClient: {}", e),
        }
    })?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(http_client_missing_error())
}

#[cfg(feature = "desktop-shims")]
fn provide_default_file_system(data_dir: &Path) -> Result<Arc<dyn FileSystemAccess>> {
    Ok(Arc::new(bridge_desktop::TokioFileSystem::with_data_directory(
        data_dir.to_path_buf(),
    )))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_file_system(_data_dir: &Path) -> Result<Arc<dyn FileSystemAccess>> {
    Err(file_system_missing_error())
}

/// Builder for [`CoreConfig`].
#[derive(Default)]
pub struct CoreConfigBuilder {
    data_dir: Option<PathBuf>,
    endpoints: Option<RemoteEndpoints>,
    event_buffer_size: Option<usize>,
    http_client: Option<Arc<dyn HttpClient>>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    features: FeatureFlags,
}

impl CoreConfigBuilder {
    /// Sets the directory for engine state (required).
    pub fn data_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.data_dir = Some(path.into());
        self
    }

    /// Sets the remote endpoints (required).
    pub fn endpoints(mut self, endpoints: RemoteEndpoints) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    /// Sets the event bus capacity.
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Sets the HTTP client implementation.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the file system access implementation.
    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    /// Sets the settings store implementation.
    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    /// Enables or disables checksum cache persistence.
    pub fn persist_checksum_cache(mut self, enabled: bool) -> Self {
        self.features.persist_checksum_cache = enabled;
        self
    }

    /// Sets all feature flags at once.
    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Errors
    ///
    /// - `Config` when `data_dir` or the endpoints are missing or invalid
    /// - `CapabilityMissing` when a bridge is absent and no desktop default
    ///   is available
    pub fn build(self) -> Result<CoreConfig> {
        let data_dir = self.data_dir.ok_or_else(|| {
            Error::Config("Data directory is required. Use .data_dir() to set it.".to_string())
        })?;

        let endpoints = self.endpoints.ok_or_else(|| {
            Error::Config(
                "Remote endpoints are required. Use .endpoints() to set them.".to_string(),
            )
        })?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let file_system = match self.file_system {
            Some(fs) => fs,
            None => provide_default_file_system(&data_dir)?,
        };

        let config = CoreConfig {
            data_dir,
            endpoints,
            event_buffer_size: self
                .event_buffer_size
                .unwrap_or(crate::events::DEFAULT_EVENT_BUFFER_SIZE),
            http_client,
            file_system,
            settings_store: self.settings_store,
            features: self.features,
        };

        config.validate()?;

        Ok(config)
    }
}
