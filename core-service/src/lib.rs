//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (HTTP, filesystem,
//! settings) into the sync engine. Desktop apps typically enable the
//! `desktop-shims` feature (which depends on `bridge-desktop`) so that any
//! bridge left out of the [`CoreConfig`] falls back to a desktop default.
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, RemoteEndpoints};
//! use core_service::ModSyncService;
//!
//! let config = CoreConfig::builder()
//!     .data_dir("/var/lib/launcher")
//!     .endpoints(RemoteEndpoints::new(manifest, mods, other))
//!     .build()?;
//! let service = ModSyncService::bootstrap(config).await?;
//! service.set_game_path("/games/arma3").await?;
//! service.sync().await?;
//! ```

pub mod error;

pub use error::{CoreError, Result};

use bridge_traits::storage::{FileSystemAccess, SettingsStore};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus, Receiver};
use core_sync::{
    format_remaining, CheckOutcome, DownloadOutcome, ModSyncCoordinator, SessionState,
    SyncConfig, TransferTracker,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Settings key holding the game installation root.
pub const GAME_PATH_KEY: &str = "mods.game_path";

// ============================================================================
// Bridge Resolution
// ============================================================================

#[cfg(feature = "desktop-shims")]
async fn provide_default_settings_store(db_path: &Path) -> Result<Arc<dyn SettingsStore>> {
    let store = bridge_desktop::SqliteSettingsStore::new(db_path.to_path_buf())
        .await
        .map_err(|e| CoreError::CapabilityMissing {
            capability: "SettingsStore".to_string(),
            message: format!("Failed to open default SqliteSettingsStore: {}", e),
        })?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "desktop-shims"))]
async fn provide_default_settings_store(_db_path: &Path) -> Result<Arc<dyn SettingsStore>> {
    Err(CoreError::CapabilityMissing {
        capability: "SettingsStore".to_string(),
        message: "SettingsStore implementation is required to remember the game path. \
                 Desktop: enable the 'desktop-shims' feature to use SqliteSettingsStore. \
                 Other hosts: inject a platform settings adapter."
            .to_string(),
    })
}

// ============================================================================
// Service
// ============================================================================

/// Primary façade exposed to host applications.
///
/// Owns the persisted game path and the checksum cache file, and runs every
/// pass against the stored game path.
pub struct ModSyncService {
    coordinator: Arc<ModSyncCoordinator>,
    settings: Arc<dyn SettingsStore>,
    file_system: Arc<dyn FileSystemAccess>,
    event_bus: Arc<EventBus>,
    /// Set when checksum cache persistence is enabled
    cache_path: Option<PathBuf>,
}

impl ModSyncService {
    /// Bootstrap with default sync tunables.
    pub async fn bootstrap(config: CoreConfig) -> Result<Self> {
        Self::bootstrap_with(config, SyncConfig::default()).await
    }

    /// Resolve the remaining bridges, build the coordinator, and load the
    /// persisted checksum cache.
    ///
    /// # Errors
    ///
    /// - `CapabilityMissing` when no settings store is configured and no
    ///   desktop default is available
    /// - `Sync` when the sync tunables are invalid
    #[instrument(skip_all, fields(data_dir = %config.data_dir.display()))]
    pub async fn bootstrap_with(config: CoreConfig, sync_config: SyncConfig) -> Result<Self> {
        config.validate()?;

        let settings = match &config.settings_store {
            Some(store) => store.clone(),
            None => provide_default_settings_store(&config.settings_db_path()).await?,
        };

        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let coordinator = ModSyncCoordinator::new(
            sync_config,
            config.endpoints.clone(),
            config.http_client.clone(),
            config.file_system.clone(),
            event_bus.clone(),
        )?;

        let cache_path = config
            .features
            .persist_checksum_cache
            .then(|| config.checksum_cache_path());
        if let Some(path) = &cache_path {
            let loaded = coordinator.checksum_cache().load_from(path).await?;
            info!(entries = loaded, "Loaded checksum cache");
        }

        info!("Mod sync service ready");

        Ok(Self {
            coordinator: Arc::new(coordinator),
            settings,
            file_system: config.file_system,
            event_bus,
            cache_path,
        })
    }

    // ========================================================================
    // Game Path
    // ========================================================================

    /// The persisted game installation root, if one was set.
    pub async fn game_path(&self) -> Result<Option<PathBuf>> {
        let value = self.settings.get_string(GAME_PATH_KEY).await?;
        Ok(value.filter(|v| !v.is_empty()).map(PathBuf::from))
    }

    /// Persist `path` as the game installation root.
    ///
    /// The directory must already exist. Changing the root drops any plan
    /// computed for the previous one.
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub async fn set_game_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let invalid = |reason: String| CoreError::InvalidGamePath {
            path: path.display().to_string(),
            reason,
        };

        let metadata = self
            .file_system
            .metadata(path)
            .await
            .map_err(|e| invalid(e.to_string()))?;
        if !metadata.is_directory {
            return Err(invalid("not a directory".to_string()));
        }
        let value = path
            .to_str()
            .ok_or_else(|| invalid("path is not valid UTF-8".to_string()))?;

        self.settings.set_string(GAME_PATH_KEY, value).await?;
        info!("Game path updated");
        Ok(())
    }

    async fn require_game_path(&self) -> Result<PathBuf> {
        self.game_path().await?.ok_or(CoreError::NoGamePath)
    }

    // ========================================================================
    // Passes
    // ========================================================================

    /// Verify the installation at the stored game path.
    pub async fn check(&self) -> Result<CheckOutcome> {
        let root = self.require_game_path().await?;
        let outcome = self.coordinator.check(&root).await;
        if !matches!(outcome, Ok(CheckOutcome::Skipped)) {
            self.persist_cache().await;
        }
        Ok(outcome?)
    }

    /// Download the plan from the last check.
    pub async fn download(&self) -> Result<DownloadOutcome> {
        let root = self.require_game_path().await?;
        let outcome = self.coordinator.download(&root).await;
        self.persist_after(&outcome).await;
        Ok(outcome?)
    }

    /// Check, then download whatever is stale.
    pub async fn sync(&self) -> Result<DownloadOutcome> {
        let root = self.require_game_path().await?;
        let outcome = self.coordinator.sync(&root).await;
        self.persist_after(&outcome).await;
        Ok(outcome?)
    }

    async fn persist_after(&self, outcome: &core_sync::Result<DownloadOutcome>) {
        if !matches!(outcome, Ok(DownloadOutcome::Skipped)) {
            self.persist_cache().await;
        }
    }

    /// Failing to save the cache only costs a re-hash on the next start.
    async fn persist_cache(&self) {
        let Some(path) = &self.cache_path else {
            return;
        };
        if let Err(e) = self.coordinator.checksum_cache().persist_to(path).await {
            warn!(path = %path.display(), error = %e, "Failed to persist checksum cache");
        }
    }

    // ========================================================================
    // Control & Observation
    // ========================================================================

    /// Cancel the running pass. Returns `false` when nothing was running.
    pub async fn cancel(&self) -> bool {
        self.coordinator.cancel().await
    }

    /// Forget every cached digest, on disk as well.
    pub async fn clear_checksum_cache(&self) {
        self.coordinator.clear_checksum_cache().await;
        self.persist_cache().await;
    }

    pub fn state(&self) -> SessionState {
        self.coordinator.state()
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.event_bus.subscribe()
    }

    pub fn coordinator(&self) -> &Arc<ModSyncCoordinator> {
        &self.coordinator
    }
}

/// Remaining time of a transfer as shown to users: `"Xm Ys"`, or
/// `"Calculating..."` until enough bytes have arrived.
pub fn format_remaining_time(tracker: &TransferTracker) -> String {
    format_remaining(tracker.eta())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_tracker_is_calculating() {
        let tracker = TransferTracker::new(1024 * 1024);
        assert_eq!(format_remaining_time(&tracker), "Calculating...");
    }

    #[test]
    fn test_no_game_path_message() {
        assert!(CoreError::NoGamePath.to_string().contains("set_game_path"));
    }
}
