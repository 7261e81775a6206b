//! Storage and File System Abstractions
//!
//! Platform-agnostic traits for local file I/O and persisted key-value
//! settings.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// File metadata information
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub size: u64,
    /// Last modification time, Unix seconds
    pub modified_at: Option<i64>,
    pub is_directory: bool,
}

/// File system access trait
///
/// Abstracts the file operations the sync engine performs against the game
/// installation tree and its own data directory.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::FileSystemAccess;
///
/// async fn addon_names(fs: &dyn FileSystemAccess, addons: &Path) -> Result<Vec<String>> {
///     let entries = fs.list_directory(addons).await?;
///     Ok(entries
///         .iter()
///         .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
///         .collect())
/// }
/// ```
#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    /// Get the application's data directory
    ///
    /// Persistent state (checksum cache, settings database) lives here.
    async fn get_data_directory(&self) -> Result<PathBuf>;

    /// Check if a file or directory exists
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Get file metadata
    async fn metadata(&self, path: &Path) -> Result<FileMetadata>;

    /// Create a directory and all parent directories
    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Read entire file contents
    async fn read_file(&self, path: &Path) -> Result<Bytes>;

    /// Write data to a file, replacing it if it exists
    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()>;

    /// Delete a file
    async fn delete_file(&self, path: &Path) -> Result<()>;

    /// List the immediate entries of a directory
    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Open a file for streaming reads
    async fn open_read_stream(
        &self,
        path: &Path,
    ) -> Result<Box<dyn tokio::io::AsyncRead + Send + Unpin>>;

    /// Create or truncate a file for streaming writes
    async fn open_write_stream(
        &self,
        path: &Path,
    ) -> Result<Box<dyn tokio::io::AsyncWrite + Send + Unpin>>;
}

/// Key-value settings storage trait
///
/// Holds user configuration that must survive restarts, such as the game
/// installation root.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::SettingsStore;
///
/// async fn remember_root(store: &dyn SettingsStore, root: &str) -> Result<()> {
///     store.set_string("mods.game_path", root).await
/// }
/// ```
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Store a string value
    async fn set_string(&self, key: &str, value: &str) -> Result<()>;

    /// Retrieve a string value
    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    /// Delete a setting
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check if a setting exists
    async fn has_key(&self, key: &str) -> Result<bool> {
        Ok(self.get_string(key).await?.is_some())
    }
}
