//! File System Access Implementation using Tokio

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{FileMetadata, FileSystemAccess},
};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

const APP_DIR_NAME: &str = "modsync";

/// Tokio-based file system implementation
///
/// Async file I/O over `tokio::fs`, with the application data directory
/// resolved through `dirs`.
pub struct TokioFileSystem {
    data_dir: PathBuf,
}

impl TokioFileSystem {
    /// Create a new file system accessor with the platform data directory
    pub fn new() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".local")
                    .join("share")
            })
            .join(APP_DIR_NAME);

        Self { data_dir }
    }

    /// Create a new file system accessor rooted at a custom data directory
    pub fn with_data_directory(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    /// Convert std::io::Error to BridgeError
    fn map_io_error(path: &Path) -> impl FnOnce(std::io::Error) -> BridgeError + '_ {
        move |e| match e.kind() {
            std::io::ErrorKind::NotFound => BridgeError::NotFound(path.display().to_string()),
            _ => BridgeError::Io(e),
        }
    }
}

impl Default for TokioFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystemAccess for TokioFileSystem {
    async fn get_data_directory(&self) -> Result<PathBuf> {
        // Ensure data directory exists
        if !self.data_dir.exists() {
            fs::create_dir_all(&self.data_dir)
                .await
                .map_err(Self::map_io_error(&self.data_dir))?;
            debug!(path = ?self.data_dir, "Created data directory");
        }
        Ok(self.data_dir.clone())
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(fs::try_exists(path)
            .await
            .map_err(Self::map_io_error(path))?)
    }

    async fn metadata(&self, path: &Path) -> Result<FileMetadata> {
        let metadata = fs::metadata(path).await.map_err(Self::map_io_error(path))?;

        Ok(FileMetadata {
            size: metadata.len(),
            modified_at: metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64),
            is_directory: metadata.is_dir(),
        })
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)
            .await
            .map_err(Self::map_io_error(path))?;
        debug!(path = ?path, "Created directory");
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> Result<Bytes> {
        let data = fs::read(path).await.map_err(Self::map_io_error(path))?;
        debug!(path = ?path, size = data.len(), "Read file");
        Ok(Bytes::from(data))
    }

    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            self.create_dir_all(parent).await?;
        }

        fs::write(path, data.as_ref())
            .await
            .map_err(Self::map_io_error(path))?;
        debug!(path = ?path, size = data.len(), "Wrote file");
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).await.map_err(Self::map_io_error(path))?;
        debug!(path = ?path, "Deleted file");
        Ok(())
    }

    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        let mut read_dir = fs::read_dir(path).await.map_err(Self::map_io_error(path))?;

        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(Self::map_io_error(path))?
        {
            entries.push(entry.path());
        }

        debug!(path = ?path, count = entries.len(), "Listed directory");
        Ok(entries)
    }

    async fn open_read_stream(
        &self,
        path: &Path,
    ) -> Result<Box<dyn tokio::io::AsyncRead + Send + Unpin>> {
        let file = fs::File::open(path).await.map_err(Self::map_io_error(path))?;
        debug!(path = ?path, "Opened file for reading");
        Ok(Box::new(file))
    }

    async fn open_write_stream(
        &self,
        path: &Path,
    ) -> Result<Box<dyn tokio::io::AsyncWrite + Send + Unpin>> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            self.create_dir_all(parent).await?;
        }

        let file = fs::File::create(path).await.map_err(Self::map_io_error(path))?;
        debug!(path = ?path, "Opened file for writing");
        Ok(Box::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_custom_data_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        let fs = TokioFileSystem::with_data_directory(data.clone());

        let resolved = fs.get_data_directory().await.unwrap();
        assert_eq!(resolved, data);
        assert!(fs.exists(&data).await.unwrap());
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let fs = TokioFileSystem::with_data_directory(dir.path().to_path_buf());
        let test_file = dir.path().join("@A3URL").join("addons").join("mod.pbo");

        let data = Bytes::from("Hello, World!");
        fs.write_file(&test_file, data.clone()).await.unwrap();

        let read_data = fs.read_file(&test_file).await.unwrap();
        assert_eq!(data, read_data);

        let metadata = fs.metadata(&test_file).await.unwrap();
        assert_eq!(metadata.size, 13);
        assert!(!metadata.is_directory);

        fs.delete_file(&test_file).await.unwrap();
        assert!(!fs.exists(&test_file).await.unwrap());
    }

    #[tokio::test]
    async fn test_streams_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let fs = TokioFileSystem::with_data_directory(dir.path().to_path_buf());
        let path = dir.path().join("nested").join("stream.bin");

        let mut writer = fs.open_write_stream(&path).await.unwrap();
        writer.write_all(b"chunk-1").await.unwrap();
        writer.write_all(b"chunk-2").await.unwrap();
        writer.shutdown().await.unwrap();
        drop(writer);

        let mut reader = fs.open_read_stream(&path).await.unwrap();
        let mut contents = Vec::new();
        reader.read_to_end(&mut contents).await.unwrap();
        assert_eq!(contents, b"chunk-1chunk-2");
    }

    #[tokio::test]
    async fn test_list_directory_and_missing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let fs = TokioFileSystem::with_data_directory(dir.path().to_path_buf());

        fs.write_file(&dir.path().join("a.pbo"), Bytes::from("a"))
            .await
            .unwrap();
        fs.write_file(&dir.path().join("b.pbo"), Bytes::from("b"))
            .await
            .unwrap();

        let mut names: Vec<String> = fs
            .list_directory(dir.path())
            .await
            .unwrap()
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.pbo", "b.pbo"]);

        let missing = dir.path().join("missing.pbo");
        assert!(matches!(
            fs.metadata(&missing).await,
            Err(BridgeError::NotFound(_))
        ));
    }
}
