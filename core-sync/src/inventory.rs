//! Local inventory: stat and list files under the mod directories.
//!
//! Records are never persisted; every pass re-reads the file system.

use crate::{Result, SyncError};
use bridge_traits::{BridgeError, FileSystemAccess};
use std::path::{Path, PathBuf};
use tracing::warn;

/// What a stat of one local file observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileRecord {
    pub path: PathBuf,
    pub size: u64,
    /// Unix seconds, when the platform reports it
    pub modified_at: Option<i64>,
}

/// Stat a regular file. Missing paths and directories yield `None`.
pub async fn stat_file(fs: &dyn FileSystemAccess, path: &Path) -> Result<Option<LocalFileRecord>> {
    match fs.metadata(path).await {
        Ok(meta) if meta.is_directory => Ok(None),
        Ok(meta) => Ok(Some(LocalFileRecord {
            path: path.to_path_buf(),
            size: meta.size,
            modified_at: meta.modified_at,
        })),
        Err(BridgeError::NotFound(_)) => Ok(None),
        Err(e) => Err(SyncError::filesystem(path, e)),
    }
}

/// Names of the regular files directly inside `dir`.
///
/// Subdirectories are not descended into and are not reported. Entries that
/// cannot be stat'ed are skipped with a warning; only a failure to read the
/// directory itself is an error.
pub async fn list_file_names(fs: &dyn FileSystemAccess, dir: &Path) -> Result<Vec<String>> {
    let entries = fs
        .list_directory(dir)
        .await
        .map_err(|e| SyncError::filesystem(dir, e))?;

    let mut names = Vec::with_capacity(entries.len());
    for entry in entries {
        match stat_file(fs, &entry).await {
            Ok(Some(_)) => {}
            Ok(None) => continue,
            Err(e) => {
                warn!(file = %entry.display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        }
        if let Some(name) = entry.file_name() {
            names.push(name.to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_desktop::TokioFileSystem;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_stat_file() {
        let dir = tempfile::tempdir().unwrap();
        let fs = TokioFileSystem::with_data_directory(dir.path().to_path_buf());
        let path = dir.path().join("a.pbo");
        fs.write_file(&path, Bytes::from_static(b"hello")).await.unwrap();

        let record = stat_file(&fs, &path).await.unwrap().unwrap();
        assert_eq!(record.size, 5);
        assert_eq!(record.path, path);

        assert!(stat_file(&fs, &dir.path().join("missing.pbo"))
            .await
            .unwrap()
            .is_none());
        assert!(stat_file(&fs, dir.path()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_file_names_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        let fs = TokioFileSystem::with_data_directory(dir.path().to_path_buf());
        fs.write_file(&dir.path().join("b.pbo"), Bytes::from_static(b"b"))
            .await
            .unwrap();
        fs.write_file(&dir.path().join("a.pbo"), Bytes::from_static(b"a"))
            .await
            .unwrap();
        fs.create_dir_all(&dir.path().join("keys")).await.unwrap();

        let names = list_file_names(&fs, dir.path()).await.unwrap();
        assert_eq!(names, vec!["a.pbo".to_string(), "b.pbo".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_list_file_names_skips_unstatable_entries() {
        let dir = tempfile::tempdir().unwrap();
        let fs = TokioFileSystem::with_data_directory(dir.path().to_path_buf());
        fs.write_file(&dir.path().join("a.pbo"), Bytes::from_static(b"a"))
            .await
            .unwrap();
        // Stat on either link fails with ELOOP.
        std::os::unix::fs::symlink(dir.path().join("loop_b"), dir.path().join("loop_a")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("loop_a"), dir.path().join("loop_b")).unwrap();
        assert!(stat_file(&fs, &dir.path().join("loop_a")).await.is_err());

        let names = list_file_names(&fs, dir.path()).await.unwrap();
        assert_eq!(names, vec!["a.pbo".to_string()]);
    }

    #[tokio::test]
    async fn test_list_missing_directory_is_filesystem_error() {
        let dir = tempfile::tempdir().unwrap();
        let fs = TokioFileSystem::with_data_directory(dir.path().to_path_buf());

        let err = list_file_names(&fs, &dir.path().join("absent"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Filesystem { .. }));
    }
}
