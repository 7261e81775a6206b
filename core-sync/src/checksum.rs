//! # Checksum Cache
//!
//! Memoizes SHA-256 digests of local files keyed by path and size.
//!
//! ## Overview
//!
//! Hashing every addon on every pass is expensive, so a digest computed once
//! is reused for as long as the file keeps the size it had when it was
//! hashed. A size change discards the entry. Modification time can be used
//! as a second invalidation signal, but it is off by default because
//! timestamp resolution varies between file systems.
//!
//! [`ChecksumCache::file_checksum`] always reads the file and never consults
//! the cache. It is what post-download verification uses.
//!
//! ## Persistence
//!
//! The cache can be saved to and loaded from a JSON snapshot so that a
//! restart does not force a full re-hash:
//!
//! ```json
//! { "version": 1, "entries": [ { "path": "...", "size": 100, "hash": "...", ... } ] }
//! ```

use crate::inventory::{stat_file, LocalFileRecord};
use crate::{Result, SyncError};
use bridge_traits::time::{Clock, SystemClock};
use bridge_traits::{BridgeError, FileSystemAccess};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

const READ_BUFFER_SIZE: usize = 64 * 1024;
const SNAPSHOT_VERSION: u32 = 1;

/// Default number of files hashed concurrently by [`ChecksumCache::hash_of_batch`].
pub const DEFAULT_HASH_CONCURRENCY: usize = 4;

/// A memoized digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub path: PathBuf,
    /// Size of the file when it was hashed; the entry is valid only while
    /// the file still has this size
    pub size: u64,
    #[serde(default)]
    pub modified_at: Option<i64>,
    /// Lowercase hex SHA-256
    pub hash: String,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheSnapshot {
    version: u32,
    entries: Vec<CacheEntry>,
}

/// Thread-safe digest cache shared by the reconciler and the verifier.
pub struct ChecksumCache {
    fs: Arc<dyn FileSystemAccess>,
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<PathBuf, CacheEntry>>,
    invalidate_on_mtime: bool,
    concurrency: usize,
}

impl ChecksumCache {
    pub fn new(fs: Arc<dyn FileSystemAccess>) -> Self {
        Self {
            fs,
            clock: Arc::new(SystemClock),
            entries: RwLock::new(HashMap::new()),
            invalidate_on_mtime: false,
            concurrency: DEFAULT_HASH_CONCURRENCY,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Also discard entries whose recorded modification time differs from
    /// the file's current one.
    pub fn with_mtime_invalidation(mut self, enabled: bool) -> Self {
        self.invalidate_on_mtime = enabled;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    // ------------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------------

    /// Digest of `path`, whose current size the caller observed as
    /// `expected_size`.
    ///
    /// Returns the cached digest without reading the file when an entry with
    /// the same size exists. Otherwise hashes the file and stores the result.
    pub async fn hash_of(&self, path: &Path, expected_size: u64) -> Result<String> {
        let record = LocalFileRecord {
            path: path.to_path_buf(),
            size: expected_size,
            modified_at: None,
        };
        self.hash_of_record(&record).await
    }

    /// Same as [`hash_of`](Self::hash_of) for a full stat record, which lets
    /// the modification time take part in invalidation.
    pub async fn hash_of_record(&self, record: &LocalFileRecord) -> Result<String> {
        if let Some(hash) = self.lookup(record).await {
            debug!(file = %record.path.display(), "Checksum cache hit");
            return Ok(hash);
        }

        let (hash, size) = self.file_checksum(&record.path).await?;
        if size != record.size {
            debug!(
                file = %record.path.display(),
                expected = record.size,
                actual = size,
                "File size changed while hashing"
            );
        }
        self.insert(&record.path, size, record.modified_at, hash.clone())
            .await;
        Ok(hash)
    }

    /// Digests for several files, hashed concurrently.
    ///
    /// Files that are missing or cannot be read are left out of the result.
    #[instrument(skip(self, paths), fields(files = paths.len()))]
    pub async fn hash_of_batch(&self, paths: &[PathBuf]) -> HashMap<PathBuf, String> {
        stream::iter(paths.iter().cloned())
            .map(|path| async move {
                let outcome = match stat_file(self.fs.as_ref(), &path).await {
                    Ok(Some(record)) => self.hash_of_record(&record).await.map(Some),
                    Ok(None) => Ok(None),
                    Err(e) => Err(e),
                };
                (path, outcome)
            })
            .buffer_unordered(self.concurrency)
            .filter_map(|(path, outcome)| async move {
                match outcome {
                    Ok(Some(hash)) => Some((path, hash)),
                    Ok(None) => None,
                    Err(e) => {
                        warn!(file = %path.display(), error = %e, "Failed to hash file");
                        None
                    }
                }
            })
            .collect()
            .await
    }

    /// Hash a file from disk, bypassing the cache.
    ///
    /// Returns the lowercase hex SHA-256 and the number of bytes read.
    pub async fn file_checksum(&self, path: &Path) -> Result<(String, u64)> {
        let mut reader = self
            .fs
            .open_read_stream(path)
            .await
            .map_err(|e| SyncError::filesystem(path, e))?;

        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];
        let mut total = 0u64;
        loop {
            let read = reader
                .read(&mut buffer)
                .await
                .map_err(|e| SyncError::filesystem(path, e))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
            total += read as u64;
        }

        Ok((hex::encode(hasher.finalize()), total))
    }

    async fn lookup(&self, record: &LocalFileRecord) -> Option<String> {
        let entries = self.entries.read().await;
        let entry = entries.get(&record.path)?;
        if entry.size != record.size {
            return None;
        }
        if self.invalidate_on_mtime {
            if let (Some(cached), Some(current)) = (entry.modified_at, record.modified_at) {
                if cached != current {
                    return None;
                }
            }
        }
        Some(entry.hash.clone())
    }

    // ------------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------------

    /// Store a digest computed elsewhere (e.g. after a verified download).
    pub async fn record(&self, path: &Path, size: u64, modified_at: Option<i64>, hash: String) {
        self.insert(path, size, modified_at, hash).await;
    }

    async fn insert(&self, path: &Path, size: u64, modified_at: Option<i64>, hash: String) {
        let entry = CacheEntry {
            path: path.to_path_buf(),
            size,
            modified_at,
            hash,
            computed_at: self.clock.now(),
        };
        self.entries.write().await.insert(path.to_path_buf(), entry);
    }

    pub async fn invalidate(&self, path: &Path) -> bool {
        self.entries.write().await.remove(path).is_some()
    }

    /// Forget every digest; the next pass re-hashes everything.
    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        let count = entries.len();
        entries.clear();
        debug!(entries = count, "Cleared checksum cache");
    }

    pub async fn get(&self, path: &Path) -> Option<CacheEntry> {
        self.entries.read().await.get(path).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    /// Merge a snapshot from `path` into the cache.
    ///
    /// A missing or unreadable snapshot leaves the cache untouched and is not
    /// an error. Returns the number of entries loaded.
    pub async fn load_from(&self, path: &Path) -> Result<usize> {
        let data = match self.fs.read_file(path).await {
            Ok(data) => data,
            Err(BridgeError::NotFound(_)) => return Ok(0),
            Err(e) => return Err(SyncError::filesystem(path, e)),
        };

        let snapshot: CacheSnapshot = match serde_json::from_slice(&data) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring corrupt checksum cache");
                return Ok(0);
            }
        };
        if snapshot.version != SNAPSHOT_VERSION {
            warn!(
                path = %path.display(),
                version = snapshot.version,
                "Ignoring checksum cache with unknown version"
            );
            return Ok(0);
        }

        let mut entries = self.entries.write().await;
        let count = snapshot.entries.len();
        for entry in snapshot.entries {
            entries.insert(entry.path.clone(), entry);
        }
        debug!(path = %path.display(), entries = count, "Loaded checksum cache");
        Ok(count)
    }

    /// Write the current entries to `path`.
    pub async fn persist_to(&self, path: &Path) -> Result<()> {
        let snapshot = {
            let entries = self.entries.read().await;
            let mut entries: Vec<CacheEntry> = entries.values().cloned().collect();
            entries.sort_by(|a, b| a.path.cmp(&b.path));
            CacheSnapshot {
                version: SNAPSHOT_VERSION,
                entries,
            }
        };

        let json = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| SyncError::Cache(format!("Failed to serialize cache: {}", e)))?;
        self.fs
            .write_file(path, Bytes::from(json))
            .await
            .map_err(|e| SyncError::filesystem(path, e))?;

        debug!(path = %path.display(), entries = snapshot.entries.len(), "Saved checksum cache");
        Ok(())
    }
}
