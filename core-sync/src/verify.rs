//! Post-download integrity verification.
//!
//! Always re-reads the file from disk; a cached digest would defeat the
//! check. A match is recorded in the checksum cache so the next
//! reconciliation pass does not hash the file again.

use crate::checksum::ChecksumCache;
use crate::inventory::stat_file;
use crate::Result;
use bridge_traits::FileSystemAccess;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of checking one downloaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// The content hash equals the published one.
    Matched { hash: String },
    /// The content hash differs from the published one.
    Mismatch { expected: String, actual: String },
    /// Nothing was published to compare against; accepted on size alone.
    NoHash,
}

impl Verification {
    pub fn is_verified(&self) -> bool {
        matches!(self, Verification::Matched { .. })
    }
}

pub struct IntegrityVerifier {
    fs: Arc<dyn FileSystemAccess>,
    cache: Arc<ChecksumCache>,
}

impl IntegrityVerifier {
    pub fn new(fs: Arc<dyn FileSystemAccess>, cache: Arc<ChecksumCache>) -> Self {
        Self { fs, cache }
    }

    /// Compare the file at `path` with `expected_hash` (lowercase hex).
    pub async fn verify(&self, name: &str, path: &Path, expected_hash: Option<&str>) -> Result<Verification> {
        let Some(expected) = expected_hash else {
            debug!(file = %name, "No published hash, skipping verification");
            return Ok(Verification::NoHash);
        };

        let (actual, size) = self.cache.file_checksum(path).await?;
        if !actual.eq_ignore_ascii_case(expected) {
            warn!(file = %name, expected = %expected, actual = %actual, "Integrity check failed");
            self.cache.invalidate(path).await;
            return Ok(Verification::Mismatch {
                expected: expected.to_string(),
                actual,
            });
        }

        let modified_at = stat_file(self.fs.as_ref(), path)
            .await?
            .and_then(|record| record.modified_at);
        self.cache
            .record(path, size, modified_at, actual.clone())
            .await;

        debug!(file = %name, "Integrity check passed");
        Ok(Verification::Matched { hash: actual })
    }
}
