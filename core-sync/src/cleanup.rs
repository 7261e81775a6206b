//! Orphan cleanup.
//!
//! Deletion is best-effort: a file that cannot be removed is reported and
//! the remaining orphans are still processed.

use crate::checksum::ChecksumCache;
use bridge_traits::FileSystemAccess;
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use tracing::{debug, warn};

/// Outcome of deleting a set of orphans.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: Vec<String>,
    /// `(name, error message)` for each file that could not be deleted
    pub failed: Vec<(String, String)>,
}

impl CleanupReport {
    pub fn failed_names(&self) -> Vec<String> {
        self.failed.iter().map(|(name, _)| name.clone()).collect()
    }
}

/// Local names absent from the set of remotely listed names.
pub fn find_orphans<'a>(
    local_names: impl IntoIterator<Item = &'a String>,
    listed: &HashSet<&str>,
) -> BTreeSet<String> {
    local_names
        .into_iter()
        .filter(|name| !listed.contains(name.as_str()))
        .cloned()
        .collect()
}

/// Delete every orphan in `directory`, dropping their cache entries.
pub async fn remove_orphans(
    fs: &dyn FileSystemAccess,
    cache: &ChecksumCache,
    directory: &Path,
    orphans: &BTreeSet<String>,
) -> CleanupReport {
    let mut report = CleanupReport::default();

    for name in orphans {
        let path = directory.join(name);
        match fs.delete_file(&path).await {
            Ok(()) => {
                debug!(file = %name, "Deleted orphaned file");
                cache.invalidate(&path).await;
                report.removed.push(name.clone());
            }
            Err(e) => {
                warn!(file = %name, error = %e, "Failed to delete orphaned file");
                report.failed.push((name.clone(), e.to_string()));
            }
        }
    }

    report
}
