//! # Reconciliation Engine
//!
//! Diffs the remote listings against the local mod directories and produces
//! a [`SyncPlan`].
//!
//! ## Workflow
//!
//! 1. Fetch the manifest and the other-resource listing (no local mutation
//!    happens if either fails)
//! 2. Ensure the addons directory exists
//! 3. Delete orphans: regular files in the addons directory whose names are
//!    in neither listing
//! 4. Check every manifest entry: missing, unhashed, or hash-mismatched files
//!    are stale
//! 5. Check every other resource by existence and exact size
//! 6. Emit the plan: mods first, then other resources, each in listing order
//!
//! Per-file problems (stat or hash errors, unsafe names) mark that file
//! stale and never abort the pass.

use crate::checksum::ChecksumCache;
use crate::cleanup::{find_orphans, remove_orphans};
use crate::inventory::{list_file_names, stat_file};
use crate::manifest::{ManifestEntry, ManifestSource, OtherResourceEntry};
use crate::plan::{ModLayout, ResourceSource, SyncPlan, SyncPlanItem};
use crate::progress::rounded_percent;
use crate::session::SessionId;
use crate::{Result, SyncError};
use bridge_traits::FileSystemAccess;
use core_runtime::events::{CoreEvent, EventBus, VerificationEvent};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Why a listed file has to be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    Missing,
    NoHash,
    HashMismatch,
    SizeMismatch,
    InvalidName,
    Unreadable,
}

impl StaleReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StaleReason::Missing => "missing",
            StaleReason::NoHash => "no_hash",
            StaleReason::HashMismatch => "hash_mismatch",
            StaleReason::SizeMismatch => "size_mismatch",
            StaleReason::InvalidName => "invalid_name",
            StaleReason::Unreadable => "unreadable",
        }
    }
}

pub struct Reconciler {
    source: Arc<dyn ManifestSource>,
    fs: Arc<dyn FileSystemAccess>,
    cache: Arc<ChecksumCache>,
    event_bus: Arc<EventBus>,
    hash_concurrency: usize,
}

impl Reconciler {
    pub fn new(
        source: Arc<dyn ManifestSource>,
        fs: Arc<dyn FileSystemAccess>,
        cache: Arc<ChecksumCache>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            source,
            fs,
            cache,
            event_bus,
            hash_concurrency: crate::checksum::DEFAULT_HASH_CONCURRENCY,
        }
    }

    /// Number of manifest entries checked concurrently. Results are still
    /// consumed in manifest order.
    pub fn with_hash_concurrency(mut self, concurrency: usize) -> Self {
        self.hash_concurrency = concurrency.max(1);
        self
    }

    /// Fetch both listings, then reconcile against them.
    ///
    /// # Errors
    ///
    /// - `ManifestFetch` if either listing cannot be obtained
    /// - `Filesystem` if the addons directory cannot be created or listed
    /// - `Cancelled` if `cancel` fires before the plan is complete
    #[instrument(skip(self, layout, cancel), fields(session_id = %session_id, root = %layout.root().display()))]
    pub async fn run(
        &self,
        layout: &ModLayout,
        session_id: SessionId,
        cancel: &CancellationToken,
    ) -> Result<SyncPlan> {
        info!("Phase 1: Fetching remote listings");
        let manifest = self.source.fetch_manifest().await?;
        let other = self.source.fetch_other_resources().await?;
        info!(
            manifest_entries = manifest.len(),
            other_resources = other.len(),
            "Fetched remote listings"
        );

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        self.reconcile(&manifest, &other, layout, session_id, cancel)
            .await
    }

    /// Produce a plan for already-fetched listings.
    #[instrument(skip_all, fields(session_id = %session_id))]
    pub async fn reconcile(
        &self,
        manifest: &[ManifestEntry],
        other: &[OtherResourceEntry],
        layout: &ModLayout,
        session_id: SessionId,
        cancel: &CancellationToken,
    ) -> Result<SyncPlan> {
        let session = session_id.to_string();

        info!("Phase 2: Preparing local directories");
        self.fs
            .create_dir_all(layout.addons_dir())
            .await
            .map_err(|e| SyncError::filesystem(layout.addons_dir(), e))?;

        info!("Phase 3: Removing orphaned files");
        let local_names = list_file_names(self.fs.as_ref(), layout.addons_dir()).await?;
        let listed: HashSet<&str> = manifest
            .iter()
            .map(|e| e.name.as_str())
            .chain(other.iter().map(|e| e.name.as_str()))
            .collect();
        let orphans = find_orphans(&local_names, &listed);
        if !orphans.is_empty() {
            let report =
                remove_orphans(self.fs.as_ref(), &self.cache, layout.addons_dir(), &orphans).await;
            info!(
                removed = report.removed.len(),
                failed = report.failed.len(),
                "Orphan cleanup finished"
            );
            self.event_bus
                .emit(CoreEvent::Verification(VerificationEvent::OrphansRemoved {
                    session_id: session.clone(),
                    files: report.removed.clone(),
                    failed: report.failed_names(),
                }))
                .ok();
        }

        info!("Phase 4: Verifying {} listed files", manifest.len() + other.len());
        let total_files = (manifest.len() + other.len()) as u64;
        self.event_bus
            .emit(CoreEvent::Verification(VerificationEvent::Started {
                session_id: session.clone(),
                total_files,
            }))
            .ok();

        let mut items = Vec::new();
        let mut files_checked = 0u64;

        let mod_check_futures: Vec<BoxFuture<'_, (&ManifestEntry, Option<StaleReason>)>> = manifest
            .iter()
            .map(|entry| async move { (entry, self.check_mod(layout, entry).await) }.boxed())
            .collect();
        let mut mod_checks = stream::iter(mod_check_futures).buffered(self.hash_concurrency);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                next = mod_checks.next() => next,
            };
            let Some((entry, verdict)) = next else {
                break;
            };

            files_checked += 1;
            if let Some(reason) = verdict {
                debug!(file = %entry.name, reason = reason.as_str(), "File needs update");
                items.push(SyncPlanItem {
                    name: entry.name.clone(),
                    size: entry.size,
                    source: ResourceSource::Mods,
                    expected_hash: entry.expected_hash(),
                });
            }
            self.emit_progress(&session, &entry.name, files_checked, total_files);
        }

        for entry in other {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            files_checked += 1;
            if let Some(reason) = self.check_other(layout, entry).await {
                debug!(file = %entry.name, reason = reason.as_str(), "Resource needs update");
                items.push(SyncPlanItem {
                    name: entry.name.clone(),
                    size: entry.size,
                    source: ResourceSource::Other,
                    expected_hash: None,
                });
            }
            self.emit_progress(&session, &entry.name, files_checked, total_files);
        }

        let plan = SyncPlan::new(items, orphans);
        info!(
            files_to_fetch = plan.len(),
            total_bytes = plan.total_bytes,
            orphans = plan.orphans.len(),
            "Verification complete"
        );
        self.event_bus
            .emit(CoreEvent::Verification(VerificationEvent::Completed {
                session_id: session,
                files_to_fetch: plan.len() as u64,
                total_bytes: plan.total_bytes,
            }))
            .ok();

        Ok(plan)
    }

    /// `None` when the local copy is present and its hash matches.
    async fn check_mod(&self, layout: &ModLayout, entry: &ManifestEntry) -> Option<StaleReason> {
        let path = match layout.local_path(ResourceSource::Mods, &entry.name) {
            Ok(path) => path,
            Err(e) => {
                warn!(file = %entry.name, error = %e, "Rejecting manifest entry");
                return Some(StaleReason::InvalidName);
            }
        };

        let record = match stat_file(self.fs.as_ref(), &path).await {
            Ok(Some(record)) => record,
            Ok(None) => return Some(StaleReason::Missing),
            Err(e) => {
                warn!(file = %entry.name, error = %e, "Failed to stat local file");
                return Some(StaleReason::Unreadable);
            }
        };

        let Some(expected) = entry.expected_hash() else {
            return Some(StaleReason::NoHash);
        };

        match self.cache.hash_of_record(&record).await {
            Ok(actual) if actual == expected => None,
            Ok(actual) => {
                debug!(file = %entry.name, expected = %expected, actual = %actual, "Hash mismatch");
                Some(StaleReason::HashMismatch)
            }
            Err(e) => {
                warn!(file = %entry.name, error = %e, "Failed to hash local file");
                Some(StaleReason::Unreadable)
            }
        }
    }

    /// Size-only check; other resources carry no hash.
    async fn check_other(&self, layout: &ModLayout, entry: &OtherResourceEntry) -> Option<StaleReason> {
        let path = match layout.local_path(ResourceSource::Other, &entry.name) {
            Ok(path) => path,
            Err(e) => {
                warn!(file = %entry.name, error = %e, "Rejecting other resource");
                return Some(StaleReason::InvalidName);
            }
        };

        match stat_file(self.fs.as_ref(), &path).await {
            Ok(Some(record)) if record.size == entry.size => None,
            Ok(Some(_)) => Some(StaleReason::SizeMismatch),
            Ok(None) => Some(StaleReason::Missing),
            Err(e) => {
                warn!(file = %entry.name, error = %e, "Failed to stat local resource");
                Some(StaleReason::Unreadable)
            }
        }
    }

    fn emit_progress(&self, session: &str, file_name: &str, files_checked: u64, total_files: u64) {
        self.event_bus
            .emit(CoreEvent::Verification(VerificationEvent::Progress {
                session_id: session.to_string(),
                file_name: file_name.to_string(),
                files_checked,
                total_files,
                percent: rounded_percent(files_checked, total_files),
            }))
            .ok();
    }
}
