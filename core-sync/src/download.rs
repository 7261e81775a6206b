//! # Download Orchestrator
//!
//! Executes a [`SyncPlan`] one file at a time.
//!
//! ## Per-file Workflow
//!
//! 1. Resolve the destination; unsafe names fail without touching disk
//! 2. Start a streamed GET of `<base>/<name>`
//! 3. Reject any status other than 200 before a byte is written
//! 4. Stream chunks to disk, emitting a progress event per chunk
//! 5. Verify the written file against the published hash, re-downloading up
//!    to `integrity_retries` times on mismatch
//!
//! A failed or cancelled transfer deletes its partial file. Per-file failures
//! are collected in the [`DownloadReport`]; only cancellation aborts the run.

use crate::plan::{remote_url, ModLayout, ResourceSource, SyncPlan, SyncPlanItem};
use crate::progress::{ProgressEvent, TransferTracker, DEFAULT_ETA_MIN_BYTES};
use crate::session::SessionId;
use crate::verify::{IntegrityVerifier, Verification};
use crate::{Result, SyncError};
use bridge_traits::http::{HttpClient, HttpRequest};
use bridge_traits::FileSystemAccess;
use core_runtime::config::RemoteEndpoints;
use core_runtime::events::{CoreEvent, DownloadEvent, EventBus};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

const CHUNK_SIZE: usize = 64 * 1024;

/// Tunables for a download run.
#[derive(Debug, Clone)]
pub struct DownloadSettings {
    /// Per-file request timeout
    pub request_timeout: Option<Duration>,
    /// Extra download attempts after a hash mismatch
    pub integrity_retries: u32,
    /// Bytes that must arrive before an ETA is reported
    pub eta_min_bytes: u64,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(3600)),
            integrity_retries: 0,
            eta_min_bytes: DEFAULT_ETA_MIN_BYTES,
        }
    }
}

/// Final state of one plan item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Written and its hash matched.
    Verified,
    /// Written; nothing was published to verify against.
    Unverified,
    /// Not written (or written and discarded).
    Failed { status: Option<u16>, message: String },
    /// Written but the content does not match; the file is kept.
    IntegrityMismatch { expected: String, actual: String },
}

impl ItemOutcome {
    pub fn is_synced(&self) -> bool {
        matches!(self, ItemOutcome::Verified | ItemOutcome::Unverified)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReport {
    pub name: String,
    pub source: ResourceSource,
    pub outcome: ItemOutcome,
    /// Bytes written by the last attempt
    pub bytes: u64,
    pub attempts: u32,
}

/// Summary of a download run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadReport {
    pub items: Vec<ItemReport>,
    pub bytes_downloaded: u64,
    pub duration: Duration,
}

impl DownloadReport {
    pub fn files_synced(&self) -> usize {
        self.items.iter().filter(|i| i.outcome.is_synced()).count()
    }

    pub fn files_failed(&self) -> usize {
        self.items.len() - self.files_synced()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ItemReport> {
        self.items.iter().filter(|i| !i.outcome.is_synced())
    }
}

pub struct DownloadOrchestrator {
    http: Arc<dyn HttpClient>,
    fs: Arc<dyn FileSystemAccess>,
    verifier: IntegrityVerifier,
    event_bus: Arc<EventBus>,
    endpoints: RemoteEndpoints,
    settings: DownloadSettings,
}

impl DownloadOrchestrator {
    pub fn new(
        http: Arc<dyn HttpClient>,
        fs: Arc<dyn FileSystemAccess>,
        verifier: IntegrityVerifier,
        event_bus: Arc<EventBus>,
        endpoints: RemoteEndpoints,
        settings: DownloadSettings,
    ) -> Self {
        Self {
            http,
            fs,
            verifier,
            event_bus,
            endpoints,
            settings,
        }
    }

    fn base_url(&self, source: ResourceSource) -> &str {
        match source {
            ResourceSource::Mods => &self.endpoints.mods_base_url,
            ResourceSource::Other => &self.endpoints.other_resources_url,
        }
    }

    /// Download every plan item in order.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` if `cancel` fires. All other failures are
    /// reported per item.
    #[instrument(skip(self, plan, layout, cancel), fields(session_id = %session_id, files = plan.len()))]
    pub async fn download(
        &self,
        plan: &SyncPlan,
        layout: &ModLayout,
        session_id: SessionId,
        cancel: &CancellationToken,
    ) -> Result<DownloadReport> {
        let started = Instant::now();
        let mut tracker =
            TransferTracker::new(plan.total_bytes).with_min_bytes_for_eta(self.settings.eta_min_bytes);
        let mut report = DownloadReport::default();

        info!(
            files = plan.len(),
            total_bytes = plan.total_bytes,
            "Starting downloads"
        );
        self.event_bus
            .emit(CoreEvent::Download(DownloadEvent::Started {
                session_id: session_id.to_string(),
                total_files: plan.len() as u64,
                total_bytes: plan.total_bytes,
            }))
            .ok();

        for item in &plan.items {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let item_report = self.download_item(item, layout, &mut tracker, cancel).await?;
            report.items.push(item_report);
        }

        report.bytes_downloaded = tracker.downloaded_bytes();
        report.duration = started.elapsed();

        info!(
            synced = report.files_synced(),
            failed = report.files_failed(),
            bytes = report.bytes_downloaded,
            "Downloads finished"
        );
        self.event_bus
            .emit(CoreEvent::Download(DownloadEvent::Completed {
                session_id: session_id.to_string(),
                files_synced: report.files_synced() as u64,
                files_failed: report.files_failed() as u64,
                bytes_downloaded: report.bytes_downloaded,
                duration_secs: report.duration.as_secs(),
            }))
            .ok();

        Ok(report)
    }

    async fn download_item(
        &self,
        item: &SyncPlanItem,
        layout: &ModLayout,
        tracker: &mut TransferTracker,
        cancel: &CancellationToken,
    ) -> Result<ItemReport> {
        let mut report = ItemReport {
            name: item.name.clone(),
            source: item.source,
            outcome: ItemOutcome::Unverified,
            bytes: 0,
            attempts: 0,
        };

        let path = match layout.local_path(item.source, &item.name) {
            Ok(path) => path,
            Err(e) => {
                warn!(file = %item.name, "Refusing to download unsafe file name");
                report.outcome = self.fail(&item.name, None, e.to_string());
                return Ok(report);
            }
        };
        let url = remote_url(self.base_url(item.source), &item.name);

        loop {
            report.attempts += 1;
            tracker.reset_file(&item.name);

            match self.transfer(item, &url, &path, tracker, cancel).await {
                Ok(bytes) => report.bytes = bytes,
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                Err(e) => {
                    let status = match &e {
                        SyncError::Download { status, .. } => Some(*status),
                        _ => None,
                    };
                    report.outcome = self.fail(&item.name, status, e.to_string());
                    return Ok(report);
                }
            }

            let verification = match self
                .verifier
                .verify(&item.name, &path, item.expected_hash.as_deref())
                .await
            {
                Ok(verification) => verification,
                Err(e) => {
                    report.outcome = self.fail(&item.name, None, e.to_string());
                    return Ok(report);
                }
            };

            match verification {
                Verification::Matched { .. } | Verification::NoHash => {
                    let verified = verification.is_verified();
                    report.outcome = if verified {
                        ItemOutcome::Verified
                    } else {
                        ItemOutcome::Unverified
                    };
                    self.event_bus
                        .emit(CoreEvent::Download(DownloadEvent::FileCompleted {
                            file_name: item.name.clone(),
                            verified,
                        }))
                        .ok();
                    return Ok(report);
                }
                Verification::Mismatch { expected, actual } => {
                    let err = SyncError::Integrity {
                        name: item.name.clone(),
                        expected: expected.clone(),
                        actual: actual.clone(),
                    };
                    error!(file = %item.name, attempt = report.attempts, "{}", err);
                    self.event_bus
                        .emit(CoreEvent::Download(DownloadEvent::IntegrityFailed {
                            file_name: item.name.clone(),
                            expected: expected.clone(),
                            actual: actual.clone(),
                        }))
                        .ok();

                    if report.attempts > self.settings.integrity_retries {
                        report.outcome = ItemOutcome::IntegrityMismatch { expected, actual };
                        return Ok(report);
                    }
                    info!(file = %item.name, "Re-downloading after integrity failure");
                }
            }
        }
    }

    fn fail(&self, name: &str, status: Option<u16>, message: String) -> ItemOutcome {
        error!(file = %name, status = ?status, "Download failed: {}", message);
        self.event_bus
            .emit(CoreEvent::Download(DownloadEvent::FileFailed {
                file_name: name.to_string(),
                status,
                message: message.clone(),
            }))
            .ok();
        ItemOutcome::Failed { status, message }
    }

    /// Stream one file to disk. Returns the number of bytes written.
    async fn transfer(
        &self,
        item: &SyncPlanItem,
        url: &str,
        path: &Path,
        tracker: &mut TransferTracker,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let mut request = HttpRequest::get(url);
        if let Some(timeout) = self.settings.request_timeout {
            request = request.timeout(timeout);
        }

        debug!(file = %item.name, url, "Requesting file");
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            response = self.http.download_stream(request) => response,
        };
        let mut stream = response.map_err(|e| SyncError::Transfer {
            name: item.name.clone(),
            message: e.to_string(),
        })?;

        if stream.status != 200 {
            return Err(SyncError::Download {
                name: item.name.clone(),
                status: stream.status,
            });
        }

        if let Some(parent) = path.parent() {
            self.fs
                .create_dir_all(parent)
                .await
                .map_err(|e| SyncError::filesystem(parent, e))?;
        }
        let mut writer = self
            .fs
            .open_write_stream(path)
            .await
            .map_err(|e| SyncError::filesystem(path, e))?;

        let total_size = stream.content_length.unwrap_or(0);
        let mut downloaded = 0u64;
        let mut buffer = vec![0u8; CHUNK_SIZE];

        let outcome: Result<()> = async {
            loop {
                let read = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                    read = stream.body.read(&mut buffer) => read.map_err(|e| SyncError::Transfer {
                        name: item.name.clone(),
                        message: e.to_string(),
                    })?,
                };
                if read == 0 {
                    break;
                }

                writer
                    .write_all(&buffer[..read])
                    .await
                    .map_err(|e| SyncError::filesystem(path, e))?;
                downloaded += read as u64;
                tracker.update(&item.name, downloaded);

                let progress = ProgressEvent::new(item.name.clone(), downloaded, total_size);
                self.event_bus
                    .emit(CoreEvent::Download(progress.into_download_event(tracker)))
                    .ok();
            }

            writer
                .shutdown()
                .await
                .map_err(|e| SyncError::filesystem(path, e))
        }
        .await;

        if let Err(e) = outcome {
            drop(writer);
            tracker.reset_file(&item.name);
            self.discard_partial(&item.name, path).await;
            return Err(e);
        }

        debug!(file = %item.name, bytes = downloaded, "File written");
        Ok(downloaded)
    }

    async fn discard_partial(&self, name: &str, path: &Path) {
        match self.fs.delete_file(path).await {
            Ok(()) => debug!(file = %name, "Removed partial file"),
            Err(e) => warn!(file = %name, error = %e, "Failed to remove partial file"),
        }
    }
}
