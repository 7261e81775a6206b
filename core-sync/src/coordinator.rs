//! # Mod Sync Coordinator
//!
//! Drives check and download passes over a game installation and owns the
//! session state.
//!
//! ## Overview
//!
//! The `ModSyncCoordinator` ties the engine together:
//! - Guards the session so only one pass runs at a time
//! - Runs the [`Reconciler`] to produce a plan (`check`)
//! - Runs the [`DownloadOrchestrator`] over the pending plan and re-verifies
//!   afterwards (`download`)
//! - Threads a cancellation token and an optional whole-pass deadline through
//!   both
//! - Emits session lifecycle events via `EventBus`
//!
//! ## Workflow
//!
//! ### Check
//! 1. `Idle | Ready | NeedsUpdate → Verifying` (skipped if a pass is running)
//! 2. Reconcile; the plan is kept as the pending plan
//! 3. `Verifying → Ready` (empty plan) or `→ NeedsUpdate`
//!
//! ### Download
//! 1. `NeedsUpdate → Downloading`
//! 2. Download every pending item
//! 3. `Downloading → Verifying`, reconcile again
//! 4. `Verifying → Ready | NeedsUpdate`
//!
//! Any pass-level failure or cancellation moves the session to `Idle`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{CheckOutcome, ModSyncCoordinator, SyncConfig};
//!
//! # async fn example(coordinator: ModSyncCoordinator) -> core_sync::Result<()> {
//! match coordinator.check(Path::new("C:/Games/Arma 3")).await? {
//!     CheckOutcome::Ready => println!("Up to date"),
//!     CheckOutcome::NeedsUpdate(plan) => {
//!         println!("{} files, {} bytes to fetch", plan.len(), plan.total_bytes);
//!         coordinator.download(Path::new("C:/Games/Arma 3")).await?;
//!     }
//!     CheckOutcome::Skipped => println!("A pass is already running"),
//! }
//! # Ok(())
//! # }
//! ```

use crate::checksum::{ChecksumCache, DEFAULT_HASH_CONCURRENCY};
use crate::download::{DownloadOrchestrator, DownloadReport, DownloadSettings};
use crate::manifest::{HttpManifestSource, ManifestSource};
use crate::plan::{ModLayout, SyncPlan};
use crate::progress::DEFAULT_ETA_MIN_BYTES;
use crate::reconcile::Reconciler;
use crate::session::{Session, SessionId, SessionState};
use crate::verify::IntegrityVerifier;
use crate::{Result, SyncError};
use bridge_traits::http::HttpClient;
use bridge_traits::FileSystemAccess;
use core_runtime::config::RemoteEndpoints;
use core_runtime::events::{CoreEvent, EventBus, SessionEvent};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Sync coordinator configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Mod folder name without the `@` (`A3URL` gives `@A3URL/`)
    pub mod_prefix: String,

    /// Subdirectory of the mod folder that holds manifest-listed files
    pub addons_dir: String,

    /// Extra downloads attempted after a hash mismatch
    pub integrity_retries: u32,

    /// Bytes that must be downloaded before an ETA is reported
    pub eta_min_bytes: u64,

    /// Files hashed concurrently during verification
    pub hash_concurrency: usize,

    /// Timeout for an individual file request (seconds)
    pub download_timeout_secs: Option<u64>,

    /// Deadline for a whole check or download pass (seconds)
    pub pass_timeout_secs: Option<u64>,

    /// Treat a changed modification time as a checksum cache miss
    pub invalidate_cache_on_mtime: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mod_prefix: "A3URL".to_string(),
            addons_dir: "addons".to_string(),
            integrity_retries: 0,
            eta_min_bytes: DEFAULT_ETA_MIN_BYTES,
            hash_concurrency: DEFAULT_HASH_CONCURRENCY,
            download_timeout_secs: Some(3600), // 1 hour per file
            pass_timeout_secs: None,
            invalidate_cache_on_mtime: false,
        }
    }
}

/// Result of a check pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Nothing to fetch.
    Ready,
    /// Files must be fetched; the plan is kept for [`ModSyncCoordinator::download`].
    NeedsUpdate(SyncPlan),
    /// Another pass was running; nothing was done.
    Skipped,
}

/// Result of a download (or full sync) pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Another pass was running; nothing was done.
    Skipped,
    /// The installation was already up to date.
    NothingToDo,
    /// Downloads ran and the installation was verified again.
    Completed {
        report: DownloadReport,
        after: CheckOutcome,
    },
}

/// Active pass tracking
struct ActivePass {
    session_id: SessionId,
    cancellation_token: CancellationToken,
}

/// Plan from the last check, bound to the root it was computed for
struct PendingPlan {
    root: PathBuf,
    plan: SyncPlan,
}

/// Coordinator for check and download passes
pub struct ModSyncCoordinator {
    /// Configuration
    config: SyncConfig,

    /// Event bus for session, verification, and download events
    event_bus: Arc<EventBus>,

    /// Session state and pass guard
    session: Session,

    reconciler: Reconciler,
    downloader: DownloadOrchestrator,
    cache: Arc<ChecksumCache>,

    /// Running pass, if any
    active: Mutex<Option<ActivePass>>,

    /// Plan awaiting download
    pending: Mutex<Option<PendingPlan>>,
}

impl ModSyncCoordinator {
    /// Create a coordinator that reads listings from `endpoints` over HTTP.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the endpoint extensions or layout settings are
    /// invalid.
    pub fn new(
        config: SyncConfig,
        endpoints: RemoteEndpoints,
        http: Arc<dyn HttpClient>,
        fs: Arc<dyn FileSystemAccess>,
        event_bus: Arc<EventBus>,
    ) -> Result<Self> {
        let source = Arc::new(HttpManifestSource::new(http.clone(), endpoints.clone())?);
        Self::with_manifest_source(config, endpoints, http, fs, source, event_bus)
    }

    /// Create a coordinator with a custom listing source.
    pub fn with_manifest_source(
        config: SyncConfig,
        endpoints: RemoteEndpoints,
        http: Arc<dyn HttpClient>,
        fs: Arc<dyn FileSystemAccess>,
        source: Arc<dyn ManifestSource>,
        event_bus: Arc<EventBus>,
    ) -> Result<Self> {
        // Fail early on a bad prefix rather than on the first pass.
        ModLayout::new("", &config.mod_prefix, &config.addons_dir)?;

        let cache = Arc::new(
            ChecksumCache::new(fs.clone())
                .with_concurrency(config.hash_concurrency)
                .with_mtime_invalidation(config.invalidate_cache_on_mtime),
        );

        let reconciler = Reconciler::new(source, fs.clone(), cache.clone(), event_bus.clone())
            .with_hash_concurrency(config.hash_concurrency);

        let downloader = DownloadOrchestrator::new(
            http,
            fs.clone(),
            IntegrityVerifier::new(fs, cache.clone()),
            event_bus.clone(),
            endpoints,
            DownloadSettings {
                request_timeout: config.download_timeout_secs.map(Duration::from_secs),
                integrity_retries: config.integrity_retries,
                eta_min_bytes: config.eta_min_bytes,
            },
        );

        info!(
            mod_prefix = %config.mod_prefix,
            integrity_retries = config.integrity_retries,
            "Created mod sync coordinator"
        );

        Ok(Self {
            config,
            event_bus,
            session: Session::new(),
            reconciler,
            downloader,
            cache,
            active: Mutex::new(None),
            pending: Mutex::new(None),
        })
    }

    fn layout(&self, root: &Path) -> Result<ModLayout> {
        ModLayout::new(root, &self.config.mod_prefix, &self.config.addons_dir)
    }

    // ========================================================================
    // Passes
    // ========================================================================

    /// Verify the installation at `root` and compute what must be fetched.
    ///
    /// Returns `Skipped` without error when another pass is running.
    #[instrument(skip(self), fields(root = %root.display()))]
    pub async fn check(&self, root: &Path) -> Result<CheckOutcome> {
        let layout = self.layout(root)?;

        let Some(previous) = self.session.try_begin(SessionState::Verifying)? else {
            info!(state = %self.session.state(), "Pass already running, skipping check");
            return Ok(CheckOutcome::Skipped);
        };

        let session_id = SessionId::new();
        self.emit_state(session_id, previous, SessionState::Verifying);
        let token = self.register(session_id).await;

        let result = self
            .with_deadline(&token, self.reconciler.run(&layout, session_id, &token))
            .await;
        self.unregister().await;

        match result {
            Ok(plan) => self.finish_verification(session_id, root, plan).await,
            Err(e) => Err(self.fail_pass(session_id, e).await),
        }
    }

    /// Download the plan produced by the last check of `root`, then verify
    /// again.
    ///
    /// # Errors
    ///
    /// - `InvalidStateTransition` if no check has produced a plan yet
    /// - `InvalidState` if the pending plan belongs to another root
    /// - `Cancelled` / `Timeout` if the pass was interrupted
    #[instrument(skip(self), fields(root = %root.display()))]
    pub async fn download(&self, root: &Path) -> Result<DownloadOutcome> {
        let layout = self.layout(root)?;

        if self.session.state() == SessionState::Ready {
            return Ok(DownloadOutcome::NothingToDo);
        }
        let Some(previous) = self.session.try_begin(SessionState::Downloading)? else {
            info!(state = %self.session.state(), "Pass already running, skipping download");
            return Ok(DownloadOutcome::Skipped);
        };

        let session_id = SessionId::new();
        self.emit_state(session_id, previous, SessionState::Downloading);

        let plan = match self.pending.lock().await.take() {
            Some(pending) if pending.root == root => pending.plan,
            _ => {
                let err = SyncError::InvalidState(
                    "No pending plan for this game path; run a check first".to_string(),
                );
                return Err(self.fail_pass(session_id, err).await);
            }
        };

        let token = self.register(session_id).await;
        let result = self
            .with_deadline(&token, self.download_and_verify(&plan, &layout, session_id, &token))
            .await;
        self.unregister().await;

        match result {
            Ok((report, after_plan)) => {
                let after = self.finish_verification(session_id, root, after_plan).await?;
                Ok(DownloadOutcome::Completed { report, after })
            }
            Err(e) => Err(self.fail_pass(session_id, e).await),
        }
    }

    /// Check, then download if anything is stale.
    #[instrument(skip(self), fields(root = %root.display()))]
    pub async fn sync(&self, root: &Path) -> Result<DownloadOutcome> {
        match self.check(root).await? {
            CheckOutcome::Ready => Ok(DownloadOutcome::NothingToDo),
            CheckOutcome::Skipped => Ok(DownloadOutcome::Skipped),
            CheckOutcome::NeedsUpdate(_) => self.download(root).await,
        }
    }

    async fn download_and_verify(
        &self,
        plan: &SyncPlan,
        layout: &ModLayout,
        session_id: SessionId,
        token: &CancellationToken,
    ) -> Result<(DownloadReport, SyncPlan)> {
        info!("Phase 1: Downloading {} files", plan.len());
        let report = self
            .downloader
            .download(plan, layout, session_id, token)
            .await?;

        for failure in report.failures() {
            warn!(file = %failure.name, outcome = ?failure.outcome, "File not synced");
        }

        info!("Phase 2: Verifying installation");
        let previous = self.session.transition(SessionState::Verifying)?;
        self.emit_state(session_id, previous, SessionState::Verifying);

        let after = self.reconciler.run(layout, session_id, token).await?;
        Ok((report, after))
    }

    async fn finish_verification(
        &self,
        session_id: SessionId,
        root: &Path,
        plan: SyncPlan,
    ) -> Result<CheckOutcome> {
        let next = if plan.is_empty() {
            SessionState::Ready
        } else {
            SessionState::NeedsUpdate
        };

        let previous = self.session.transition(next)?;
        self.emit_state(session_id, previous, next);

        let mut pending = self.pending.lock().await;
        if plan.is_empty() {
            *pending = None;
            Ok(CheckOutcome::Ready)
        } else {
            *pending = Some(PendingPlan {
                root: root.to_path_buf(),
                plan: plan.clone(),
            });
            Ok(CheckOutcome::NeedsUpdate(plan))
        }
    }

    async fn fail_pass(&self, session_id: SessionId, err: SyncError) -> SyncError {
        let previous = self.session.reset();
        self.emit_state(session_id, previous, SessionState::Idle);
        self.pending.lock().await.take();

        let event = match &err {
            SyncError::Cancelled => {
                warn!(session_id = %session_id, "Pass cancelled");
                SessionEvent::Cancelled {
                    session_id: session_id.to_string(),
                }
            }
            _ => {
                error!(session_id = %session_id, "Pass failed: {}", err);
                SessionEvent::Failed {
                    session_id: session_id.to_string(),
                    message: err.to_string(),
                    recoverable: err.is_recoverable(),
                }
            }
        };
        self.event_bus.emit(CoreEvent::Session(event)).ok();

        err
    }

    /// Run `pass`, cancelling it when the configured deadline expires.
    ///
    /// The pass observes cancellation itself so partial files are cleaned up
    /// before `Timeout` is returned.
    async fn with_deadline<T, F>(&self, token: &CancellationToken, pass: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let Some(secs) = self.config.pass_timeout_secs else {
            return pass.await;
        };

        tokio::pin!(pass);
        let deadline = tokio::time::sleep(Duration::from_secs(secs));
        tokio::pin!(deadline);

        tokio::select! {
            result = &mut pass => result,
            _ = &mut deadline => {
                error!("Pass timed out after {} seconds", secs);
                token.cancel();
                match pass.await {
                    Ok(value) => Ok(value),
                    Err(_) => Err(SyncError::Timeout(secs)),
                }
            }
        }
    }

    // ========================================================================
    // Control
    // ========================================================================

    async fn register(&self, session_id: SessionId) -> CancellationToken {
        let cancellation_token = CancellationToken::new();
        *self.active.lock().await = Some(ActivePass {
            session_id,
            cancellation_token: cancellation_token.clone(),
        });
        cancellation_token
    }

    async fn unregister(&self) {
        self.active.lock().await.take();
    }

    /// Cancel the running pass, if any.
    ///
    /// Returns `true` when a pass was signalled. The pass itself returns
    /// `Cancelled` once it has cleaned up.
    #[instrument(skip(self))]
    pub async fn cancel(&self) -> bool {
        match self.active.lock().await.as_ref() {
            Some(active) => {
                info!(session_id = %active.session_id, "Cancelling pass");
                active.cancellation_token.cancel();
                true
            }
            None => false,
        }
    }

    fn emit_state(&self, session_id: SessionId, from: SessionState, to: SessionState) {
        info!(session_id = %session_id, from = %from, to = %to, "Session state changed");
        self.event_bus
            .emit(CoreEvent::Session(SessionEvent::StateChanged {
                session_id: session_id.to_string(),
                from: from.to_string(),
                to: to.to_string(),
            }))
            .ok();
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Receiver that observes every session state change.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe()
    }

    /// Plan from the last check, if it still awaits download.
    pub async fn pending_plan(&self) -> Option<SyncPlan> {
        self.pending
            .lock()
            .await
            .as_ref()
            .map(|pending| pending.plan.clone())
    }

    pub fn checksum_cache(&self) -> &Arc<ChecksumCache> {
        &self.cache
    }

    /// Forget every cached digest; the next check re-hashes all files.
    pub async fn clear_checksum_cache(&self) {
        self.cache.clear().await;
        info!("Checksum cache cleared");
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.mod_prefix, "A3URL");
        assert_eq!(config.addons_dir, "addons");
        assert_eq!(config.integrity_retries, 0);
        assert_eq!(config.eta_min_bytes, 10 * 1024);
        assert_eq!(config.download_timeout_secs, Some(3600));
        assert_eq!(config.pass_timeout_secs, None);
        assert!(!config.invalidate_cache_on_mtime);
    }
}
