//! # Mod Synchronization & Integrity Engine
//!
//! Keeps a game's mod folder consistent with a remote manifest.
//!
//! ## Overview
//!
//! A pass compares the remote listings with the local files, deletes files
//! that are no longer listed, fetches whatever is missing or stale, verifies
//! each download by content hash, and reports `Ready` or `NeedsUpdate`.
//!
//! ## Components
//!
//! - **Manifest Source** (`manifest`): Remote manifest and other-resource listings
//! - **Local Inventory** (`inventory`): Stat and list local files
//! - **Checksum Cache** (`checksum`): SHA-256 memoization keyed by path and size
//! - **Reconciliation Engine** (`reconcile`): Produces the sync plan
//! - **Cleanup** (`cleanup`): Best-effort orphan deletion
//! - **Download Orchestrator** (`download`): Sequential streamed transfers
//! - **Verification** (`verify`): Post-download integrity checks
//! - **Progress** (`progress`): Per-file percentages, plan-wide ETA
//! - **Session** (`session`): Lifecycle state machine and pass guard
//! - **Coordinator** (`coordinator`): Drives check and download passes

pub mod checksum;
pub mod cleanup;
pub mod coordinator;
pub mod download;
pub mod error;
pub mod inventory;
pub mod manifest;
pub mod plan;
pub mod progress;
pub mod reconcile;
pub mod session;
pub mod verify;

pub use checksum::{CacheEntry, ChecksumCache};
pub use cleanup::CleanupReport;
pub use coordinator::{CheckOutcome, DownloadOutcome, ModSyncCoordinator, SyncConfig};
pub use download::{DownloadOrchestrator, DownloadReport, DownloadSettings, ItemOutcome, ItemReport};
pub use error::{Result, SyncError};
pub use inventory::LocalFileRecord;
pub use manifest::{HttpManifestSource, ManifestEntry, ManifestSource, OtherResourceEntry};
pub use plan::{ModLayout, ResourceSource, SyncPlan, SyncPlanItem};
pub use progress::{format_remaining, ProgressEvent, TransferTracker};
pub use reconcile::Reconciler;
pub use session::{SessionId, SessionState};
pub use verify::{IntegrityVerifier, Verification};
