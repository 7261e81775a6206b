//! # Event Bus System
//!
//! Typed progress and lifecycle events for the mod synchronization engine,
//! published over `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! The event bus system consists of:
//! - **Event Types**: One enum per phase of a sync session (session lifecycle,
//!   verification, download)
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Wrapper for consuming events with filtering
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐    emit     ┌───────────┐
//! │ Reconciler   ├────────────>│           │
//! └──────────────┘             │           │    subscribe    ┌─────────────┐
//!                              │ EventBus  ├────────────────>│ Launcher UI │
//! ┌──────────────┐    emit     │ (broadcast│                 └─────────────┘
//! │ Orchestrator ├────────────>│  channel) │    subscribe    ┌─────────────┐
//! └──────────────┘             │           ├────────────────>│ Log writer  │
//! ┌──────────────┐    emit     │           │                 └─────────────┘
//! │ Coordinator  ├────────────>│           │
//! └──────────────┘             └───────────┘
//! ```
//!
//! ## Usage
//!
//! ### Publishing Events
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, DownloadEvent, EventBus};
//!
//! let event_bus = EventBus::new(100);
//! let event = CoreEvent::Download(DownloadEvent::FileCompleted {
//!     file_name: "@mod_core.pbo".to_string(),
//!     verified: true,
//! });
//!
//! // Err only means nobody is listening.
//! event_bus.emit(event).ok();
//! ```
//!
//! ### Following Download Progress
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, DownloadEvent, EventBus, EventStream};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut progress = EventStream::new(event_bus.subscribe()).filter(|event| {
//!     matches!(event, CoreEvent::Download(DownloadEvent::FileProgress { .. }))
//! });
//!
//! tokio::spawn(async move {
//!     while let Ok(CoreEvent::Download(DownloadEvent::FileProgress { file_name, percent, .. })) =
//!         progress.recv().await
//!     {
//!         println!("{file_name}: {percent}%");
//!     }
//! });
//! # }
//! ```
//!
//! ## Event Types
//!
//! ### Session Events
//! - `StateChanged`: The session moved between lifecycle states
//! - `Failed`: A pass aborted with a pass-level error
//! - `Cancelled`: A pass was cancelled by the caller
//!
//! ### Verification Events
//! - `Started`, `Progress`, `OrphansRemoved`, `Completed`
//!
//! ### Download Events
//! - `Started`, `FileProgress` (one per received chunk), `FileCompleted`,
//!   `FileFailed`, `IntegrityFailed`, `Completed`
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   Per-chunk progress is chatty, so UI subscribers should treat this as
//!   non-fatal and keep reading.
//! - **`RecvError::Closed`**: All senders have been dropped. This indicates shutdown.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

// Re-export commonly used types
pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Sized for bursts of per-chunk download progress.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 1024;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Session lifecycle events
    Session(SessionEvent),
    /// Local verification (reconciliation) events
    Verification(VerificationEvent),
    /// Transfer and integrity events
    Download(DownloadEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Session(e) => e.description(),
            CoreEvent::Verification(e) => e.description(),
            CoreEvent::Download(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Session(SessionEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Download(DownloadEvent::FileFailed { .. }) => EventSeverity::Error,
            CoreEvent::Download(DownloadEvent::IntegrityFailed { .. }) => EventSeverity::Error,
            CoreEvent::Verification(VerificationEvent::OrphansRemoved { failed, .. })
                if !failed.is_empty() =>
            {
                EventSeverity::Warning
            }
            CoreEvent::Session(SessionEvent::Cancelled { .. }) => EventSeverity::Warning,
            CoreEvent::Verification(VerificationEvent::Completed { .. }) => EventSeverity::Info,
            CoreEvent::Download(DownloadEvent::Completed { .. }) => EventSeverity::Info,
            CoreEvent::Session(SessionEvent::StateChanged { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    /// Debug-level events (verbose)
    Debug,
    /// Informational events
    Info,
    /// Warning events
    Warning,
    /// Error events
    Error,
}

// ============================================================================
// Session Events
// ============================================================================

/// Events describing the lifecycle of a sync session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SessionEvent {
    /// The session moved from one state to another.
    StateChanged {
        /// Identifier of the pass that caused the transition.
        session_id: String,
        /// Previous state name (e.g. `"idle"`).
        from: String,
        /// New state name (e.g. `"verifying"`).
        to: String,
    },
    /// A pass aborted with a pass-level error.
    Failed {
        session_id: String,
        /// Human-readable error message.
        message: String,
        /// Whether retrying the pass may succeed.
        recoverable: bool,
    },
    /// The caller cancelled the running pass.
    Cancelled { session_id: String },
}

impl SessionEvent {
    fn description(&self) -> &str {
        match self {
            SessionEvent::StateChanged { .. } => "Session state changed",
            SessionEvent::Failed { .. } => "Sync pass failed",
            SessionEvent::Cancelled { .. } => "Sync pass cancelled",
        }
    }
}

// ============================================================================
// Verification Events
// ============================================================================

/// Events emitted while local files are compared against the manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum VerificationEvent {
    /// Verification started.
    Started {
        session_id: String,
        /// Number of manifest entries that will be checked.
        total_files: u64,
    },
    /// One manifest entry was checked.
    Progress {
        session_id: String,
        /// Name of the entry that was just checked.
        file_name: String,
        files_checked: u64,
        total_files: u64,
        /// `round(files_checked / total_files * 100)`.
        percent: u8,
    },
    /// Local files absent from the remote listing were deleted.
    OrphansRemoved {
        session_id: String,
        /// Names that were deleted.
        files: Vec<String>,
        /// Names that could not be deleted.
        failed: Vec<String>,
    },
    /// Verification finished and a plan was produced.
    Completed {
        session_id: String,
        /// Number of files that must be fetched.
        files_to_fetch: u64,
        /// Sum of the sizes of those files.
        total_bytes: u64,
    },
}

impl VerificationEvent {
    fn description(&self) -> &str {
        match self {
            VerificationEvent::Started { .. } => "Verification started",
            VerificationEvent::Progress { .. } => "Verification progress",
            VerificationEvent::OrphansRemoved { .. } => "Orphaned files removed",
            VerificationEvent::Completed { .. } => "Verification completed",
        }
    }
}

// ============================================================================
// Download Events
// ============================================================================

/// Events emitted while plan items are transferred and verified.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum DownloadEvent {
    /// Transfer of a plan started.
    Started {
        session_id: String,
        total_files: u64,
        total_bytes: u64,
    },
    /// A chunk of the current file was written.
    FileProgress {
        file_name: String,
        /// `floor(downloaded_bytes / total_size * 100)`, 0 when the size is unknown.
        percent: u8,
        /// Bytes of this file received so far.
        downloaded_bytes: u64,
        /// Advertised size of this file (`Content-Length`), 0 when unknown.
        total_size: u64,
        /// Bytes received across the whole plan.
        overall_downloaded: u64,
        /// Sum of the plan's expected sizes.
        overall_total: u64,
        /// Estimated seconds remaining, once enough data has been seen.
        eta_secs: Option<u64>,
    },
    /// A file was written in full.
    FileCompleted {
        file_name: String,
        /// `true` when the content hash matched; `false` when no hash was published.
        verified: bool,
    },
    /// A file could not be transferred.
    FileFailed {
        file_name: String,
        /// HTTP status, when the failure was a non-success response.
        status: Option<u16>,
        message: String,
    },
    /// A downloaded file does not match its published hash.
    IntegrityFailed {
        file_name: String,
        expected: String,
        actual: String,
    },
    /// All plan items were processed.
    Completed {
        session_id: String,
        files_synced: u64,
        files_failed: u64,
        bytes_downloaded: u64,
        duration_secs: u64,
    },
}

impl DownloadEvent {
    fn description(&self) -> &str {
        match self {
            DownloadEvent::Started { .. } => "Download started",
            DownloadEvent::FileProgress { .. } => "Download progress",
            DownloadEvent::FileCompleted { .. } => "File downloaded",
            DownloadEvent::FileFailed { .. } => "File download failed",
            DownloadEvent::IntegrityFailed { .. } => "File integrity check failed",
            DownloadEvent::Completed { .. } => "Download completed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Uses `tokio::sync::broadcast` internally, which provides:
/// - Multiple producers (clone the `EventBus`)
/// - Multiple consumers (each `subscribe()` creates a new receiver)
/// - Non-blocking sends (events are cloned for each subscriber)
/// - Lagging detection (slow subscribers get `RecvError::Lagged`)
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of events to buffer per subscriber.
    ///   When a subscriber falls behind by more than this amount, it will
    ///   receive a `RecvError::Lagged` error.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event.
    /// Returns an error if there are no active subscribers.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber to receive events.
    ///
    /// Each call creates an independent receiver that will receive all future events.
    /// Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    ///
    /// ```rust
    /// use core_runtime::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.subscriber_count(), 0);
    ///
    /// let _subscriber = event_bus.subscribe();
    /// assert_eq!(event_bus.subscriber_count(), 1);
    /// ```
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

/// Type alias for event filter functions.
type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    /// Creates a new event stream from a receiver.
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Adds a filter function to this stream.
    ///
    /// Only events that match the filter will be returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter (if any).
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(file_name: &str, downloaded: u64) -> CoreEvent {
        CoreEvent::Download(DownloadEvent::FileProgress {
            file_name: file_name.to_string(),
            percent: (downloaded * 100 / 1000) as u8,
            downloaded_bytes: downloaded,
            total_size: 1000,
            overall_downloaded: downloaded,
            overall_total: 1000,
            eta_secs: None,
        })
    }

    #[tokio::test]
    async fn test_event_bus_subscription() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);
        let _sub1 = bus.subscribe();
        let _sub2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_event_emission_no_subscribers() {
        let bus = EventBus::new(10);
        let event = CoreEvent::Session(SessionEvent::Cancelled {
            session_id: "s-1".to_string(),
        });

        assert!(bus.emit(event).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();

        let event = CoreEvent::Verification(VerificationEvent::Started {
            session_id: "s-1".to_string(),
            total_files: 12,
        });

        assert_eq!(bus.emit(event.clone()).unwrap(), 2);
        assert_eq!(sub1.recv().await.unwrap(), event);
        assert_eq!(sub2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_event_stream_with_filter() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| matches!(event, CoreEvent::Download(_)));

        bus.emit(CoreEvent::Verification(VerificationEvent::Completed {
            session_id: "s-1".to_string(),
            files_to_fetch: 1,
            total_bytes: 1000,
        }))
        .ok();
        let wanted = progress("mod.pbo", 500);
        bus.emit(wanted.clone()).ok();

        assert_eq!(stream.recv().await.unwrap(), wanted);
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();

        for i in 0..5 {
            bus.emit(progress("mod.pbo", i * 100)).ok();
        }

        let result = sub.recv().await;
        assert!(matches!(result, Err(RecvError::Lagged(_))));
    }

    #[test]
    fn test_event_severity() {
        let integrity = CoreEvent::Download(DownloadEvent::IntegrityFailed {
            file_name: "mod.pbo".to_string(),
            expected: "aa".to_string(),
            actual: "bb".to_string(),
        });
        assert_eq!(integrity.severity(), EventSeverity::Error);

        let partial_cleanup = CoreEvent::Verification(VerificationEvent::OrphansRemoved {
            session_id: "s-1".to_string(),
            files: vec![],
            failed: vec!["locked.pbo".to_string()],
        });
        assert_eq!(partial_cleanup.severity(), EventSeverity::Warning);

        let clean = CoreEvent::Verification(VerificationEvent::OrphansRemoved {
            session_id: "s-1".to_string(),
            files: vec!["old.pbo".to_string()],
            failed: vec![],
        });
        assert_eq!(clean.severity(), EventSeverity::Debug);

        assert_eq!(progress("mod.pbo", 10).severity(), EventSeverity::Debug);
    }

    #[test]
    fn test_event_description() {
        let event = CoreEvent::Download(DownloadEvent::FileCompleted {
            file_name: "mod.pbo".to_string(),
            verified: true,
        });
        assert_eq!(event.description(), "File downloaded");
    }

    #[tokio::test]
    async fn test_concurrent_publishers() {
        let bus = EventBus::new(100);
        let mut sub = bus.subscribe();

        let bus1 = bus.clone();
        let bus2 = bus.clone();

        let handle1 = tokio::spawn(async move {
            for i in 0..10 {
                bus1.emit(progress("a.pbo", i)).ok();
            }
        });
        let handle2 = tokio::spawn(async move {
            for i in 0..10 {
                bus2.emit(progress("b.pbo", i)).ok();
            }
        });

        handle1.await.ok();
        handle2.await.ok();

        let mut count = 0;
        while sub.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 20);
    }

    #[test]
    fn test_event_serialization() {
        let event = CoreEvent::Session(SessionEvent::StateChanged {
            session_id: "s-42".to_string(),
            from: "idle".to_string(),
            to: "verifying".to_string(),
        });

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"Session\""));
        assert!(json.contains("\"event\":\"StateChanged\""));

        let deserialized: CoreEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, event);
    }

    #[tokio::test]
    async fn test_try_recv() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe());
        assert!(stream.try_recv().is_none());

        let event = progress("mod.pbo", 1000);
        bus.emit(event.clone()).ok();

        let received = stream.try_recv().unwrap().unwrap();
        assert_eq!(received, event);
    }
}
