//! # Host Bridge Traits
//!
//! Capability contracts that the mod synchronization core consumes and that
//! each host platform implements.
//!
//! ## Overview
//!
//! The core never talks to the network, the disk, or a preferences store
//! directly. It goes through the traits in this crate so that the engine can
//! be exercised against fakes in tests and against platform adapters in
//! production.
//!
//! ## Traits
//!
//! ### Networking & I/O
//! - [`HttpClient`](http::HttpClient) - Buffered requests (manifest, index, HEAD)
//!   and streamed downloads exposing status and `Content-Length`
//! - [`FileSystemAccess`](storage::FileSystemAccess) - Stat, list, create, delete,
//!   and streamed read/write of local files
//!
//! ### Storage
//! - [`SettingsStore`](storage::SettingsStore) - Persisted key-value configuration
//!   (game installation path)
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Fail-Fast Strategy
//!
//! The core fails fast with a descriptive error when a required capability is
//! missing instead of falling back silently:
//!
//! ```ignore
//! let http_client = config.http_client
//!     .ok_or_else(|| CoreError::CapabilityMissing {
//!         capability: "HttpClient".to_string(),
//!         message: "No HTTP client implementation provided. \
//!                  Desktop: ensure the desktop-shims feature is enabled.".to_string(),
//!     })?;
//! ```
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! convert platform errors into it and keep the failing path or URL in the
//! message.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so they can be shared as
//! `Arc<dyn Trait>` across tasks.

pub mod error;
pub mod http;
pub mod storage;
pub mod time;

pub use error::BridgeError;

pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, HttpStream, RetryPolicy};
pub use storage::{FileMetadata, FileSystemAccess, SettingsStore};
pub use time::{Clock, FixedClock, LogEntry, LogLevel, LoggerSink, SystemClock};
