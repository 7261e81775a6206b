//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (Windows, Linux, macOS).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest`, with retry for buffered requests and
//!   unbuffered streaming for mod downloads
//! - `FileSystemAccess` using `tokio::fs`
//! - `SettingsStore` using a SQLite-backed key-value table
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ReqwestHttpClient, SqliteSettingsStore, TokioFileSystem};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let http_client = ReqwestHttpClient::new()?;
//!     let fs = TokioFileSystem::new();
//!     let settings = SqliteSettingsStore::new(data_dir.join("settings.db")).await?;
//!
//!     // Hand them to CoreConfig::builder()
//!     Ok(())
//! }
//! ```

mod filesystem;
mod http;
mod settings;

pub use filesystem::TokioFileSystem;
pub use http::ReqwestHttpClient;
pub use settings::SqliteSettingsStore;
