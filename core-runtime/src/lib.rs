//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the mod synchronization core:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! ## Overview
//!
//! Other crates in the workspace depend on this one for the logging
//! conventions, the validated configuration, and the typed events that carry
//! verification and download progress to the host.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
