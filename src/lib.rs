//! Workspace placeholder crate.
//!
//! Exposes the feature flags that map to the individual workspace crates so a
//! launcher can depend on `modsync-workspace` alone. With `desktop-shims`
//! enabled (the default) the service façade is re-exported.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
