//! # Sync Plan
//!
//! The output of a reconciliation pass and the local layout it maps onto.
//!
//! ## Local Layout
//!
//! ```text
//! <game root>/
//! └── @A3URL/              ← other resources (dll, paa, ...)
//!     └── addons/          ← manifest-listed files
//! ```
//!
//! A plan is derived fresh on every pass and discarded once its downloads
//! have been attempted.

use crate::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

// ============================================================================
// Plan Types
// ============================================================================

/// Which remote listing an item came from; decides its destination directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceSource {
    /// Hash-carrying manifest entries, stored under the addons directory
    Mods,
    /// Size-only directory index entries, stored under the mod root
    Other,
}

impl ResourceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceSource::Mods => "mods",
            ResourceSource::Other => "other",
        }
    }
}

impl std::fmt::Display for ResourceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single file that must be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPlanItem {
    pub name: String,
    pub size: u64,
    pub source: ResourceSource,
    /// Normalized lowercase hex digest, when the manifest published one
    pub expected_hash: Option<String>,
}

/// Files to fetch plus the orphans removed while producing the plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPlan {
    /// Mods first, then other resources, each in listing order
    pub items: Vec<SyncPlanItem>,
    pub orphans: BTreeSet<String>,
    pub total_bytes: u64,
}

impl SyncPlan {
    pub fn new(items: Vec<SyncPlanItem>, orphans: BTreeSet<String>) -> Self {
        let total_bytes = items.iter().map(|item| item.size).sum();
        Self {
            items,
            orphans,
            total_bytes,
        }
    }

    /// `true` when nothing has to be fetched.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

// ============================================================================
// Local Layout
// ============================================================================

/// Resolves destination directories under the game installation root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModLayout {
    root: PathBuf,
    mod_dir: PathBuf,
    addons_dir: PathBuf,
}

impl ModLayout {
    /// Build the layout `<root>/@<prefix>/<addons>`.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the prefix or addons directory is not a single
    /// plain path segment.
    pub fn new(root: impl Into<PathBuf>, mod_prefix: &str, addons_dir: &str) -> Result<Self> {
        let prefix = mod_prefix.trim_start_matches('@');
        if !is_plain_segment(prefix) {
            return Err(SyncError::Config(format!(
                "Invalid mod prefix '{}'",
                mod_prefix
            )));
        }
        if !is_plain_segment(addons_dir) {
            return Err(SyncError::Config(format!(
                "Invalid addons directory '{}'",
                addons_dir
            )));
        }

        let root = root.into();
        let mod_dir = root.join(format!("@{}", prefix));
        let addons_dir = mod_dir.join(addons_dir);
        Ok(Self {
            root,
            mod_dir,
            addons_dir,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/@<prefix>`, home of the other resources
    pub fn mod_dir(&self) -> &Path {
        &self.mod_dir
    }

    /// `<root>/@<prefix>/addons`, home of manifest-listed files
    pub fn addons_dir(&self) -> &Path {
        &self.addons_dir
    }

    pub fn destination_dir(&self, source: ResourceSource) -> &Path {
        match source {
            ResourceSource::Mods => &self.addons_dir,
            ResourceSource::Other => &self.mod_dir,
        }
    }

    /// Local path of a listed file, rejecting names that would escape the
    /// destination directory.
    pub fn local_path(&self, source: ResourceSource, name: &str) -> Result<PathBuf> {
        validate_file_name(name)?;
        let mut path = self.destination_dir(source).to_path_buf();
        for segment in name.split('/') {
            path.push(segment);
        }
        Ok(path)
    }
}

fn is_plain_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(&['/', '\\'][..])
}

/// Reject names containing `..`, absolute paths, backslashes, or empty
/// segments.
pub fn validate_file_name(name: &str) -> Result<()> {
    let invalid = || SyncError::InvalidFileName(name.to_string());

    if name.is_empty() || name.contains('\\') || name.contains('\0') {
        return Err(invalid());
    }
    if name.split('/').any(|segment| !is_plain_segment(segment)) {
        return Err(invalid());
    }
    if Path::new(name)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(invalid());
    }
    Ok(())
}

/// `<base>/<name>` with every path segment of `name` percent-encoded.
pub fn remote_url(base: &str, name: &str) -> String {
    let encoded: Vec<String> = name
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect();
    format!("{}/{}", base.trim_end_matches('/'), encoded.join("/"))
}
