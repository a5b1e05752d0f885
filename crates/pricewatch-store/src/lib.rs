use std::path::PathBuf;

use pricewatch_core::{AnalysisReport, SNAPSHOT_FORMAT_VERSION, Snapshot};
use thiserror::Error;

mod file;
mod memory;
mod retry;

pub use file::{JsonFileStore, REPORTS_DIR_NAME, SNAPSHOTS_DIR_NAME, snapshot_file};
pub use memory::InMemoryStore;
pub use retry::{RetryPolicy, is_transient};

const CATEGORY_HASH_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {location}: {source}")]
    ReadFailure {
        location: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {location}: {source}")]
    WriteFailure {
        location: String,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt data in {location}: {reason}")]
    CorruptData { location: String, reason: String },
}

impl StoreError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ReadFailure { .. } => "read_failure",
            Self::WriteFailure { .. } => "write_failure",
            Self::CorruptData { .. } => "corrupt_data",
        }
    }

    pub fn location(&self) -> &str {
        match self {
            Self::ReadFailure { location, .. }
            | Self::WriteFailure { location, .. }
            | Self::CorruptData { location, .. } => location,
        }
    }
}

/// A baseline as handed to a run. A warning means the stored data could not
/// be used and `snapshot` is an empty stand-in.
#[derive(Debug)]
pub struct LoadedSnapshot {
    pub snapshot: Snapshot,
    pub warning: Option<StoreError>,
}

impl LoadedSnapshot {
    pub fn loaded(snapshot: Snapshot) -> Self {
        Self {
            snapshot,
            warning: None,
        }
    }

    /// Nothing stored yet. Not a warning.
    pub fn first_run(category: &str) -> Self {
        Self::loaded(Snapshot::empty(category))
    }

    pub fn degraded(category: &str, warning: StoreError) -> Self {
        Self {
            snapshot: Snapshot::empty(category),
            warning: Some(warning),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.warning.is_some()
    }
}

pub trait SnapshotStore: Send + Sync {
    /// Never fails: unreadable or corrupt data degrades to an empty baseline.
    fn load(&self, category: &str) -> LoadedSnapshot;
    /// Replaces the stored baseline. On error the previous one is intact.
    fn save(&self, category: &str, snapshot: &Snapshot) -> Result<(), StoreError>;
}

pub trait ReportStore: Send + Sync {
    /// Persists `report` under a fresh name and returns where it went.
    fn save_report(&self, report: &AnalysisReport) -> Result<PathBuf, StoreError>;
    /// The newest readable report of every category, ordered by category.
    fn latest_reports(&self) -> Result<Vec<AnalysisReport>, StoreError>;
}

/// Filesystem-safe name for a category: lowercase slug plus a short hash of
/// the exact category text, so "City" and "city" never share a file.
pub fn category_key(category: &str) -> String {
    let mut slug = String::with_capacity(category.len());
    for ch in category.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    if slug.is_empty() {
        slug.push_str("category");
    }

    let hash = blake3::hash(category.as_bytes()).to_hex();
    format!("{slug}-{}", &hash[..CATEGORY_HASH_LEN])
}

pub(crate) fn encode_snapshot(snapshot: &Snapshot) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec_pretty(snapshot)
}

pub(crate) fn decode_snapshot(
    category: &str,
    location: &str,
    bytes: &[u8],
) -> Result<Snapshot, StoreError> {
    let corrupt = |reason: String| StoreError::CorruptData {
        location: location.to_owned(),
        reason,
    };

    let snapshot: Snapshot =
        serde_json::from_slice(bytes).map_err(|err| corrupt(format!("invalid JSON: {err}")))?;

    if snapshot.format_version == 0 || snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
        return Err(corrupt(format!(
            "unsupported format_version {}",
            snapshot.format_version
        )));
    }
    if snapshot.category != category {
        return Err(corrupt(format!(
            "snapshot belongs to category '{}', expected '{category}'",
            snapshot.category
        )));
    }
    for (key, product) in &snapshot.products {
        if product.id.is_empty() || *key != product.id {
            return Err(corrupt(format!(
                "product key '{key}' does not match id '{}'",
                product.id
            )));
        }
        if product.price.amount.is_sign_negative() && !product.price.amount.is_zero() {
            return Err(corrupt(format!("product '{key}' has a negative price")));
        }
    }

    Ok(snapshot)
}
