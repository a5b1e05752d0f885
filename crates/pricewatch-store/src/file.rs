use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use pricewatch_config::pricewatch_dir;
use pricewatch_core::{AnalysisReport, Snapshot};
use tempfile::NamedTempFile;

use crate::{
    LoadedSnapshot, ReportStore, RetryPolicy, SnapshotStore, StoreError, category_key,
    decode_snapshot, encode_snapshot,
};

pub const SNAPSHOTS_DIR_NAME: &str = "snapshots";
pub const REPORTS_DIR_NAME: &str = "reports";

const MAX_REPORT_SUFFIX: u32 = 1_000;

/// Snapshots and reports as JSON files under `<workspace>/.pricewatch/`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    snapshots_dir: PathBuf,
    reports_dir: PathBuf,
    retry: RetryPolicy,
}

impl JsonFileStore {
    pub fn open(workspace_root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = pricewatch_dir(workspace_root);
        let snapshots_dir = root.join(SNAPSHOTS_DIR_NAME);
        let reports_dir = root.join(REPORTS_DIR_NAME);

        for dir in [&snapshots_dir, &reports_dir] {
            fs::create_dir_all(dir).map_err(|source| StoreError::WriteFailure {
                location: dir.display().to_string(),
                source,
            })?;
        }

        Ok(Self {
            snapshots_dir,
            reports_dir,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn snapshots_dir(&self) -> &Path {
        &self.snapshots_dir
    }

    pub fn reports_dir(&self) -> &Path {
        &self.reports_dir
    }

    pub fn snapshot_path(&self, category: &str) -> PathBuf {
        self.snapshots_dir.join(snapshot_file_name(category))
    }
}

impl SnapshotStore for JsonFileStore {
    fn load(&self, category: &str) -> LoadedSnapshot {
        let path = self.snapshot_path(category);
        let location = path.display().to_string();

        let bytes = match self.retry.run("load_snapshot", &path, || fs::read(&path)) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(category, path = %location, "no stored snapshot, first run");
                return LoadedSnapshot::first_run(category);
            }
            Err(source) => {
                return LoadedSnapshot::degraded(
                    category,
                    StoreError::ReadFailure { location, source },
                );
            }
        };

        match decode_snapshot(category, &location, &bytes) {
            Ok(snapshot) => LoadedSnapshot::loaded(snapshot),
            Err(warning) => LoadedSnapshot::degraded(category, warning),
        }
    }

    fn save(&self, category: &str, snapshot: &Snapshot) -> Result<(), StoreError> {
        let path = self.snapshot_path(category);
        let write_failure = |source| StoreError::WriteFailure {
            location: path.display().to_string(),
            source,
        };

        let bytes = encode_snapshot(snapshot).map_err(|err| write_failure(io::Error::other(err)))?;
        self.retry
            .run("save_snapshot", &path, || {
                write_atomic(&self.snapshots_dir, &path, &bytes)
            })
            .map_err(write_failure)?;

        tracing::debug!(
            category,
            path = %path.display(),
            products = snapshot.len(),
            "snapshot saved"
        );
        Ok(())
    }
}

impl ReportStore for JsonFileStore {
    fn save_report(&self, report: &AnalysisReport) -> Result<PathBuf, StoreError> {
        let stem = report_stem(report);
        let write_failure = |source| StoreError::WriteFailure {
            location: self.reports_dir.join(format!("{stem}.json")).display().to_string(),
            source,
        };

        let bytes = serde_json::to_vec_pretty(report)
            .map_err(|err| write_failure(io::Error::other(err)))?;
        self.retry
            .run("save_report", &self.reports_dir, || {
                write_new(&self.reports_dir, &stem, &bytes)
            })
            .map_err(write_failure)
    }

    fn latest_reports(&self) -> Result<Vec<AnalysisReport>, StoreError> {
        let read_failure = |source| StoreError::ReadFailure {
            location: self.reports_dir.display().to_string(),
            source,
        };

        let mut by_key: BTreeMap<String, Vec<(ReportName, PathBuf)>> = BTreeMap::new();
        for entry in fs::read_dir(&self.reports_dir).map_err(read_failure)? {
            let path = entry.map_err(read_failure)?.path();
            let Some(name) = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(ReportName::parse)
            else {
                continue;
            };
            by_key.entry(name.key.clone()).or_default().push((name, path));
        }

        let mut reports = Vec::with_capacity(by_key.len());
        for mut candidates in by_key.into_values() {
            candidates.sort_by(|(a, _), (b, _)| b.order().cmp(&a.order()));
            if let Some(report) = candidates.iter().find_map(|(_, path)| read_report(path)) {
                reports.push(report);
            }
        }

        reports.sort_by(|a, b| a.category.cmp(&b.category));
        Ok(reports)
    }
}

/// A file name written by [`write_new`]: `<key>_analysis_<stamp>[-N].json`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ReportName {
    key: String,
    stamp: String,
    suffix: u32,
}

impl ReportName {
    fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(".json")?;
        let (key, rest) = stem.rsplit_once("_analysis_")?;
        let (stamp, suffix) = match rest.split_once('-') {
            Some((stamp, suffix)) => (stamp, suffix.parse().ok()?),
            None => (rest, 0),
        };
        if key.is_empty() || stamp.is_empty() {
            return None;
        }

        Some(Self {
            key: key.to_owned(),
            stamp: stamp.to_owned(),
            suffix,
        })
    }

    /// Stamps are fixed width, so text order is time order.
    fn order(&self) -> (&str, u32) {
        (&self.stamp, self.suffix)
    }
}

fn read_report(path: &Path) -> Option<AnalysisReport> {
    let parsed = fs::read(path)
        .map_err(|err| err.to_string())
        .and_then(|bytes| serde_json::from_slice(&bytes).map_err(|err| err.to_string()));
    match parsed {
        Ok(report) => Some(report),
        Err(error) => {
            tracing::warn!(path = %path.display(), error, "skipping unreadable report");
            None
        }
    }
}

/// Where [`JsonFileStore`] keeps the snapshot of `category`, without opening
/// the store.
pub fn snapshot_file(workspace_root: impl AsRef<Path>, category: &str) -> PathBuf {
    pricewatch_dir(workspace_root)
        .join(SNAPSHOTS_DIR_NAME)
        .join(snapshot_file_name(category))
}

fn snapshot_file_name(category: &str) -> String {
    format!("{}.json", category_key(category))
}

/// `<key>_analysis_<YYYYMMDDTHHMMSS><micros>Z`
pub(crate) fn report_stem(report: &AnalysisReport) -> String {
    format!(
        "{}_analysis_{}",
        category_key(&report.category),
        report.generated_at.format("%Y%m%dT%H%M%S%6fZ")
    )
}

fn write_atomic(dir: &Path, target: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.as_file_mut().write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(target).map_err(|err| err.error)?;
    Ok(())
}

/// Writes `bytes` under `<stem>.json`, or `<stem>-N.json` for the first free
/// N. Existing files are never replaced.
fn write_new(dir: &Path, stem: &str, bytes: &[u8]) -> io::Result<PathBuf> {
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.as_file_mut().write_all(bytes)?;
    temp.as_file().sync_all()?;

    for suffix in 0..=MAX_REPORT_SUFFIX {
        let name = if suffix == 0 {
            format!("{stem}.json")
        } else {
            format!("{stem}-{suffix}.json")
        };
        let target = dir.join(name);
        match temp.persist_noclobber(&target) {
            Ok(_) => return Ok(target),
            Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => temp = err.file,
            Err(err) => return Err(err.error),
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free report name for {stem}"),
    ))
}
