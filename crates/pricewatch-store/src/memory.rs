use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use pricewatch_core::{AnalysisReport, Snapshot};

use crate::file::report_stem;
use crate::{
    LoadedSnapshot, ReportStore, SnapshotStore, StoreError, category_key, decode_snapshot,
    encode_snapshot,
};

/// Keeps encoded snapshots and reports in process memory. Goes through the
/// same encode and decode steps as [`crate::JsonFileStore`].
#[derive(Debug, Default)]
pub struct InMemoryStore {
    snapshots: Mutex<BTreeMap<String, Vec<u8>>>,
    reports: Mutex<Vec<(PathBuf, AnalysisReport)>>,
    fail_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores bytes as-is, bypassing encoding.
    pub fn insert_raw(&self, category: &str, bytes: impl Into<Vec<u8>>) {
        lock(&self.snapshots).insert(category_key(category), bytes.into());
    }

    pub fn raw(&self, category: &str) -> Option<Vec<u8>> {
        lock(&self.snapshots).get(&category_key(category)).cloned()
    }

    /// While set, every save fails with a write failure.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn reports(&self) -> Vec<AnalysisReport> {
        lock(&self.reports)
            .iter()
            .map(|(_, report)| report.clone())
            .collect()
    }

    fn check_writable(&self, location: &str) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::WriteFailure {
                location: location.to_owned(),
                source: io::Error::other("writes disabled"),
            });
        }
        Ok(())
    }
}

impl SnapshotStore for InMemoryStore {
    fn load(&self, category: &str) -> LoadedSnapshot {
        let location = memory_location(category);
        match self.raw(category) {
            Some(bytes) => match decode_snapshot(category, &location, &bytes) {
                Ok(snapshot) => LoadedSnapshot::loaded(snapshot),
                Err(warning) => LoadedSnapshot::degraded(category, warning),
            },
            None => LoadedSnapshot::first_run(category),
        }
    }

    fn save(&self, category: &str, snapshot: &Snapshot) -> Result<(), StoreError> {
        let location = memory_location(category);
        self.check_writable(&location)?;
        let bytes = encode_snapshot(snapshot).map_err(|err| StoreError::WriteFailure {
            location,
            source: io::Error::other(err),
        })?;
        lock(&self.snapshots).insert(category_key(category), bytes);
        Ok(())
    }
}

impl ReportStore for InMemoryStore {
    fn save_report(&self, report: &AnalysisReport) -> Result<PathBuf, StoreError> {
        let stem = report_stem(report);
        self.check_writable(&format!("memory:{stem}"))?;

        let mut reports = lock(&self.reports);
        let taken = reports
            .iter()
            .filter(|(_, stored)| report_stem(stored) == stem)
            .count();
        let name = if taken == 0 {
            format!("{stem}.json")
        } else {
            format!("{stem}-{taken}.json")
        };
        let location = PathBuf::from("memory").join(name);
        reports.push((location.clone(), report.clone()));
        Ok(location)
    }

    fn latest_reports(&self) -> Result<Vec<AnalysisReport>, StoreError> {
        let mut latest: BTreeMap<String, AnalysisReport> = BTreeMap::new();
        for (_, report) in lock(&self.reports).iter() {
            let newer = latest
                .get(&report.category)
                .is_none_or(|current| report.generated_at >= current.generated_at);
            if newer {
                latest.insert(report.category.clone(), report.clone());
            }
        }
        Ok(latest.into_values().collect())
    }
}

fn memory_location(category: &str) -> String {
    format!("memory:{}", category_key(category))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use pricewatch_core::build_report;

    use super::*;

    #[test]
    fn snapshots_round_trip_through_encoding() {
        let store = InMemoryStore::new();
        let captured_at = Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).unwrap();
        let snapshot = Snapshot::capture("City", captured_at, BTreeMap::new());

        store.save("City", &snapshot).expect("save");
        let loaded = store.load("City");

        assert!(!loaded.is_degraded());
        assert_eq!(loaded.snapshot, snapshot);
        assert!(store.raw("City").is_some());
    }

    #[test]
    fn corrupt_bytes_degrade_to_empty_baseline() {
        let store = InMemoryStore::new();
        store.insert_raw("City", "not json");

        let loaded = store.load("City");

        assert_eq!(loaded.warning.expect("warning").kind(), "corrupt_data");
        assert!(loaded.snapshot.is_empty());
    }

    #[test]
    fn failing_writes_leave_previous_snapshot() {
        let store = InMemoryStore::new();
        let captured_at = Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).unwrap();
        let first = Snapshot::capture("City", captured_at, BTreeMap::new());
        store.save("City", &first).expect("first save");

        store.set_fail_writes(true);
        let err = store
            .save("City", &Snapshot::empty("City"))
            .expect_err("write disabled");

        assert_eq!(err.kind(), "write_failure");
        assert_eq!(store.load("City").snapshot, first);
    }

    #[test]
    fn report_locations_get_suffixes() {
        let store = InMemoryStore::new();
        let generated_at = Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).unwrap();
        let report = build_report("City", Vec::new(), 5.0, generated_at);

        let first = store.save_report(&report).expect("first");
        let second = store.save_report(&report).expect("second");

        assert_ne!(first, second);
        assert!(second.to_string_lossy().ends_with("-1.json"));
        assert_eq!(store.reports().len(), 2);
    }

    #[test]
    fn latest_reports_prefer_newest_then_last_saved() {
        let store = InMemoryStore::new();
        let day = |day| Utc.with_ymd_and_hms(2026, 3, day, 6, 0, 0).unwrap();
        for (category, generated_at, threshold) in [
            ("City", day(2), 1.0),
            ("City", day(1), 2.0),
            ("Architecture", day(1), 3.0),
            ("Architecture", day(1), 4.0),
        ] {
            store
                .save_report(&build_report(category, Vec::new(), threshold, generated_at))
                .expect("save report");
        }

        let latest = store.latest_reports().expect("latest reports");

        let picked: Vec<(&str, f64)> = latest
            .iter()
            .map(|report| (report.category.as_str(), report.threshold_percent))
            .collect();
        assert_eq!(picked, vec![("Architecture", 4.0), ("City", 1.0)]);
    }
}
