use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use pricewatch_config::{CorruptSnapshotPolicy, PricewatchConfig};
use pricewatch_core::{
    AnalysisReport, AnalyzeOptions, IdentityPolicy, NormalizeOptions, RawRecord,
    SelectorFieldMap, analyze, render_summary,
};
use pricewatch_store::{LoadedSnapshot, ReportStore, SnapshotStore, StoreError};
use tokio::task::spawn_blocking;
use tokio::time::timeout;

use crate::input::read_listings;

/// One category as the runner schedules it.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryJob {
    pub name: String,
    pub input: PathBuf,
    pub base_url: Option<String>,
    pub threshold_percent: f64,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub fields: SelectorFieldMap,
    pub identity: IdentityPolicy,
    pub default_currency: String,
    pub io_timeout: Duration,
    pub on_corrupt_snapshot: CorruptSnapshotPolicy,
}

impl PipelineSettings {
    pub fn from_config(config: &PricewatchConfig) -> Self {
        Self {
            fields: config.fields.clone(),
            identity: config.identity.clone(),
            default_currency: config.default_currency.clone(),
            io_timeout: Duration::from_millis(config.store.io_timeout_ms),
            on_corrupt_snapshot: config.store.on_corrupt_snapshot,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CategoryOutcome {
    pub report: AnalysisReport,
    pub report_path: PathBuf,
}

/// Runs categories against injected stores. Holds no per-run state, so one
/// instance serves concurrent categories.
pub struct Pipeline {
    snapshots: Arc<dyn SnapshotStore>,
    reports: Arc<dyn ReportStore>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        snapshots: Arc<dyn SnapshotStore>,
        reports: Arc<dyn ReportStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            snapshots,
            reports,
            settings,
        }
    }

    /// Reads the category's listings, diffs them against the stored baseline,
    /// then persists the report followed by the new snapshot. The baseline
    /// only advances once the report is stored.
    pub async fn run_category(
        &self,
        job: &CategoryJob,
        now: DateTime<Utc>,
    ) -> Result<CategoryOutcome> {
        let category = job.name.as_str();

        let input = job.input.clone();
        let listings = run_blocking(self.settings.io_timeout, move || read_listings(&input))
            .await?
            .ok_or_else(|| anyhow!("timed out reading {}", job.input.display()))??;
        let records: Vec<RawRecord> = listings
            .iter()
            .map(|listing| self.settings.fields.project(category, listing))
            .collect();

        let loaded = self.load_baseline(category).await?;
        let baseline_warning = match loaded.warning {
            Some(warning) => match self.settings.on_corrupt_snapshot {
                CorruptSnapshotPolicy::Abort => {
                    return Err(anyhow::Error::new(warning)
                        .context(format!("unusable baseline for category '{category}'")));
                }
                CorruptSnapshotPolicy::Reset => {
                    tracing::warn!(
                        category,
                        kind = warning.kind(),
                        error = %warning,
                        "baseline unusable, continuing from an empty snapshot"
                    );
                    Some(warning.to_string())
                }
            },
            None => None,
        };

        let options = AnalyzeOptions {
            normalize: NormalizeOptions {
                default_currency: self.settings.default_currency.clone(),
                base_url: job.base_url.clone(),
            },
            identity: self.settings.identity.clone(),
            threshold_percent: job.threshold_percent,
        };
        let analysis = analyze(category, &records, &loaded.snapshot, &options, now);
        let report = match baseline_warning {
            Some(warning) => analysis.report.with_baseline_warning(warning),
            None => analysis.report,
        };

        let reports = self.reports.clone();
        let stored = report.clone();
        let report_path = run_blocking(self.settings.io_timeout, move || {
            reports.save_report(&stored)
        })
        .await?
        .unwrap_or_else(|| Err(timed_out_write(category, self.settings.io_timeout)))
        .with_context(|| format!("failed to save report for category '{category}'"))?;

        let snapshots = self.snapshots.clone();
        let owned_category = category.to_owned();
        let snapshot = analysis.snapshot;
        let saved = run_blocking(self.settings.io_timeout, move || {
            snapshots.save(&owned_category, &snapshot)
        })
        .await?;
        let saved = saved.unwrap_or_else(|| {
            tracing::warn!(
                category,
                report = %report_path.display(),
                "snapshot save timed out; the write may still replace the baseline"
            );
            Err(timed_out_write(category, self.settings.io_timeout))
        });
        saved.with_context(|| format!("failed to save snapshot for category '{category}'"))?;

        tracing::info!(
            category,
            changed = report.has_changes(),
            report = %report_path.display(),
            summary = %render_summary(&report),
            "category analyzed"
        );

        Ok(CategoryOutcome {
            report,
            report_path,
        })
    }

    async fn load_baseline(&self, category: &str) -> Result<LoadedSnapshot> {
        let snapshots = self.snapshots.clone();
        let owned_category = category.to_owned();
        let loaded = run_blocking(self.settings.io_timeout, move || {
            snapshots.load(&owned_category)
        })
        .await?;

        Ok(loaded.unwrap_or_else(|| {
            LoadedSnapshot::degraded(
                category,
                StoreError::ReadFailure {
                    location: category.to_owned(),
                    source: timed_out(self.settings.io_timeout),
                },
            )
        }))
    }
}

/// `Ok(None)` when `limit` elapsed first. The blocking task keeps running.
async fn run_blocking<T, F>(limit: Duration, task: F) -> Result<Option<T>>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    match timeout(limit, spawn_blocking(task)).await {
        Ok(joined) => joined.map(Some).context("store task did not complete"),
        Err(_) => Ok(None),
    }
}

fn timed_out(limit: Duration) -> io::Error {
    io::Error::new(
        io::ErrorKind::TimedOut,
        format!("no response within {} ms", limit.as_millis()),
    )
}

fn timed_out_write(category: &str, limit: Duration) -> StoreError {
    StoreError::WriteFailure {
        location: category.to_owned(),
        source: timed_out(limit),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::thread;

    use chrono::TimeZone;
    use pricewatch_core::{ChangeKind, Snapshot};
    use pricewatch_store::InMemoryStore;
    use tempfile::tempdir;

    use super::*;

    /// Delegates to an [`InMemoryStore`] after sleeping.
    struct SlowStore {
        inner: InMemoryStore,
        load_delay: Duration,
        save_delay: Duration,
    }

    impl SnapshotStore for SlowStore {
        fn load(&self, category: &str) -> LoadedSnapshot {
            thread::sleep(self.load_delay);
            self.inner.load(category)
        }

        fn save(&self, category: &str, snapshot: &Snapshot) -> Result<(), StoreError> {
            thread::sleep(self.save_delay);
            self.inner.save(category, snapshot)
        }
    }

    struct BrokenReports;

    impl ReportStore for BrokenReports {
        fn save_report(&self, _report: &AnalysisReport) -> Result<PathBuf, StoreError> {
            Err(StoreError::WriteFailure {
                location: "reports".to_owned(),
                source: io::Error::other("disk full"),
            })
        }

        fn latest_reports(&self) -> Result<Vec<AnalysisReport>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn settings() -> PipelineSettings {
        PipelineSettings::from_config(&PricewatchConfig::default())
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).unwrap()
    }

    fn job(input: PathBuf) -> CategoryJob {
        CategoryJob {
            name: "Architecture".to_owned(),
            input,
            base_url: Some("https://lego.tr/themes/architecture".to_owned()),
            threshold_percent: 5.0,
        }
    }

    #[tokio::test]
    async fn corrupt_baseline_is_reset_with_warning() {
        let temp = tempdir().expect("tempdir");
        let input = temp.path().join("architecture.json");
        fs::write(&input, r#"[{"id": "21058", "name": "Great Pyramid", "price": "₺3.499"}]"#)
            .expect("write input");
        let store = Arc::new(InMemoryStore::new());
        store.insert_raw("Architecture", "{broken");
        let pipeline = Pipeline::new(store.clone(), store.clone(), settings());

        let outcome = pipeline
            .run_category(&job(input), now())
            .await
            .expect("run category");

        assert!(outcome.report.summary.baseline_warning.is_some());
        assert_eq!(outcome.report.count(ChangeKind::New), 1);
        assert!(!store.load("Architecture").is_degraded());
    }

    #[tokio::test]
    async fn corrupt_baseline_aborts_when_configured() {
        let temp = tempdir().expect("tempdir");
        let input = temp.path().join("architecture.json");
        fs::write(&input, r#"[{"id": "21058", "price": "₺3.499"}]"#).expect("write input");
        let store = Arc::new(InMemoryStore::new());
        store.insert_raw("Architecture", "{broken");
        let mut settings = settings();
        settings.on_corrupt_snapshot = CorruptSnapshotPolicy::Abort;
        let pipeline = Pipeline::new(store.clone(), store.clone(), settings);

        let err = pipeline
            .run_category(&job(input), now())
            .await
            .expect_err("abort on corrupt baseline");

        assert!(format!("{err:#}").contains("corrupt data"));
        assert_eq!(store.raw("Architecture"), Some(b"{broken".to_vec()));
        assert!(store.reports().is_empty());
    }

    #[tokio::test]
    async fn missing_input_fails_before_touching_the_store() {
        let temp = tempdir().expect("tempdir");
        let store = Arc::new(InMemoryStore::new());
        let pipeline = Pipeline::new(store.clone(), store.clone(), settings());

        let result = pipeline
            .run_category(&job(temp.path().join("missing.json")), now())
            .await;

        assert!(result.is_err());
        assert_eq!(store.raw("Architecture"), None);
    }

    #[tokio::test]
    async fn failed_report_leaves_the_baseline_in_place() {
        let temp = tempdir().expect("tempdir");
        let input = temp.path().join("architecture.json");
        let store = Arc::new(InMemoryStore::new());

        fs::write(&input, r#"[{"id": "10307", "price": "100"}]"#).expect("write input");
        Pipeline::new(store.clone(), store.clone(), settings())
            .run_category(&job(input.clone()), now())
            .await
            .expect("first run");
        let baseline = store.raw("Architecture").expect("baseline");

        fs::write(&input, r#"[{"id": "10307", "price": "50"}]"#).expect("write input");
        let err = Pipeline::new(store.clone(), Arc::new(BrokenReports), settings())
            .run_category(&job(input.clone()), now())
            .await
            .expect_err("report write fails");
        assert!(format!("{err:#}").contains("failed to save report"));
        assert_eq!(store.raw("Architecture"), Some(baseline));

        let retried = Pipeline::new(store.clone(), store.clone(), settings())
            .run_category(&job(input), now())
            .await
            .expect("retried run");
        assert_eq!(retried.report.count(ChangeKind::PriceDecreased), 1);
    }

    fn slow_settings() -> PipelineSettings {
        PipelineSettings {
            io_timeout: Duration::from_millis(10),
            ..settings()
        }
    }

    #[tokio::test]
    async fn slow_baseline_load_degrades_to_empty_with_warning() {
        let temp = tempdir().expect("tempdir");
        let input = temp.path().join("architecture.json");
        fs::write(&input, r#"[{"id": "21058", "price": "₺3.499"}]"#).expect("write input");
        let snapshots = Arc::new(SlowStore {
            inner: InMemoryStore::new(),
            load_delay: Duration::from_millis(300),
            save_delay: Duration::ZERO,
        });
        let reports = Arc::new(InMemoryStore::new());
        let pipeline = Pipeline::new(snapshots, reports.clone(), slow_settings());

        let outcome = pipeline
            .run_category(&job(input), now())
            .await
            .expect("run with slow load");

        let warning = outcome.report.summary.baseline_warning.as_ref().expect("baseline warning");
        assert!(warning.contains("no response within 10 ms"));
        assert_eq!(outcome.report.count(ChangeKind::New), 1);
        assert_eq!(reports.reports().len(), 1);
    }

    #[tokio::test]
    async fn slow_snapshot_save_fails_the_run() {
        let temp = tempdir().expect("tempdir");
        let input = temp.path().join("architecture.json");
        fs::write(&input, r#"[{"id": "21058", "price": "₺3.499"}]"#).expect("write input");
        let snapshots = Arc::new(SlowStore {
            inner: InMemoryStore::new(),
            load_delay: Duration::ZERO,
            save_delay: Duration::from_millis(300),
        });
        let reports = Arc::new(InMemoryStore::new());
        let pipeline = Pipeline::new(snapshots, reports.clone(), slow_settings());

        let err = pipeline
            .run_category(&job(input), now())
            .await
            .expect_err("slow save times out");

        let message = format!("{err:#}");
        assert!(message.contains("failed to save snapshot"));
        assert!(message.contains("no response within 10 ms"));
        assert_eq!(reports.reports().len(), 1);
    }
}
