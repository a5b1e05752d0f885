use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use pricewatch_config::{CategoryConfig, PricewatchConfig};
use pricewatch_core::{ChangeKind, IdSource};
use pricewatch_store::{InMemoryStore, JsonFileStore, SnapshotStore};
use pricewatchd::pipeline::{Pipeline, PipelineSettings};
use pricewatchd::runner::{RunRequest, Runner, plan_jobs};
use tempfile::tempdir;

fn config() -> PricewatchConfig {
    PricewatchConfig {
        categories: vec![
            CategoryConfig {
                name: "Architecture".to_owned(),
                url: Some("https://lego.tr/themes/architecture".to_owned()),
                input: Some("raw/architecture.json".to_owned()),
                threshold_percent: None,
            },
            CategoryConfig {
                name: "City".to_owned(),
                url: None,
                input: Some("raw/city.json".to_owned()),
                threshold_percent: None,
            },
            CategoryConfig {
                name: "Technic".to_owned(),
                url: None,
                input: Some("raw/technic.json".to_owned()),
                threshold_percent: None,
            },
        ],
        ..PricewatchConfig::default()
    }
}

fn at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, day, 6, 0, 0).unwrap()
}

fn write_input(workspace: &Path, name: &str, body: &str) -> std::io::Result<()> {
    fs::create_dir_all(workspace.join("raw"))?;
    fs::write(workspace.join("raw").join(name), body)
}

#[test]
fn consecutive_runs_report_changes_against_the_stored_baseline()
-> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let workspace = temp.path();
    let config = config();
    let store = Arc::new(JsonFileStore::open(workspace)?);
    let runner = Runner::new(
        Pipeline::new(store.clone(), store.clone(), PipelineSettings::from_config(&config)),
        2,
    )?;
    let request = RunRequest {
        categories: vec!["Architecture".to_owned()],
        ..RunRequest::default()
    };
    let jobs = plan_jobs(workspace, &config, &request)?;

    write_input(
        workspace,
        "architecture.json",
        r#"{"products": [
            {"name": "Eiffel Tower", "id": "10307", "price_raw": "₺12.999,99", "url": "/tr-tr/product/eiffel-tower-10307"},
            {"name": "Great Pyramid of Giza", "id": "21058", "price_raw": "₺3.499,99"},
            {"name": "Taj Mahal", "price_raw": "₺4.299"},
            {"name": "Tükendi", "price_raw": "Stokta yok"}
        ]}"#,
    )?;

    let first = runner.run_once(jobs.clone(), at(1));
    assert_eq!(first.len(), 1);
    let first = first[0].outcome.as_ref().map_err(|err| format!("{err:#}"))?;
    assert_eq!(first.report.count(ChangeKind::New), 3);
    assert_eq!(first.report.summary.run.invalid_price, 1);
    assert_eq!(first.report.summary.run.surrogate_ids, 1);
    assert!(first.report_path.exists());

    let stored = store.load("Architecture");
    assert!(!stored.is_degraded());
    assert_eq!(stored.snapshot.len(), 3);
    let eiffel = stored.snapshot.get("10307").ok_or("eiffel tower missing")?;
    assert_eq!(
        eiffel.url.as_deref(),
        Some("https://lego.tr/tr-tr/product/eiffel-tower-10307")
    );
    assert_eq!(eiffel.id_source, IdSource::Explicit);

    write_input(
        workspace,
        "architecture.json",
        r#"[
            {"name": "Eiffel Tower", "id": "10307", "price_raw": "₺11.999,99"},
            {"name": "Taj Mahal", "price_raw": "₺4.299"},
            {"name": "Notre-Dame de Paris", "id": "21061", "price_raw": "₺9.999"}
        ]"#,
    )?;

    let second = runner.run_once(jobs, at(2));
    let second = second[0].outcome.as_ref().map_err(|err| format!("{err:#}"))?;
    let kinds: Vec<(&str, ChangeKind)> = second
        .report
        .events
        .iter()
        .map(|event| (event.product_id.as_str(), event.kind))
        .collect();
    assert_eq!(
        kinds[..3],
        [
            ("21061", ChangeKind::New),
            ("10307", ChangeKind::PriceDecreased),
            ("21058", ChangeKind::Removed),
        ]
    );
    assert_eq!(kinds[3].1, ChangeKind::Unchanged);
    assert_ne!(first.report_path, second.report_path);

    let stored = store.load("Architecture");
    assert_eq!(stored.snapshot.captured_at, Some(at(2)));
    assert!(stored.snapshot.get("21058").is_none());

    let report_files = fs::read_dir(store.reports_dir())?.count();
    assert_eq!(report_files, 2);
    Ok(())
}

#[test]
fn one_failing_category_does_not_stop_the_others() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let workspace = temp.path();
    let config = config();
    write_input(
        workspace,
        "architecture.json",
        r#"[{"id": "21058", "price_raw": "₺3.499"}]"#,
    )?;
    write_input(workspace, "city.json", r#"{"listings": []}"#)?;
    write_input(workspace, "technic.json", r#"[{"id": "42115", "price": "€449.99"}]"#)?;

    let store = Arc::new(InMemoryStore::new());
    let runner = Runner::new(
        Pipeline::new(store.clone(), store.clone(), PipelineSettings::from_config(&config)),
        2,
    )?;
    let jobs = plan_jobs(workspace, &config, &RunRequest::default())?;

    let results = runner.run_once(jobs, at(1));

    let names: Vec<&str> = results.iter().map(|result| result.category.as_str()).collect();
    assert_eq!(names, vec!["Architecture", "City", "Technic"]);
    assert!(results[0].is_success());
    assert!(!results[1].is_success());
    assert!(results[2].is_success());
    assert!(store.raw("City").is_none());

    let technic = store.load("Technic");
    let product = technic.snapshot.get("42115").ok_or("technic product missing")?;
    assert_eq!(product.price.currency, "EUR");
    Ok(())
}

#[test]
fn failed_snapshot_write_keeps_the_previous_baseline() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let workspace = temp.path();
    let config = config();
    let snapshots = Arc::new(InMemoryStore::new());
    let reports = Arc::new(InMemoryStore::new());
    let runner = Runner::new(
        Pipeline::new(snapshots.clone(), reports.clone(), PipelineSettings::from_config(&config)),
        1,
    )?;
    let request = RunRequest {
        categories: vec!["City".to_owned()],
        ..RunRequest::default()
    };
    let jobs = plan_jobs(workspace, &config, &request)?;

    write_input(workspace, "city.json", r#"[{"id": "60380", "price_raw": "₺999"}]"#)?;
    let first = runner.run_once(jobs.clone(), at(1));
    assert!(first[0].is_success());
    let baseline = snapshots.raw("City").ok_or("baseline missing")?;

    write_input(workspace, "city.json", r#"[{"id": "60380", "price_raw": "₺799"}]"#)?;
    snapshots.set_fail_writes(true);
    let second = runner.run_once(jobs.clone(), at(2));

    let err = second[0].outcome.as_ref().expect_err("write should fail");
    assert!(format!("{err:#}").contains("failed to save snapshot"));
    assert_eq!(snapshots.raw("City"), Some(baseline));
    assert_eq!(reports.reports().len(), 2);

    snapshots.set_fail_writes(false);
    let third = runner.run_once(jobs, at(3));
    let third = third[0].outcome.as_ref().map_err(|err| format!("{err:#}"))?;
    assert_eq!(third.report.count(ChangeKind::PriceDecreased), 1);
    Ok(())
}
