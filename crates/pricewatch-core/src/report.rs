use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ChangeEvent, ChangeKind, Money, ProductId};

/// Record-level outcomes of one run, surfaced next to the change counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub records_seen: usize,
    pub normalized: usize,
    pub invalid_price: usize,
    pub missing_required_field: usize,
    pub identity_collisions: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collided_ids: Vec<ProductId>,
    pub surrogate_ids: usize,
    pub currency_mismatches: usize,
}

impl RunStats {
    pub fn skipped(&self) -> usize {
        self.invalid_price + self.missing_required_field
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Only kinds that occur are present.
    pub counts: BTreeMap<ChangeKind, usize>,
    pub total_events: usize,
    #[serde(default)]
    pub run: RunStats,
    /// Set when the baseline could not be read and an empty one was used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub category: String,
    pub generated_at: DateTime<Utc>,
    pub threshold_percent: f64,
    pub events: Vec<ChangeEvent>,
    pub summary: ReportSummary,
}

impl AnalysisReport {
    pub fn with_run_stats(mut self, run: RunStats) -> Self {
        self.summary.run = run;
        self
    }

    pub fn with_baseline_warning(mut self, warning: impl Into<String>) -> Self {
        self.summary.baseline_warning = Some(warning.into());
        self
    }

    pub fn count(&self, kind: ChangeKind) -> usize {
        self.summary.counts.get(&kind).copied().unwrap_or(0)
    }

    /// True when anything other than `UNCHANGED` was detected.
    pub fn has_changes(&self) -> bool {
        self.summary
            .counts
            .keys()
            .any(|kind| *kind != ChangeKind::Unchanged)
    }
}

pub fn build_report(
    category: &str,
    events: Vec<ChangeEvent>,
    threshold_percent: f64,
    now: DateTime<Utc>,
) -> AnalysisReport {
    let mut counts = BTreeMap::new();
    for event in &events {
        *counts.entry(event.kind).or_insert(0) += 1;
    }

    AnalysisReport {
        category: category.to_owned(),
        generated_at: now,
        threshold_percent,
        summary: ReportSummary {
            counts,
            total_events: events.len(),
            run: RunStats::default(),
            baseline_warning: None,
        },
        events,
    }
}

pub fn render_summary(report: &AnalysisReport) -> String {
    let counts = ChangeKind::ALL
        .iter()
        .map(|kind| format!("{kind}={}", report.count(*kind)))
        .collect::<Vec<_>>()
        .join(" ");
    let run = &report.summary.run;
    let mut line = format!(
        "category={} {counts} skipped={} collisions={} surrogate_ids={}",
        report.category,
        run.skipped(),
        run.identity_collisions,
        run.surrogate_ids,
    );
    if report.summary.baseline_warning.is_some() {
        line.push_str(" baseline=degraded");
    }
    line
}

const OVERVIEW_TOP_CHANGES: usize = 3;
const OVERVIEW_NEW_PRODUCTS: usize = 3;

/// Text overview of the latest report of several categories: per-category
/// counts, the largest price moves, the first new products, then totals.
pub fn render_overview(reports: &[AnalysisReport], now: DateTime<Utc>) -> String {
    let mut out = String::new();
    if reports.is_empty() {
        out.push_str("No analysis reports found. Run pricewatchd first.\n");
        return out;
    }

    let mut ordered: Vec<&AnalysisReport> = reports.iter().collect();
    ordered.sort_by(|a, b| a.category.cmp(&b.category));

    let rule = "=".repeat(50);
    let _ = writeln!(out, "Report generated at: {}", now.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(out, "Categories monitored: {}", ordered.len());
    let _ = writeln!(out, "{rule}");

    let (mut price_changes, mut new_products, mut removed) = (0, 0, 0);
    for report in ordered {
        let changed =
            report.count(ChangeKind::PriceIncreased) + report.count(ChangeKind::PriceDecreased);
        price_changes += changed;
        new_products += report.count(ChangeKind::New);
        removed += report.count(ChangeKind::Removed);

        let _ = writeln!(out, "\n>> {}", report.category);
        let _ = writeln!(
            out,
            "   Last updated: {}",
            report.generated_at.format("%Y-%m-%d %H:%M:%S")
        );
        let _ = writeln!(out, "   Price changes: {changed}");
        let _ = writeln!(out, "   New products: {}", report.count(ChangeKind::New));
        let _ = writeln!(out, "   Removed products: {}", report.count(ChangeKind::Removed));
        if let Some(warning) = &report.summary.baseline_warning {
            let _ = writeln!(out, "   Baseline warning: {warning}");
        }

        let mut moves: Vec<&ChangeEvent> = report
            .events
            .iter()
            .filter(|event| event.is_price_change())
            .collect();
        moves.sort_by(|a, b| move_size(b).total_cmp(&move_size(a)));
        if !moves.is_empty() {
            out.push_str("\n   Top price changes:\n");
            for event in moves.into_iter().take(OVERVIEW_TOP_CHANGES) {
                let _ = writeln!(out, "   - {}", describe_move(event));
            }
        }

        let fresh: Vec<&ChangeEvent> = report
            .events
            .iter()
            .filter(|event| event.kind == ChangeKind::New)
            .take(OVERVIEW_NEW_PRODUCTS)
            .collect();
        if !fresh.is_empty() {
            out.push_str("\n   New products:\n");
            for event in fresh {
                let price = event
                    .new_price
                    .as_ref()
                    .map_or_else(|| "-".to_owned(), ToString::to_string);
                let _ = writeln!(out, "   - {}: {price}", display_name(event));
            }
        }
    }

    let _ = writeln!(out, "\n{rule}");
    let _ = writeln!(out, "Total price changes: {price_changes}");
    let _ = writeln!(out, "Total new products: {new_products}");
    let _ = writeln!(out, "Total removed products: {removed}");
    let _ = writeln!(out, "{rule}");
    out
}

/// A move from a zero price has no percentage and ranks above any other.
fn move_size(event: &ChangeEvent) -> f64 {
    event.percent_change.map_or(f64::INFINITY, f64::abs)
}

fn describe_move(event: &ChangeEvent) -> String {
    let price = |money: &Option<Money>| {
        money
            .as_ref()
            .map_or_else(|| "-".to_owned(), ToString::to_string)
    };
    let arrow = if event.kind == ChangeKind::PriceIncreased {
        '↑'
    } else {
        '↓'
    };
    let percent = event
        .percent_change
        .map_or_else(|| "n/a".to_owned(), |value| format!("{:.1}%", value.abs()));

    format!(
        "{}: {} -> {} ({arrow}{percent})",
        display_name(event),
        price(&event.old_price),
        price(&event.new_price),
    )
}

fn display_name(event: &ChangeEvent) -> &str {
    event.name.as_deref().unwrap_or(&event.product_id)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use chrono::TimeZone;
    use rust_decimal::Decimal;

    use super::*;
    use crate::{IdSource, Money};

    fn event(id: &str, kind: ChangeKind) -> ChangeEvent {
        ChangeEvent {
            product_id: id.to_owned(),
            kind,
            id_source: IdSource::Explicit,
            name: None,
            old_price: None,
            new_price: Some(Money::new(Decimal::from_str("10").unwrap(), "TRY")),
            percent_change: None,
            absolute_change: None,
            changed_fields: Vec::new(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).unwrap()
    }

    #[test]
    fn counts_only_present_kinds() {
        let report = build_report("Architecture", vec![event("X", ChangeKind::New)], 5.0, now());

        assert_eq!(report.summary.counts.len(), 1);
        assert_eq!(report.count(ChangeKind::New), 1);
        assert_eq!(report.count(ChangeKind::Removed), 0);
        assert_eq!(report.summary.total_events, 1);
        assert_eq!(report.generated_at, now());
        assert!(report.has_changes());

        let json = serde_json::to_value(&report.summary.counts).expect("serialize");
        assert_eq!(json, serde_json::json!({"NEW": 1}));
    }

    #[test]
    fn unchanged_only_report_has_no_changes() {
        let report = build_report(
            "Architecture",
            vec![
                event("A", ChangeKind::Unchanged),
                event("B", ChangeKind::Unchanged),
            ],
            5.0,
            now(),
        );

        assert!(!report.has_changes());
        assert_eq!(report.count(ChangeKind::Unchanged), 2);
    }

    #[test]
    fn summary_line_includes_run_stats_and_warning() {
        let report = build_report("City", vec![event("A", ChangeKind::Removed)], 5.0, now())
            .with_run_stats(RunStats {
                records_seen: 4,
                normalized: 2,
                invalid_price: 1,
                missing_required_field: 1,
                identity_collisions: 1,
                collided_ids: vec!["Z".to_owned()],
                surrogate_ids: 0,
                currency_mismatches: 0,
            })
            .with_baseline_warning("corrupt data");

        assert_eq!(
            render_summary(&report),
            "category=City new=0 price_decreased=0 price_increased=0 removed=1 unchanged=0 \
             skipped=2 collisions=1 surrogate_ids=0 baseline=degraded"
        );
    }

    #[test]
    fn report_round_trips_through_json() {
        let report = build_report(
            "Architecture",
            vec![event("X", ChangeKind::New), event("Y", ChangeKind::Unchanged)],
            2.5,
            now(),
        );

        let json = serde_json::to_string_pretty(&report).expect("serialize");
        let decoded: AnalysisReport = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(decoded, report);
    }

    fn price_move(id: &str, old: &str, new: &str, percent: Option<f64>) -> ChangeEvent {
        let kind = if percent.is_some_and(|value| value > 0.0) {
            ChangeKind::PriceIncreased
        } else {
            ChangeKind::PriceDecreased
        };
        ChangeEvent {
            name: Some(format!("Set {id}")),
            old_price: Some(Money::new(Decimal::from_str(old).unwrap(), "TRY")),
            new_price: Some(Money::new(Decimal::from_str(new).unwrap(), "TRY")),
            percent_change: percent,
            ..event(id, kind)
        }
    }

    #[test]
    fn overview_lists_top_moves_new_products_and_totals() {
        let architecture = build_report(
            "Architecture",
            vec![
                event("N1", ChangeKind::New),
                event("N2", ChangeKind::New),
                event("N3", ChangeKind::New),
                event("N4", ChangeKind::New),
                price_move("A", "100", "90", Some(-10.0)),
                price_move("B", "100", "50", Some(-50.0)),
                price_move("C", "100", "120", Some(20.0)),
                price_move("D", "100", "106", Some(6.0)),
                event("R", ChangeKind::Removed),
            ],
            5.0,
            now(),
        );
        let city = build_report("City", vec![event("U", ChangeKind::Unchanged)], 5.0, now())
            .with_baseline_warning("corrupt data");

        let text = render_overview(&[city, architecture], now());

        assert!(text.contains("Categories monitored: 2"));
        assert!(text.find(">> Architecture") < text.find(">> City"));
        assert!(text.contains("   Last updated: 2026-03-01 06:00:00"));
        assert!(text.contains("   Price changes: 4"));
        assert!(text.contains("   - Set B: 100 TRY -> 50 TRY (↓50.0%)"));
        assert!(text.contains("   - Set C: 100 TRY -> 120 TRY (↑20.0%)"));
        assert!(text.contains("   - Set A: 100 TRY -> 90 TRY (↓10.0%)"));
        assert!(!text.contains("Set D"));
        assert!(text.contains("   - N3: 10 TRY"));
        assert!(!text.contains("N4"));
        assert!(text.contains("   Baseline warning: corrupt data"));
        assert!(text.contains("Total price changes: 4"));
        assert!(text.contains("Total new products: 4"));
        assert!(text.contains("Total removed products: 1"));
    }

    #[test]
    fn overview_without_reports_says_so() {
        let text = render_overview(&[], now());

        assert!(text.starts_with("No analysis reports found"));
    }
}
