use chrono::{DateTime, Utc};

use crate::Snapshot;
use crate::detect::detect;
use crate::identity::{IdentityPolicy, IdentityResolver, ProductSet};
use crate::normalize::{NormalizationError, NormalizeOptions, normalize};
use crate::raw::RawRecord;
use crate::report::{AnalysisReport, RunStats, build_report};

#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    pub normalize: NormalizeOptions,
    pub identity: IdentityPolicy,
    pub threshold_percent: f64,
}

/// The next baseline together with the report describing how it differs
/// from the previous one.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub snapshot: Snapshot,
    pub report: AnalysisReport,
}

/// One category run without I/O: normalize, resolve identities, diff against
/// `previous`, report. Bad records are skipped and counted.
pub fn analyze(
    category: &str,
    records: &[RawRecord],
    previous: &Snapshot,
    options: &AnalyzeOptions,
    now: DateTime<Utc>,
) -> Analysis {
    let resolver = IdentityResolver::new(options.identity.clone());
    let mut stats = RunStats {
        records_seen: records.len(),
        ..RunStats::default()
    };
    let mut products = ProductSet::new();

    for (index, raw) in records.iter().enumerate() {
        let normalized = match normalize(raw, &options.normalize, now) {
            Ok(normalized) => normalized,
            Err(err) => {
                match err {
                    NormalizationError::InvalidPrice(_) => stats.invalid_price += 1,
                    NormalizationError::MissingRequiredField(_) => {
                        stats.missing_required_field += 1
                    }
                }
                tracing::warn!(
                    category,
                    record = index,
                    code = err.code(),
                    error = %err,
                    "skipping listing"
                );
                continue;
            }
        };

        stats.normalized += 1;
        let resolved = resolver.resolve(raw, &normalized);
        if let Some(replaced) = products.insert(normalized.into_product(resolved)) {
            tracing::warn!(
                category,
                record = index,
                product_id = %replaced.id,
                "duplicate product id in one run, keeping the later listing"
            );
        }
    }

    let (products, collided_ids) = products.into_parts();
    stats.identity_collisions = collided_ids.len();
    stats.collided_ids = collided_ids;
    stats.surrogate_ids = products
        .values()
        .filter(|product| product.id_source.is_low_confidence())
        .count();

    let events = detect(previous, &products, options.threshold_percent);
    stats.currency_mismatches = events.iter().filter(|event| event.currency_changed()).count();

    let report =
        build_report(category, events, options.threshold_percent, now).with_run_stats(stats);
    let snapshot = Snapshot::capture(category, now, products);

    Analysis { snapshot, report }
}
