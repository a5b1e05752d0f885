use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

mod analyze;
mod detect;
mod identity;
mod normalize;
mod price;
mod raw;
mod report;

pub use analyze::{Analysis, AnalyzeOptions, analyze};
pub use detect::detect;
pub use identity::{IdentityPolicy, IdentityResolver, ProductSet, ResolvedId, surrogate_id};
pub use normalize::{
    NormalizationError, NormalizeOptions, NormalizedProduct, clean_text, clean_url, normalize,
};
pub use price::{detect_currency, normalize_currency_code, parse_amount};
pub use raw::{FieldRole, RawListing, RawRecord, SelectorFieldMap};
pub use report::{AnalysisReport, ReportSummary, RunStats, build_report, render_overview, render_summary};

pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;
pub const DEFAULT_CURRENCY: &str = "TRY";

pub type ProductId = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount: Decimal,
    pub currency: String,
}

impl Money {
    pub fn new(amount: Decimal, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

/// How confidently a product id identifies the same physical item across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
#[serde(rename_all = "snake_case")]
pub enum IdSource {
    /// The configured identifier field held a well-formed catalog number.
    Explicit,
    /// A catalog number was recovered from free text (URL, alt text, name).
    Extracted,
    /// Hash of category and normalized name. Renaming a product changes it.
    Surrogate,
}

impl IdSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Extracted => "extracted",
            Self::Surrogate => "surrogate",
        }
    }

    pub fn is_low_confidence(self) -> bool {
        matches!(self, Self::Surrogate)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub id_source: IdSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub price: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability: Option<String>,
    pub category: String,
    pub observed_at: DateTime<Utc>,
}

/// Every product of one category as observed by a single run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default = "default_format_version")]
    pub format_version: u32,
    pub category: String,
    /// `None` only for the empty baseline of a category that was never captured.
    #[serde(default)]
    pub captured_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub products: BTreeMap<ProductId, Product>,
}

impl Snapshot {
    pub fn empty(category: impl Into<String>) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            category: category.into(),
            captured_at: None,
            products: BTreeMap::new(),
        }
    }

    pub fn capture(
        category: impl Into<String>,
        captured_at: DateTime<Utc>,
        products: BTreeMap<ProductId, Product>,
    ) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            category: category.into(),
            captured_at: Some(captured_at),
            products,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn get(&self, id: &str) -> Option<&Product> {
        self.products.get(id)
    }
}

fn default_format_version() -> u32 {
    SNAPSHOT_FORMAT_VERSION
}

/// Declaration order is the presentation order of a change report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    New,
    PriceDecreased,
    PriceIncreased,
    Removed,
    Unchanged,
}

impl ChangeKind {
    pub const ALL: [ChangeKind; 5] = [
        Self::New,
        Self::PriceDecreased,
        Self::PriceIncreased,
        Self::Removed,
        Self::Unchanged,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::PriceDecreased => "price_decreased",
            Self::PriceIncreased => "price_increased",
            Self::Removed => "removed",
            Self::Unchanged => "unchanged",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub product_id: ProductId,
    pub kind: ChangeKind,
    pub id_source: IdSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub old_price: Option<Money>,
    pub new_price: Option<Money>,
    pub percent_change: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub absolute_change: Option<Decimal>,
    /// Non-price attributes that differ between the two observations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed_fields: Vec<String>,
}

impl ChangeEvent {
    pub fn is_price_change(&self) -> bool {
        matches!(
            self.kind,
            ChangeKind::PriceIncreased | ChangeKind::PriceDecreased
        )
    }

    pub fn currency_changed(&self) -> bool {
        self.changed_fields.iter().any(|field| field == "currency")
    }
}
