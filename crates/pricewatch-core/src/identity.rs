use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::normalize::NormalizedProduct;
use crate::raw::{FieldRole, RawRecord};
use crate::{IdSource, Product, ProductId};

pub const SURROGATE_PREFIX: &str = "sur-";
const SURROGATE_HEX_LEN: usize = 16;

/// Path of an absolute or relative URL, without query or fragment.
static URL_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[A-Za-z][A-Za-z0-9+.\-]*://[^/?#]*)?([^?#]*)")
        .expect("url path regex is valid")
});

/// The segment after a `product` or `products` path segment.
static PRODUCT_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|/)products?/([^/]+)").expect("product segment regex is valid")
});

static PRODUCT_SLUG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[-_]*[A-Za-z0-9][A-Za-z0-9_-]*$").expect("product slug regex is valid")
});

/// Syntax accepted for catalog identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityPolicy {
    /// Length bounds for an explicit identifier field.
    #[serde(default = "default_min_len")]
    pub min_len: usize,
    #[serde(default = "default_max_len")]
    pub max_len: usize,
    /// Digit-run bounds for catalog numbers found in free text.
    #[serde(default = "default_min_digits")]
    pub min_digits: usize,
    #[serde(default = "default_max_digits")]
    pub max_digits: usize,
}

impl Default for IdentityPolicy {
    fn default() -> Self {
        Self {
            min_len: default_min_len(),
            max_len: default_max_len(),
            min_digits: default_min_digits(),
            max_digits: default_max_digits(),
        }
    }
}

fn default_min_len() -> usize {
    3
}

fn default_max_len() -> usize {
    16
}

fn default_min_digits() -> usize {
    4
}

fn default_max_digits() -> usize {
    7
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedId {
    pub id: ProductId,
    pub source: IdSource,
}

#[derive(Debug, Clone)]
pub struct IdentityResolver {
    policy: IdentityPolicy,
    catalog_number: Option<Regex>,
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self::new(IdentityPolicy::default())
    }
}

impl IdentityResolver {
    pub fn new(policy: IdentityPolicy) -> Self {
        let catalog_number = catalog_number_regex(&policy);
        Self {
            policy,
            catalog_number,
        }
    }

    /// Tries the explicit id field, then catalog numbers inside free text,
    /// then a surrogate hash. Never fails.
    pub fn resolve(&self, raw: &RawRecord, normalized: &NormalizedProduct) -> ResolvedId {
        if let Some(explicit) = raw
            .get(FieldRole::Id)
            .map(str::trim)
            .filter(|value| self.is_valid_explicit(value))
        {
            return ResolvedId {
                id: explicit.to_owned(),
                source: IdSource::Explicit,
            };
        }

        if let Some(extracted) = self.extract(raw, normalized) {
            return ResolvedId {
                id: extracted,
                source: IdSource::Extracted,
            };
        }

        let basis = normalized
            .name
            .as_deref()
            .or(normalized.description.as_deref())
            .or(normalized.url.as_deref())
            .or(normalized.image_url.as_deref())
            .unwrap_or_default();
        ResolvedId {
            id: surrogate_id(&normalized.category, basis),
            source: IdSource::Surrogate,
        }
    }

    pub fn is_valid_explicit(&self, value: &str) -> bool {
        let len = value.chars().count();
        (self.policy.min_len..=self.policy.max_len).contains(&len)
            && value
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
            && value.chars().any(|ch| ch.is_ascii_digit())
            && !value.starts_with('-')
            && !value.ends_with('-')
    }

    fn extract(&self, raw: &RawRecord, normalized: &NormalizedProduct) -> Option<String> {
        let path = normalized.url.as_deref().map(url_path);
        let segment = path.and_then(product_segment);

        let candidates = [
            raw.get(FieldRole::Id),
            segment,
            path,
            raw.get(FieldRole::AltText),
            normalized.name.as_deref(),
        ];
        candidates
            .into_iter()
            .flatten()
            .find_map(|text| self.catalog_number(text))
            .map(str::to_owned)
            .or_else(|| segment.and_then(slug_id))
    }

    /// First digit run within the configured bounds that is not glued to
    /// letters or other digits.
    pub fn catalog_number<'a>(&self, text: &'a str) -> Option<&'a str> {
        self.catalog_number
            .as_ref()?
            .captures(text)
            .and_then(|found| found.get(1))
            .map(|run| run.as_str())
    }
}

fn catalog_number_regex(policy: &IdentityPolicy) -> Option<Regex> {
    let min = policy.min_digits.max(1);
    let max = policy.max_digits.max(min);
    let pattern = format!(r"(?:^|[^0-9A-Za-z])([0-9]{{{min},{max}}})(?:$|[^0-9A-Za-z])");
    match Regex::new(&pattern) {
        Ok(regex) => Some(regex),
        Err(err) => {
            tracing::warn!(
                min_digits = min,
                max_digits = max,
                error = %err,
                "catalog number bounds unusable, extraction from text disabled"
            );
            None
        }
    }
}

/// `sur-` followed by 16 hex chars of blake3 over the lowercased,
/// whitespace-collapsed category and basis text.
pub fn surrogate_id(category: &str, basis: &str) -> ProductId {
    let material = format!("{}\n{}", fold(category), fold(basis));
    let hex = blake3::hash(material.as_bytes()).to_hex();
    format!("{SURROGATE_PREFIX}{}", &hex[..SURROGATE_HEX_LEN])
}

fn fold(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

fn url_path(url: &str) -> &str {
    URL_PATH
        .captures(url)
        .and_then(|found| found.get(1))
        .map_or("", |path| path.as_str())
}

fn product_segment(path: &str) -> Option<&str> {
    PRODUCT_SEGMENT
        .captures(path)
        .and_then(|found| found.get(1))
        .map(|segment| segment.as_str())
}

fn slug_id(segment: &str) -> Option<String> {
    PRODUCT_SLUG
        .is_match(segment)
        .then(|| segment.to_ascii_lowercase())
}

/// The products of one run keyed by id. Later inserts replace earlier ones
/// and every replacement is recorded.
#[derive(Debug, Clone, Default)]
pub struct ProductSet {
    products: BTreeMap<ProductId, Product>,
    collided_ids: Vec<ProductId>,
}

impl ProductSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, product: Product) -> Option<Product> {
        let id = product.id.clone();
        let replaced = self.products.insert(id.clone(), product);
        if replaced.is_some() {
            self.collided_ids.push(id);
        }
        replaced
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Product> {
        self.products.get(id)
    }

    pub fn collision_count(&self) -> usize {
        self.collided_ids.len()
    }

    pub fn collided_ids(&self) -> &[ProductId] {
        &self.collided_ids
    }

    pub fn into_parts(self) -> (BTreeMap<ProductId, Product>, Vec<ProductId>) {
        (self.products, self.collided_ids)
    }
}
