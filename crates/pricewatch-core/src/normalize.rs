use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::identity::ResolvedId;
use crate::price::{detect_currency, normalize_currency_code, parse_amount};
use crate::raw::{FieldRole, RawRecord};
use crate::{DEFAULT_CURRENCY, Money, Product};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizationError {
    #[error("no usable amount in price text '{0}'")]
    InvalidPrice(String),
    #[error("required field '{0}' is missing")]
    MissingRequiredField(FieldRole),
}

impl NormalizationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidPrice(_) => "invalid_price",
            Self::MissingRequiredField(_) => "missing_required_field",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizeOptions {
    /// Used when neither the price text nor the currency field names one.
    pub default_currency: String,
    /// Category page URL; its origin resolves root-relative links.
    pub base_url: Option<String>,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            default_currency: DEFAULT_CURRENCY.to_owned(),
            base_url: None,
        }
    }
}

/// A product in canonical form that still lacks its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedProduct {
    pub name: Option<String>,
    pub price: Money,
    pub image_url: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub availability: Option<String>,
    pub category: String,
    pub observed_at: DateTime<Utc>,
}

impl NormalizedProduct {
    pub fn into_product(self, resolved: ResolvedId) -> Product {
        Product {
            id: resolved.id,
            id_source: resolved.source,
            name: self.name,
            price: self.price,
            image_url: self.image_url,
            description: self.description,
            url: self.url,
            availability: self.availability,
            category: self.category,
            observed_at: self.observed_at,
        }
    }
}

pub fn normalize(
    raw: &RawRecord,
    options: &NormalizeOptions,
    observed_at: DateTime<Utc>,
) -> Result<NormalizedProduct, NormalizationError> {
    let price_text = raw
        .get(FieldRole::Price)
        .ok_or(NormalizationError::MissingRequiredField(FieldRole::Price))?;
    let amount = parse_amount(price_text)
        .ok_or_else(|| NormalizationError::InvalidPrice(price_text.trim().to_owned()))?;

    let currency = detect_currency(price_text)
        .map(str::to_owned)
        .or_else(|| {
            raw.get(FieldRole::Currency)
                .and_then(normalize_currency_code)
        })
        .unwrap_or_else(|| options.default_currency.clone());

    let base_url = options.base_url.as_deref();

    Ok(NormalizedProduct {
        name: raw.get(FieldRole::Name).and_then(clean_text),
        price: Money::new(amount, currency),
        image_url: raw
            .get(FieldRole::Image)
            .and_then(|value| clean_url(value, base_url)),
        description: raw.get(FieldRole::Description).and_then(clean_text),
        url: raw
            .get(FieldRole::Url)
            .and_then(|value| clean_url(value, base_url)),
        availability: raw.get(FieldRole::Availability).and_then(clean_text),
        category: clean_text(&raw.category).unwrap_or_default(),
        observed_at,
    })
}

/// Decodes common entity leftovers and collapses whitespace runs. Blank input
/// yields `None` so that "absent" and "empty" never diverge.
pub fn clean_text(input: &str) -> Option<String> {
    let decoded = input
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&#39;", "'")
        .replace("&quot;", "\"");

    let collapsed = decoded.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}

/// Keeps absolute http(s) URLs, upgrades protocol-relative ones, resolves
/// root-relative paths against `base_url` when known. Anything else is dropped.
pub fn clean_url(input: &str, base_url: Option<&str>) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
        return None;
    }

    if trimmed.starts_with("https://") || trimmed.starts_with("http://") {
        return has_host(trimmed).then(|| trimmed.to_owned());
    }

    if let Some(rest) = trimmed.strip_prefix("//") {
        return (!rest.is_empty()).then(|| format!("https://{rest}"));
    }

    if trimmed.starts_with('/') {
        let resolved = base_url
            .and_then(origin)
            .map(|origin| format!("{origin}{trimmed}"))
            .unwrap_or_else(|| trimmed.to_owned());
        return Some(resolved);
    }

    None
}

fn has_host(url: &str) -> bool {
    url.split_once("://")
        .map(|(_, rest)| rest.split(['/', '?', '#']).next().unwrap_or_default())
        .is_some_and(|host| !host.is_empty())
}

fn origin(url: &str) -> Option<&str> {
    let trimmed = url.trim();
    let (_, rest) = trimmed.split_once("://")?;
    let scheme_len = trimmed.len() - rest.len();
    let host_len = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    (host_len > 0).then(|| &trimmed[..scheme_len + host_len])
}
