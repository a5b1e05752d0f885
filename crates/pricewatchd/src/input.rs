use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use pricewatch_core::RawListing;
use rust_decimal::Decimal;
use serde_json::{Map, Number, Value};

/// Fraction width the price parser reads as thousands grouping.
const GROUPING_WIDTH: u32 = 3;

/// Reads the listings an extractor produced for one category.
pub fn read_listings(path: &Path) -> Result<Vec<RawListing>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read listings from {}", path.display()))?;
    parse_listings(&text).with_context(|| format!("invalid listings file {}", path.display()))
}

/// Accepts a top-level array of objects or `{"products": [...]}`.
///
/// Scalars become strings and arrays of scalars are joined with ", ". Nulls
/// and nested objects are dropped. Entries that are not objects are skipped.
pub fn parse_listings(text: &str) -> Result<Vec<RawListing>> {
    let value: Value = serde_json::from_str(text).context("listings are not valid JSON")?;

    let entries = match value {
        Value::Array(entries) => entries,
        Value::Object(mut object) => match object.remove("products") {
            Some(Value::Array(entries)) => entries,
            _ => bail!("expected a \"products\" array in the listings object"),
        },
        _ => bail!("expected a JSON array of listings or an object with a \"products\" array"),
    };

    let mut listings = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        match entry {
            Value::Object(fields) => listings.push(flatten(fields)),
            other => tracing::warn!(
                entry = index,
                kind = json_kind(&other),
                "skipping listing that is not an object"
            ),
        }
    }
    Ok(listings)
}

fn flatten(fields: Map<String, Value>) -> RawListing {
    fields
        .into_iter()
        .filter_map(|(key, value)| field_text(value).map(|text| (key, text)))
        .collect()
}

fn field_text(value: Value) -> Option<String> {
    match value {
        Value::Array(items) => {
            let parts: Vec<String> = items.into_iter().filter_map(scalar_text).collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        other => scalar_text(other),
    }
}

fn scalar_text(value: Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text),
        Value::Number(number) => Some(number_text(&number)),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Plain decimal text for a JSON number. A three-digit fraction gets a
/// trailing zero so `12.345` is not read back as `12345`.
fn number_text(number: &Number) -> String {
    let text = number.to_string();
    let parsed = Decimal::from_str(&text).or_else(|_| Decimal::from_scientific(&text));
    match parsed {
        Ok(value) => {
            let mut value = value.normalize();
            if value.scale() == GROUPING_WIDTH {
                value.rescale(GROUPING_WIDTH + 1);
            }
            value.to_string()
        }
        Err(_) => text,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
