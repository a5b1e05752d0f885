use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Open key/value record as handed over by the acquisition side.
pub type RawListing = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
#[serde(rename_all = "snake_case")]
pub enum FieldRole {
    Name,
    Id,
    Price,
    Currency,
    Image,
    Description,
    Url,
    AltText,
    Availability,
}

impl FieldRole {
    pub const ALL: [FieldRole; 9] = [
        Self::Name,
        Self::Id,
        Self::Price,
        Self::Currency,
        Self::Image,
        Self::Description,
        Self::Url,
        Self::AltText,
        Self::Availability,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Id => "id",
            Self::Price => "price",
            Self::Currency => "currency",
            Self::Image => "image",
            Self::Description => "description",
            Self::Url => "url",
            Self::AltText => "alt_text",
            Self::Availability => "availability",
        }
    }
}

impl fmt::Display for FieldRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One extracted listing with every field role spelled out.
///
/// Blank values are never stored, so `get` returning `Some` always means there
/// is non-whitespace text to work with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord {
    pub category: String,
    name: Option<String>,
    id: Option<String>,
    price: Option<String>,
    currency: Option<String>,
    image: Option<String>,
    description: Option<String>,
    url: Option<String>,
    alt_text: Option<String>,
    availability: Option<String>,
}

impl RawRecord {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            ..Self::default()
        }
    }

    pub fn with(mut self, role: FieldRole, value: impl Into<String>) -> Self {
        self.set(role, value);
        self
    }

    pub fn set(&mut self, role: FieldRole, value: impl Into<String>) {
        let value = value.into();
        let value = (!value.trim().is_empty()).then_some(value);
        *self.slot_mut(role) = value;
    }

    pub fn get(&self, role: FieldRole) -> Option<&str> {
        let slot = match role {
            FieldRole::Name => &self.name,
            FieldRole::Id => &self.id,
            FieldRole::Price => &self.price,
            FieldRole::Currency => &self.currency,
            FieldRole::Image => &self.image,
            FieldRole::Description => &self.description,
            FieldRole::Url => &self.url,
            FieldRole::AltText => &self.alt_text,
            FieldRole::Availability => &self.availability,
        };
        slot.as_deref()
    }

    fn slot_mut(&mut self, role: FieldRole) -> &mut Option<String> {
        match role {
            FieldRole::Name => &mut self.name,
            FieldRole::Id => &mut self.id,
            FieldRole::Price => &mut self.price,
            FieldRole::Currency => &mut self.currency,
            FieldRole::Image => &mut self.image,
            FieldRole::Description => &mut self.description,
            FieldRole::Url => &mut self.url,
            FieldRole::AltText => &mut self.alt_text,
            FieldRole::Availability => &mut self.availability,
        }
    }
}

/// For every field role, the raw keys to try in order. The first key with a
/// non-blank value supplies the role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorFieldMap {
    #[serde(default = "default_name_keys")]
    pub name: Vec<String>,
    #[serde(default = "default_id_keys")]
    pub id: Vec<String>,
    #[serde(default = "default_price_keys")]
    pub price: Vec<String>,
    #[serde(default = "default_currency_keys")]
    pub currency: Vec<String>,
    #[serde(default = "default_image_keys")]
    pub image: Vec<String>,
    #[serde(default = "default_description_keys")]
    pub description: Vec<String>,
    #[serde(default = "default_url_keys")]
    pub url: Vec<String>,
    #[serde(default = "default_alt_text_keys")]
    pub alt_text: Vec<String>,
    #[serde(default = "default_availability_keys")]
    pub availability: Vec<String>,
}

impl Default for SelectorFieldMap {
    fn default() -> Self {
        Self {
            name: default_name_keys(),
            id: default_id_keys(),
            price: default_price_keys(),
            currency: default_currency_keys(),
            image: default_image_keys(),
            description: default_description_keys(),
            url: default_url_keys(),
            alt_text: default_alt_text_keys(),
            availability: default_availability_keys(),
        }
    }
}

impl SelectorFieldMap {
    pub fn keys(&self, role: FieldRole) -> &[String] {
        match role {
            FieldRole::Name => &self.name,
            FieldRole::Id => &self.id,
            FieldRole::Price => &self.price,
            FieldRole::Currency => &self.currency,
            FieldRole::Image => &self.image,
            FieldRole::Description => &self.description,
            FieldRole::Url => &self.url,
            FieldRole::AltText => &self.alt_text,
            FieldRole::Availability => &self.availability,
        }
    }

    pub fn project(&self, category: &str, listing: &RawListing) -> RawRecord {
        let mut record = RawRecord::new(category);
        for role in FieldRole::ALL {
            let value = self
                .keys(role)
                .iter()
                .filter_map(|key| listing.get(key))
                .find(|value| !value.trim().is_empty());
            if let Some(value) = value {
                record.set(role, value.as_str());
            }
        }
        record
    }
}

fn keys(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| (*value).to_owned()).collect()
}

fn default_name_keys() -> Vec<String> {
    keys(&["name", "title", "product_name"])
}

fn default_id_keys() -> Vec<String> {
    keys(&["id", "set_number", "product_id", "sku"])
}

fn default_price_keys() -> Vec<String> {
    keys(&["price_raw", "price"])
}

fn default_currency_keys() -> Vec<String> {
    keys(&["currency"])
}

fn default_image_keys() -> Vec<String> {
    keys(&["image_url", "image", "img"])
}

fn default_description_keys() -> Vec<String> {
    keys(&["description", "short_description"])
}

fn default_url_keys() -> Vec<String> {
    keys(&["url", "product_url", "href"])
}

fn default_alt_text_keys() -> Vec<String> {
    keys(&["image_alt", "alt"])
}

fn default_availability_keys() -> Vec<String> {
    keys(&["availability"])
}
