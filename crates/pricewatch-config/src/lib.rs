use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use pricewatch_core::{DEFAULT_CURRENCY, IdentityPolicy, SelectorFieldMap, normalize_currency_code};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const PRICEWATCH_DIR_NAME: &str = ".pricewatch";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_THRESHOLD_PERCENT: f64 = 5.0;
pub const DEFAULT_INTERVAL_HOURS: u64 = 6;
pub const DEFAULT_MAX_CONCURRENT_CATEGORIES: usize = 2;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 100;
pub const DEFAULT_IO_TIMEOUT_MS: u64 = 10_000;

/// What a run does when the stored baseline cannot be read or decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CorruptSnapshotPolicy {
    /// Continue against an empty baseline and surface a warning.
    #[default]
    Reset,
    /// Fail the category run and leave the stored file alone.
    Abort,
}

impl CorruptSnapshotPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reset => "reset",
            Self::Abort => "abort",
        }
    }
}

impl std::str::FromStr for CorruptSnapshotPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "reset" => Ok(Self::Reset),
            "abort" => Ok(Self::Abort),
            other => Err(format!(
                "invalid corrupt snapshot policy '{other}', expected one of: reset, abort"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricewatchConfig {
    #[serde(default = "default_threshold_percent")]
    pub threshold_percent: f64,
    #[serde(default = "default_currency")]
    pub default_currency: String,
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,
    #[serde(default = "default_max_concurrent_categories")]
    pub max_concurrent_categories: usize,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub fields: SelectorFieldMap,
    #[serde(default)]
    pub identity: IdentityPolicy,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<CategoryConfig>,
}

impl Default for PricewatchConfig {
    fn default() -> Self {
        Self {
            threshold_percent: default_threshold_percent(),
            default_currency: default_currency(),
            interval_hours: default_interval_hours(),
            max_concurrent_categories: default_max_concurrent_categories(),
            store: StoreConfig::default(),
            fields: SelectorFieldMap::default(),
            identity: IdentityPolicy::default(),
            categories: Vec::new(),
        }
    }
}

impl PricewatchConfig {
    pub fn category(&self, name: &str) -> Option<&CategoryConfig> {
        let name = name.trim();
        self.categories
            .iter()
            .find(|category| category.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Retries after the first attempt for transient I/O errors.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
    #[serde(default)]
    pub on_corrupt_snapshot: CorruptSnapshotPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            io_timeout_ms: default_io_timeout_ms(),
            on_corrupt_snapshot: CorruptSnapshotPolicy::Reset,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub name: String,
    /// Category listing page; also the base for root-relative links.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Extracted listings JSON, relative to the workspace root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_percent: Option<f64>,
}

impl CategoryConfig {
    pub fn effective_threshold(&self, config: &PricewatchConfig) -> f64 {
        self.threshold_percent.unwrap_or(config.threshold_percent)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub code: &'static str,
    pub message: String,
}

impl ConfigWarning {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("failed to serialize config TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

pub fn pricewatch_dir(workspace_root: impl AsRef<Path>) -> PathBuf {
    workspace_root.as_ref().join(PRICEWATCH_DIR_NAME)
}

pub fn config_path(workspace_root: impl AsRef<Path>) -> PathBuf {
    pricewatch_dir(workspace_root).join(CONFIG_FILE_NAME)
}

pub fn load_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<PricewatchConfig, ConfigError> {
    let (config, _) = load_workspace_config_with_warnings(workspace_root)?;
    Ok(config)
}

/// Like [`load_workspace_config`], but also reports what normalization had
/// to repair or what looks suspicious in the file as written.
pub fn load_workspace_config_with_warnings(
    workspace_root: impl AsRef<Path>,
) -> Result<(PricewatchConfig, Vec<ConfigWarning>), ConfigError> {
    let path = config_path(workspace_root);
    if !path.exists() {
        let config = PricewatchConfig::default();
        let warnings = validate_config(&config);
        return Ok((config, warnings));
    }

    let raw = fs::read_to_string(path)?;
    let parsed: PricewatchConfig = toml::from_str(&raw)?;
    let warnings = validate_config(&parsed);
    Ok((normalize_config(parsed), warnings))
}

pub fn ensure_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<PricewatchConfig, ConfigError> {
    let workspace_root = workspace_root.as_ref();
    fs::create_dir_all(pricewatch_dir(workspace_root))?;

    let path = config_path(workspace_root);
    if path.exists() {
        return load_workspace_config(workspace_root);
    }

    let config = starter_config();
    let content = toml::to_string_pretty(&config)?;
    fs::write(path, content)?;

    Ok(config)
}

/// Inspects a config as written. Every warning either names a value that
/// [`normalize_config`] replaces or something that will make runs useless.
pub fn validate_config(config: &PricewatchConfig) -> Vec<ConfigWarning> {
    let mut warnings = Vec::new();

    if !is_valid_threshold(config.threshold_percent) {
        warnings.push(ConfigWarning::new(
            "invalid_threshold",
            format!(
                "threshold_percent {} is not a non-negative number, using {}",
                config.threshold_percent, DEFAULT_THRESHOLD_PERCENT
            ),
        ));
    }

    if normalize_currency_code(&config.default_currency).is_none() {
        warnings.push(ConfigWarning::new(
            "unknown_currency",
            format!(
                "default_currency '{}' is not a currency code, using {}",
                config.default_currency, DEFAULT_CURRENCY
            ),
        ));
    }

    if config.interval_hours == 0 {
        warnings.push(ConfigWarning::new(
            "invalid_interval",
            format!("interval_hours must be positive, using {DEFAULT_INTERVAL_HOURS}"),
        ));
    }

    if config.max_concurrent_categories == 0 {
        warnings.push(ConfigWarning::new(
            "invalid_concurrency",
            "max_concurrent_categories must be positive, using 1",
        ));
    }

    if config.store.retry_attempts == 0 {
        warnings.push(ConfigWarning::new(
            "no_store_retries",
            "store.retry_attempts is 0, transient I/O errors fail immediately",
        ));
    }

    if config.store.io_timeout_ms == 0 {
        warnings.push(ConfigWarning::new(
            "invalid_io_timeout",
            format!("store.io_timeout_ms must be positive, using {DEFAULT_IO_TIMEOUT_MS}"),
        ));
    }

    let identity = &config.identity;
    if identity.min_len == 0
        || identity.min_len > identity.max_len
        || identity.min_digits == 0
        || identity.min_digits > identity.max_digits
    {
        warnings.push(ConfigWarning::new(
            "invalid_identity_policy",
            "identity bounds are empty or inverted, using defaults",
        ));
    }

    if config.categories.is_empty() {
        warnings.push(ConfigWarning::new(
            "no_categories",
            "no [[categories]] configured, nothing will be tracked",
        ));
    }

    let mut seen = BTreeSet::new();
    for category in &config.categories {
        let name = category.name.trim();
        if name.is_empty() {
            warnings.push(ConfigWarning::new(
                "blank_category_name",
                "a category without a name was ignored",
            ));
            continue;
        }
        if !seen.insert(name) {
            warnings.push(ConfigWarning::new(
                "duplicate_category",
                format!("category '{name}' is configured more than once, keeping the first"),
            ));
        }
        if let Some(threshold) = category.threshold_percent
            && !is_valid_threshold(threshold)
        {
            warnings.push(ConfigWarning::new(
                "invalid_threshold",
                format!(
                    "category '{name}' threshold_percent {threshold} is invalid, using the global threshold"
                ),
            ));
        }
    }

    warnings
}

fn starter_config() -> PricewatchConfig {
    PricewatchConfig {
        categories: vec![CategoryConfig {
            name: "Architecture".to_owned(),
            url: Some("https://lego.tr/themes/architecture".to_owned()),
            input: Some("raw/architecture.json".to_owned()),
            threshold_percent: None,
        }],
        ..PricewatchConfig::default()
    }
}

fn is_valid_threshold(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}

fn default_threshold_percent() -> f64 {
    DEFAULT_THRESHOLD_PERCENT
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_owned()
}

fn default_interval_hours() -> u64 {
    DEFAULT_INTERVAL_HOURS
}

fn default_max_concurrent_categories() -> usize {
    DEFAULT_MAX_CONCURRENT_CATEGORIES
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

fn default_retry_backoff_ms() -> u64 {
    DEFAULT_RETRY_BACKOFF_MS
}

fn default_io_timeout_ms() -> u64 {
    DEFAULT_IO_TIMEOUT_MS
}

fn normalize_optional(input: Option<String>) -> Option<String> {
    input
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn normalize_keys(keys: &mut Vec<String>) {
    let mut seen = BTreeSet::new();
    keys.retain_mut(|key| {
        *key = key.trim().to_owned();
        !key.is_empty() && seen.insert(key.clone())
    });
}

pub fn normalize_config(mut config: PricewatchConfig) -> PricewatchConfig {
    if !is_valid_threshold(config.threshold_percent) {
        config.threshold_percent = DEFAULT_THRESHOLD_PERCENT;
    }

    config.default_currency =
        normalize_currency_code(&config.default_currency).unwrap_or_else(default_currency);

    if config.interval_hours == 0 {
        config.interval_hours = DEFAULT_INTERVAL_HOURS;
    }
    if config.max_concurrent_categories == 0 {
        config.max_concurrent_categories = 1;
    }
    if config.store.io_timeout_ms == 0 {
        config.store.io_timeout_ms = DEFAULT_IO_TIMEOUT_MS;
    }

    let identity = &config.identity;
    if identity.min_len == 0
        || identity.min_len > identity.max_len
        || identity.min_digits == 0
        || identity.min_digits > identity.max_digits
    {
        config.identity = IdentityPolicy::default();
    }

    for role in [
        &mut config.fields.name,
        &mut config.fields.id,
        &mut config.fields.price,
        &mut config.fields.currency,
        &mut config.fields.image,
        &mut config.fields.description,
        &mut config.fields.url,
        &mut config.fields.alt_text,
        &mut config.fields.availability,
    ] {
        normalize_keys(role);
    }

    let mut seen = BTreeSet::new();
    let categories = std::mem::take(&mut config.categories);
    config.categories = categories
        .into_iter()
        .filter_map(|mut category| {
            category.name = category.name.trim().to_owned();
            if category.name.is_empty() || !seen.insert(category.name.clone()) {
                return None;
            }
            category.url = normalize_optional(category.url.take());
            category.input = normalize_optional(category.input.take());
            category.threshold_percent = category.threshold_percent.filter(|value| {
                is_valid_threshold(*value)
            });
            Some(category)
        })
        .collect();

    config
}
