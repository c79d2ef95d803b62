use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::Path;
use crate::error::{Error, Result};
use crate::mapping::MappingDefinition;

/// Static description of one exchange API, one JSON file per exchange.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ExchangeDefinition {
    pub name: String,
    pub api_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub rate_limit: Option<RateLimit>,
    /// Dedicated connectivity probe endpoint, relative to `api_url`.
    #[serde(default)]
    pub ping: Option<String>,
    #[serde(default)]
    pub historic_rates: RowLimits,
    /// Keyed by request kind name (`tickers`, `trades`, `order_books`, ...).
    #[serde(default)]
    pub requests: BTreeMap<String, RequestDefinition>,
}

fn default_timeout_secs() -> u64 {
    10
}

/// `max` requests per `unit` seconds.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RateLimit {
    pub max: u32,
    pub unit: f64,
}

/// Rows a historic-rate request is expected to return.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct RowLimits {
    /// Fewer rows than this coarsens the exchange's interval. Zero disables it.
    #[serde(default)]
    pub min_rows: usize,
    /// The exchange's page size. A full page never coarsens.
    #[serde(default)]
    pub max_rows: Option<usize>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RequestDefinition {
    pub request: RequestTemplate,
    #[serde(default)]
    pub response: ResponseDefinition,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct RequestTemplate {
    /// Path below `api_url`; may hold `{currency_pair}` and `{param}` placeholders.
    #[serde(default)]
    pub template: String,
    /// Absent when one call returns every pair.
    #[serde(default)]
    pub pair_template: Option<PairTemplate>,
    #[serde(default)]
    pub params: BTreeMap<String, ParamSpec>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PairTemplate {
    /// e.g. `{first}_{second}`
    pub template: String,
    #[serde(default)]
    pub lower_case: bool,
    /// Query parameter carrying the pair instead of the URL path.
    #[serde(default)]
    pub alias: Option<String>,
}

/// How one query parameter gets its value. Applied in the order
/// `allowed`, `function`, `default`, `type`.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ParamSpec {
    /// Interval name to the exchange's own spelling of it.
    #[serde(default)]
    pub allowed: Option<BTreeMap<String, JsonValue>>,
    /// Only `last_timestamp` is known.
    #[serde(default)]
    pub function: Option<String>,
    #[serde(default)]
    pub default: Option<JsonValue>,
    /// Conversion chain applied to the resolved value.
    #[serde(default, rename = "type")]
    pub conversions: Option<Vec<JsonValue>>,
    #[serde(default = "required_by_default")]
    pub required: bool,
}

fn required_by_default() -> bool {
    true
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ResponseDefinition {
    #[serde(default)]
    pub mapping: Vec<MappingDefinition>,
}

impl ExchangeDefinition {
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw).map_err(|e| {
            Error::ConfigError(format!("Invalid exchange definition {}: {}", path.display(), e))
        })
    }
}
