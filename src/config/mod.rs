use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use crate::types::{Interval, RequestKind};

pub mod loader;

pub use loader::{load_exchange_definitions, AppConfig};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SchedulerConfig {
    /// Per-exchange request budget within one tick.
    pub request_timeout_secs: u64,
    /// Consecutive failed ticks before an exchange is polled as secondary.
    pub unhealthy_after: u32,
    /// Used when an exchange declares no `historic_rates.min_rows`.
    pub min_rows: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            request_timeout_secs: 30,
            unhealthy_after: 3,
            min_rows: 0,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct StorageConfig {
    /// JSON-lines output file; records stay in memory when absent.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// `"all"` or an explicit list.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Selection<T> {
    Listed(Vec<T>),
    Keyword(String),
}

impl<T> Selection<T> {
    pub fn listed(&self) -> Option<&[T]> {
        match self {
            Selection::Listed(items) => Some(items),
            Selection::Keyword(_) => None,
        }
    }
}

impl<T> Default for Selection<T> {
    fn default() -> Self {
        Selection::Keyword("all".to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct PairSpec {
    pub first: String,
    pub second: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct JobConfig {
    pub name: String,
    pub request_kind: RequestKind,
    /// Absent: run once.
    #[serde(default)]
    pub frequency_minutes: Option<u64>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub exchanges: Selection<String>,
    #[serde(default)]
    pub excluded_exchanges: Vec<String>,
    #[serde(default)]
    pub currency_pairs: Selection<PairSpec>,
    #[serde(default)]
    pub first_currencies: Vec<String>,
    #[serde(default)]
    pub second_currencies: Vec<String>,
    /// Re-request the exchanges' pair lists before the first tick.
    #[serde(default)]
    pub update_currency_pairs: bool,
    /// Starting granularity for historic rates.
    #[serde(default)]
    pub interval: Option<Interval>,
}
