use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use crate::config::{JobConfig, PairSpec, SchedulerConfig};
use crate::exchange::PairTarget;
use crate::types::{CurrencyPair, Interval, Record, RequestKind};

/// Resume point per pair: the oldest historic-rate timestamp collected so far.
pub type PairCursors = BTreeMap<CurrencyPair, Option<DateTime<Utc>>>;

/// Which of an exchange's known pairs a job wants.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PairFilter {
    /// `None` selects every pair not rejected by the currency lists.
    pub pairs: Option<Vec<PairSpec>>,
    pub first_currencies: Vec<String>,
    pub second_currencies: Vec<String>,
}

impl PairFilter {
    /// Explicit pairs and currency lists are unioned; within the currency
    /// lists both non-empty sides must match.
    pub fn matches(&self, pair: &CurrencyPair) -> bool {
        let by_currency = !self.first_currencies.is_empty() || !self.second_currencies.is_empty();

        let explicit = self
            .pairs
            .as_ref()
            .is_some_and(|pairs| pairs.iter().any(|p| pair.matches_symbols(&p.first, &p.second)));
        if explicit {
            return true;
        }

        if by_currency {
            let first_ok = self.first_currencies.is_empty()
                || self.first_currencies.iter().any(|c| c.eq_ignore_ascii_case(&pair.first));
            let second_ok = self.second_currencies.is_empty()
                || self.second_currencies.iter().any(|c| c.eq_ignore_ascii_case(&pair.second));
            return first_ok && second_ok;
        }

        self.pairs.is_none()
    }
}

/// A named recurring task binding a request kind to exchanges and pairs.
#[derive(Clone, Debug)]
pub struct Job {
    pub name: String,
    pub kind: RequestKind,
    /// `None` runs once.
    pub frequency: Option<Duration>,
    /// Budget of one exchange's request batch within a tick.
    pub timeout: Duration,
    /// Starting granularity for exchanges this job is the first to register.
    pub interval: Interval,
    pub filter: PairFilter,
    pub update_currency_pairs: bool,
    pub exchanges_with_pairs: BTreeMap<String, PairCursors>,
}

impl Job {
    /// Resolves the exchange selection against the loaded exchanges. Pairs are
    /// filled in by validation.
    pub fn from_config(config: &JobConfig, available: &[&str], defaults: &SchedulerConfig) -> Self {
        let excluded: BTreeSet<String> = config
            .excluded_exchanges
            .iter()
            .map(|e| e.to_lowercase())
            .collect();

        let selected: Vec<String> = match config.exchanges.listed() {
            Some(names) => names.iter().map(|n| n.to_lowercase()).collect(),
            None => available.iter().map(|n| n.to_lowercase()).collect(),
        };

        let exchanges_with_pairs = selected
            .into_iter()
            .filter(|name| !excluded.contains(name))
            .map(|name| (name, PairCursors::new()))
            .collect();

        Job {
            name: config.name.clone(),
            kind: config.request_kind,
            frequency: config.frequency_minutes.map(|m| Duration::from_secs(m * 60)),
            timeout: Duration::from_secs(config.timeout_secs.unwrap_or(defaults.request_timeout_secs)),
            interval: config.interval.unwrap_or_default(),
            filter: PairFilter {
                pairs: config.currency_pairs.listed().map(|p| p.to_vec()),
                first_currencies: config.first_currencies.clone(),
                second_currencies: config.second_currencies.clone(),
            },
            update_currency_pairs: config.update_currency_pairs,
            exchanges_with_pairs,
        }
    }

    pub fn is_one_shot(&self) -> bool {
        self.frequency.is_none()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges_with_pairs.is_empty()
    }

    pub fn exchanges(&self) -> impl Iterator<Item = &String> {
        self.exchanges_with_pairs.keys()
    }

    pub fn targets(&self, exchange: &str) -> Vec<PairTarget> {
        self.exchanges_with_pairs
            .get(exchange)
            .map(|pairs| {
                pairs
                    .iter()
                    .map(|(pair, cursor)| PairTarget {
                        pair: pair.clone(),
                        cursor: *cursor,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn requested(&self, exchange: &str) -> BTreeSet<CurrencyPair> {
        self.exchanges_with_pairs
            .get(exchange)
            .map(|pairs| pairs.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Moves each pair's cursor back to the oldest row time in `records`.
    /// Returns, per exchange, the pairs whose cursor moved.
    pub fn advance_cursors(&mut self, records: &[Record]) -> BTreeMap<String, BTreeSet<CurrencyPair>> {
        let mut moved: BTreeMap<String, BTreeSet<CurrencyPair>> = BTreeMap::new();

        for record in records {
            let (Some(pair), Some(time)) = (&record.pair, record.time()) else {
                continue;
            };
            let cursor = self
                .exchanges_with_pairs
                .get_mut(&record.exchange)
                .and_then(|pairs| pairs.get_mut(pair));
            if let Some(cursor) = cursor {
                if cursor.is_none_or(|current| time < current) {
                    *cursor = Some(time);
                    moved.entry(record.exchange.clone()).or_default().insert(pair.clone());
                }
            }
        }
        moved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Selection;
    use crate::types::Value;

    fn config() -> JobConfig {
        JobConfig {
            name: "rates".to_string(),
            request_kind: RequestKind::HistoricRates,
            frequency_minutes: None,
            timeout_secs: None,
            exchanges: Selection::default(),
            excluded_exchanges: vec!["Kraken".to_string()],
            currency_pairs: Selection::default(),
            first_currencies: Vec::new(),
            second_currencies: Vec::new(),
            update_currency_pairs: false,
            interval: Some(Interval::Minutes),
        }
    }

    fn pair(first: &str, second: &str) -> CurrencyPair {
        CurrencyPair::new("bitstamp", first, second).unwrap()
    }

    #[test]
    fn selects_all_loaded_exchanges_minus_exclusions() {
        let job = Job::from_config(&config(), &["bitstamp", "kraken", "binance"], &SchedulerConfig::default());

        let names: Vec<_> = job.exchanges().cloned().collect();
        assert_eq!(names, vec!["binance", "bitstamp"]);
        assert!(job.is_one_shot());
        assert_eq!(job.timeout, Duration::from_secs(30));
        assert_eq!(job.interval, Interval::Minutes);
    }

    #[test]
    fn filter_unions_explicit_pairs_and_currency_lists() {
        let filter = PairFilter {
            pairs: Some(vec![PairSpec {
                first: "eth".to_string(),
                second: "eur".to_string(),
            }]),
            first_currencies: vec!["btc".to_string()],
            second_currencies: Vec::new(),
        };

        assert!(filter.matches(&pair("ETH", "EUR")));
        assert!(filter.matches(&pair("BTC", "USD")));
        assert!(!filter.matches(&pair("ETH", "USD")));
        assert!(PairFilter::default().matches(&pair("ETH", "USD")));
    }

    #[test]
    fn explicit_empty_pair_list_selects_nothing() {
        let filter = PairFilter {
            pairs: Some(Vec::new()),
            ..PairFilter::default()
        };
        assert!(!filter.matches(&pair("BTC", "USD")));
    }

    #[test]
    fn cursors_only_move_backwards() {
        let mut job = Job::from_config(&config(), &["bitstamp"], &SchedulerConfig::default());
        let btc = pair("BTC", "USD");
        job.exchanges_with_pairs
            .get_mut("bitstamp")
            .unwrap()
            .insert(btc.clone(), None);

        let record = |secs: i64| Record {
            kind: RequestKind::HistoricRates,
            exchange: "bitstamp".to_string(),
            pair: Some(btc.clone()),
            start_time: Utc::now(),
            response_time: Utc::now(),
            fields: [("time".to_string(), Value::Int(secs))].into_iter().collect(),
        };

        let moved = job.advance_cursors(&[record(2_000), record(1_000)]);
        assert!(moved["bitstamp"].contains(&btc));
        assert!(job.advance_cursors(&[record(5_000)]).is_empty());

        let targets = job.targets("bitstamp");
        assert_eq!(targets[0].cursor, DateTime::from_timestamp(1_000, 0));
    }

    #[test]
    fn repeating_the_oldest_row_reports_no_movement() {
        let mut job = Job::from_config(&config(), &["bitstamp"], &SchedulerConfig::default());
        let btc = pair("BTC", "USD");
        job.exchanges_with_pairs
            .get_mut("bitstamp")
            .unwrap()
            .insert(btc.clone(), DateTime::from_timestamp(1_000, 0));

        let record = Record {
            kind: RequestKind::HistoricRates,
            exchange: "bitstamp".to_string(),
            pair: Some(btc),
            start_time: Utc::now(),
            response_time: Utc::now(),
            fields: [("time".to_string(), Value::Int(1_000))].into_iter().collect(),
        };

        assert!(job.advance_cursors(&[record]).is_empty());
    }
}
