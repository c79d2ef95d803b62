use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeSet;
use crate::error::Result;
use crate::interfaces::Storage;
use crate::types::{CurrencyPair, Record, RequestKind, Value};

/// In-memory store keyed by record identity. Persisting a record twice
/// replaces the first copy.
#[derive(Default)]
pub struct MemoryStorage {
    records: DashMap<String, Record>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers pairs as if a currency-pair request had returned them.
    pub fn with_pairs(self, exchange: &str, pairs: &[(&str, &str)]) -> Self {
        let now = Utc::now();
        for (first, second) in pairs {
            if let Ok(pair) = CurrencyPair::new(exchange, first, second) {
                let record = Record {
                    kind: RequestKind::CurrencyPairs,
                    exchange: pair.exchange.clone(),
                    fields: [
                        ("currency_pair_first".to_string(), Value::from(pair.first.as_str())),
                        ("currency_pair_second".to_string(), Value::from(pair.second.as_str())),
                    ]
                    .into_iter()
                    .collect(),
                    pair: Some(pair),
                    start_time: now,
                    response_time: now,
                };
                self.records.insert(record.identity(), record);
            }
        }
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Snapshot ordered by identity.
    pub fn records(&self) -> Vec<Record> {
        let mut records: Vec<(String, Record)> = self
            .records
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        records.sort_by(|a, b| a.0.cmp(&b.0));
        records.into_iter().map(|(_, r)| r).collect()
    }

    pub fn records_for(&self, exchange: &str, kind: RequestKind) -> Vec<Record> {
        self.records()
            .into_iter()
            .filter(|r| r.exchange == exchange && r.kind == kind)
            .collect()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn persist(&self, records: Vec<Record>) -> Result<()> {
        for record in records {
            self.records.insert(record.identity(), record);
        }
        Ok(())
    }

    async fn known_pairs(&self, exchange: &str) -> Result<BTreeSet<CurrencyPair>> {
        let exchange = exchange.to_lowercase();
        Ok(self
            .records
            .iter()
            .filter(|entry| {
                entry.kind == RequestKind::CurrencyPairs && entry.exchange == exchange
            })
            .filter_map(|entry| entry.pair.clone())
            .collect())
    }

    async fn first_timestamp(&self, exchange: &str, pair: &CurrencyPair) -> Result<Option<DateTime<Utc>>> {
        let exchange = exchange.to_lowercase();
        Ok(self
            .records
            .iter()
            .filter(|entry| {
                entry.kind == RequestKind::HistoricRates
                    && entry.exchange == exchange
                    && entry.pair.as_ref() == Some(pair)
            })
            .filter_map(|entry| entry.time())
            .min())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn candle(secs: i64, close: f64) -> Record {
        let time = Utc.timestamp_opt(secs, 0).unwrap();
        let mut fields = BTreeMap::new();
        fields.insert("time".to_string(), Value::DateTime(time));
        fields.insert("close".to_string(), Value::Float(close));
        Record {
            kind: RequestKind::HistoricRates,
            exchange: "bitstamp".to_string(),
            pair: Some(CurrencyPair::new("bitstamp", "BTC", "USD").unwrap()),
            start_time: time,
            response_time: time,
            fields,
        }
    }

    #[tokio::test]
    async fn persisting_twice_is_idempotent() {
        let storage = MemoryStorage::new();
        let batch = vec![candle(60, 1.0), candle(120, 2.0)];

        storage.persist(batch.clone()).await.unwrap();
        let once = storage.records();
        storage.persist(batch).await.unwrap();

        assert_eq!(storage.len(), 2);
        assert_eq!(storage.records(), once);
    }

    #[tokio::test]
    async fn first_timestamp_is_oldest_candle() {
        let storage = MemoryStorage::new();
        storage
            .persist(vec![candle(180, 1.0), candle(60, 1.0), candle(120, 1.0)])
            .await
            .unwrap();

        let pair = CurrencyPair::new("bitstamp", "BTC", "USD").unwrap();
        let first = storage.first_timestamp("bitstamp", &pair).await.unwrap();
        assert_eq!(first, Some(Utc.timestamp_opt(60, 0).unwrap()));

        let other = CurrencyPair::new("bitstamp", "ETH", "USD").unwrap();
        assert_eq!(storage.first_timestamp("bitstamp", &other).await.unwrap(), None);
    }

    #[tokio::test]
    async fn known_pairs_come_from_currency_pair_records() {
        let storage = MemoryStorage::new().with_pairs("Bitstamp", &[("btc", "usd"), ("eth", "btc")]);
        let pairs = storage.known_pairs("bitstamp").await.unwrap();
        assert_eq!(pairs.len(), 2);
        assert!(pairs.iter().any(|p| p.matches_symbols("ETH", "BTC")));
        assert!(storage.known_pairs("kraken").await.unwrap().is_empty());
    }
}
