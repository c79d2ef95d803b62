use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use crate::error::Result;
use crate::types::{CurrencyPair, Record};

/// Sink for normalized records plus the lookups the scheduler resumes from.
///
/// Delivery is at-least-once: implementations must treat a record whose
/// identity is already stored as an upsert, not a second row.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn persist(&self, records: Vec<Record>) -> Result<()>;

    /// Pairs the exchange is known to offer.
    async fn known_pairs(&self, exchange: &str) -> Result<BTreeSet<CurrencyPair>>;

    /// Oldest historic-rate timestamp collected for the pair.
    async fn first_timestamp(&self, exchange: &str, pair: &CurrencyPair) -> Result<Option<DateTime<Utc>>>;
}
