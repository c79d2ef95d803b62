use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use crate::types::{CurrencyPair, RequestKind, Value};

/// One normalized row, ready for the storage collaborator.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Record {
    pub kind: RequestKind,
    pub exchange: String,
    pub pair: Option<CurrencyPair>,
    pub start_time: DateTime<Utc>,
    pub response_time: DateTime<Utc>,
    pub fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key).filter(|v| !v.is_null())
    }

    /// The row's own timestamp (`time` field), when it carries one.
    pub fn time(&self) -> Option<DateTime<Utc>> {
        match self.field("time")? {
            Value::DateTime(dt) => Some(*dt),
            Value::Int(secs) => DateTime::from_timestamp(*secs, 0),
            _ => None,
        }
    }

    /// Identity used for idempotent upserts.
    pub fn identity(&self) -> String {
        let pair = self
            .pair
            .as_ref()
            .map(|p| format!("{}-{}", p.first, p.second))
            .unwrap_or_default();
        let time = match self.kind {
            RequestKind::CurrencyPairs => String::new(),
            _ => self
                .field("time")
                .map(|v| v.to_string())
                .unwrap_or_else(|| self.response_time.timestamp().to_string()),
        };
        let id = self.field("id").map(|v| v.to_string()).unwrap_or_default();
        let position = self
            .field("position")
            .map(|v| v.to_string())
            .unwrap_or_default();

        format!(
            "{}|{}|{}|{}|{}|{}",
            self.kind, self.exchange, pair, time, id, position
        )
    }
}
