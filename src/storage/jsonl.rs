use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};
use crate::error::{Error, Result};
use crate::interfaces::Storage;
use crate::types::{CurrencyPair, Record, RequestKind};

#[derive(Serialize)]
struct LineOut<'a> {
    identity: String,
    #[serde(flatten)]
    record: &'a Record,
}

#[derive(Deserialize)]
struct LineIn {
    identity: String,
    kind: RequestKind,
    exchange: String,
    pair: Option<CurrencyPair>,
    #[serde(default)]
    fields: BTreeMap<String, JsonValue>,
}

/// Append-only JSON-lines file, one record per line.
///
/// Identities already written are skipped, so the file holds each record
/// once even when a batch is delivered twice or the process restarts.
pub struct JsonLinesStorage {
    path: PathBuf,
    writer: Mutex<()>,
    written: DashSet<String>,
    pairs: DashMap<String, BTreeSet<CurrencyPair>>,
    first_times: DashMap<(String, CurrencyPair), DateTime<Utc>>,
}

impl JsonLinesStorage {
    /// Opens (or creates) `path` and indexes the lines already in it.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let storage = JsonLinesStorage {
            path: path.clone(),
            writer: Mutex::new(()),
            written: DashSet::new(),
            pairs: DashMap::new(),
            first_times: DashMap::new(),
        };

        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let mut skipped = 0;
                for line in content.lines().filter(|l| !l.trim().is_empty()) {
                    match serde_json::from_str::<LineIn>(line) {
                        Ok(stored) => storage.index(stored),
                        Err(_) => skipped += 1,
                    }
                }
                if skipped > 0 {
                    warn!("Skipped {} unreadable lines in {}", skipped, path.display());
                }
                info!("Indexed {} stored records from {}", storage.written.len(), path.display());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(storage)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn index(&self, stored: LineIn) {
        let LineIn { identity, kind, exchange, pair, fields } = stored;
        self.written.insert(identity);

        let Some(pair) = pair else {
            return;
        };
        match kind {
            RequestKind::CurrencyPairs => {
                self.pairs.entry(exchange).or_default().insert(pair);
            }
            RequestKind::HistoricRates => {
                if let Some(time) = fields.get("time").and_then(parse_time) {
                    let mut first = self.first_times.entry((exchange, pair)).or_insert(time);
                    if time < *first {
                        *first = time;
                    }
                }
            }
            _ => {}
        }
    }
}

fn parse_time(value: &JsonValue) -> Option<DateTime<Utc>> {
    match value {
        JsonValue::String(s) => DateTime::parse_from_rfc3339(s).ok().map(|t| t.with_timezone(&Utc)),
        JsonValue::Number(n) => DateTime::from_timestamp(n.as_i64()?, 0),
        _ => None,
    }
}

#[async_trait]
impl Storage for JsonLinesStorage {
    async fn persist(&self, records: Vec<Record>) -> Result<()> {
        let _guard = self.writer.lock().await;

        let mut buffer = String::new();
        let mut fresh = Vec::new();
        for record in &records {
            let identity = record.identity();
            if self.written.contains(&identity) || fresh.contains(&identity) {
                continue;
            }
            let line = serde_json::to_string(&LineOut {
                identity: identity.clone(),
                record,
            })?;
            buffer.push_str(&line);
            buffer.push('\n');
            fresh.push(identity);
        }
        if fresh.is_empty() {
            return Ok(());
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| Error::PersistenceError(format!("{}: {}", self.path.display(), e)))?;
        file.write_all(buffer.as_bytes())
            .await
            .map_err(|e| Error::PersistenceError(format!("{}: {}", self.path.display(), e)))?;
        file.flush().await?;

        for line in buffer.lines() {
            if let Ok(stored) = serde_json::from_str::<LineIn>(line) {
                self.index(stored);
            }
        }
        Ok(())
    }

    async fn known_pairs(&self, exchange: &str) -> Result<BTreeSet<CurrencyPair>> {
        Ok(self
            .pairs
            .get(&exchange.to_lowercase())
            .map(|p| p.value().clone())
            .unwrap_or_default())
    }

    async fn first_timestamp(&self, exchange: &str, pair: &CurrencyPair) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .first_times
            .get(&(exchange.to_lowercase(), pair.clone()))
            .map(|t| *t.value()))
    }
}
