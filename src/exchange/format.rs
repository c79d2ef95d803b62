use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};
use crate::error::{Error, Result};
use crate::exchange::adapter::{ExchangeAdapter, KindSpec, RawBundle};
use crate::mapping::{Cell, ExtractionContext, PairContext};
use crate::observability::metrics::RECORDS_DROPPED;
use crate::types::{CurrencyPair, Record, RequestKind, Value};

pub const PAIR_FIRST_KEY: &str = "currency_pair_first";
pub const PAIR_SECOND_KEY: &str = "currency_pair_second";

impl ExchangeAdapter {
    /// Turns a raw bundle into records, one per logical row.
    ///
    /// A response that cannot be attributed to a pair is skipped, a row with a
    /// failed conversion is dropped; neither affects the rest of the batch.
    /// Rows for pairs outside `requested` are discarded unless it is empty.
    pub fn format(&self, bundle: &RawBundle, requested: &BTreeSet<CurrencyPair>) -> Result<Vec<Record>> {
        let spec = self.kind(bundle.kind)?;
        if spec.mappings.is_empty() {
            return Err(Error::MappingNotFound {
                exchange: self.name.clone(),
                kind: bundle.kind,
            });
        }

        let mut records = Vec::new();
        for response in &bundle.responses {
            let Some(body) = &response.body else {
                continue;
            };
            match self.format_response(spec, bundle, response.pair.as_ref(), body, requested) {
                Ok(mut rows) => records.append(&mut rows),
                Err(e) => warn!("Skipping {} response from {}: {}", bundle.kind, self.name, e),
            }
        }
        Ok(records)
    }

    fn format_response(
        &self,
        spec: &KindSpec,
        bundle: &RawBundle,
        pair: Option<&CurrencyPair>,
        body: &JsonValue,
        requested: &BTreeSet<CurrencyPair>,
    ) -> Result<Vec<Record>> {
        let derives_pair = spec.mappings.iter().any(|m| m.key == PAIR_FIRST_KEY)
            && spec.mappings.iter().any(|m| m.key == PAIR_SECOND_KEY);
        if pair.is_none() && !derives_pair {
            return Err(Error::NoCurrencyPairProvided {
                exchange: self.name.clone(),
                kind: bundle.kind,
            });
        }

        let ctx = ExtractionContext {
            pair: pair.map(|p| {
                let key = spec.request.format_pair(p).unwrap_or_default();
                PairContext::new(&p.first, &p.second, &key)
            }),
            interval: bundle.interval,
        };

        let extracted: Vec<_> = spec
            .mappings
            .iter()
            .map(|m| (m.key.clone(), m.extract(body, &ctx)))
            .collect();
        let rows = extracted
            .iter()
            .filter(|(_, e)| e.is_many())
            .map(|(_, e)| e.cell_count())
            .max()
            .unwrap_or(1);

        let mut columns: BTreeMap<String, Vec<Cell>> = BTreeMap::new();
        for (key, result) in extracted {
            let column = if result.is_many() {
                let mut cells = result.into_cells();
                cells.resize(rows, Ok(Value::Null));
                cells
            } else {
                let cell = result.into_cells().into_iter().next().unwrap_or(Ok(Value::Null));
                vec![cell; rows]
            };
            columns.insert(key, column);
        }

        if bundle.kind == RequestKind::OrderBooks {
            sort_order_book(&mut columns, rows);
        }

        let mut records = Vec::with_capacity(rows);
        for i in 0..rows {
            let mut fields = BTreeMap::new();
            let mut failed = None;
            for (key, column) in &columns {
                match &column[i] {
                    Ok(value) => {
                        fields.insert(key.clone(), value.clone());
                    }
                    Err(e) => {
                        failed = Some((key.clone(), e.clone()));
                        break;
                    }
                }
            }

            if let Some((key, e)) = failed {
                RECORDS_DROPPED.with_label_values(&[self.name.as_str(), bundle.kind.as_str()]).inc();
                warn!(
                    "Dropping {} row from {}: {}",
                    bundle.kind,
                    self.name,
                    Error::Conversion { key, source: e }
                );
                continue;
            }
            if fields.iter().all(|(k, v)| v.is_null() || k == "position") {
                continue;
            }

            let row_pair = match pair {
                Some(p) => p.clone(),
                None => match self.derive_pair(&fields) {
                    Some(p) => p,
                    None => {
                        debug!("Row from {} carries no usable currency pair", self.name);
                        continue;
                    }
                },
            };
            if pair.is_none() && !requested.is_empty() && !requested.contains(&row_pair) {
                continue;
            }

            records.push(Record {
                kind: bundle.kind,
                exchange: self.name.clone(),
                pair: Some(row_pair),
                start_time: bundle.request_time,
                response_time: bundle.response_time,
                fields,
            });
        }
        Ok(records)
    }

    fn derive_pair(&self, fields: &BTreeMap<String, Value>) -> Option<CurrencyPair> {
        let first = fields.get(PAIR_FIRST_KEY)?.as_text()?;
        let second = fields.get(PAIR_SECOND_KEY)?.as_text()?;
        CurrencyPair::new(&self.name, first, second).ok()
    }
}

/// Bids descending, asks ascending by price, then numbered by depth.
fn sort_order_book(columns: &mut BTreeMap<String, Vec<Cell>>, rows: usize) {
    sort_side(columns, "bids_price", "bids_amount", true);
    sort_side(columns, "asks_price", "asks_amount", false);
    columns.insert(
        "position".to_string(),
        (0..rows).map(|i| Ok(Value::Int(i as i64))).collect(),
    );
}

fn sort_side(columns: &mut BTreeMap<String, Vec<Cell>>, price_key: &str, amount_key: &str, descending: bool) {
    let Some(prices) = columns.remove(price_key) else {
        return;
    };
    let amounts = columns.remove(amount_key);
    let has_amounts = amounts.is_some();
    let amounts = amounts.unwrap_or_else(|| vec![Ok(Value::Null); prices.len()]);

    let mut levels: Vec<(Cell, Cell)> = prices.into_iter().zip(amounts).collect();
    levels.sort_by(|a, b| compare_price(&a.0, &b.0, descending));

    let (prices, amounts): (Vec<Cell>, Vec<Cell>) = levels.into_iter().unzip();
    columns.insert(price_key.to_string(), prices);
    if has_amounts {
        columns.insert(amount_key.to_string(), amounts);
    }
}

/// Missing prices sort last on both sides.
fn compare_price(a: &Cell, b: &Cell, descending: bool) -> Ordering {
    let a = a.as_ref().ok().and_then(Value::as_f64);
    let b = b.as_ref().ok().and_then(Value::as_f64);
    match (a, b) {
        (Some(x), Some(y)) => {
            let ord = x.partial_cmp(&y).unwrap_or(Ordering::Equal);
            if descending { ord.reverse() } else { ord }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
