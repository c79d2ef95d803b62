use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};
use crate::error::{Error, Result};
use crate::exchange::definition::{ExchangeDefinition, RowLimits};
use crate::exchange::request::{join_url, PairTarget, PreparedRequest, RequestSpec};
use crate::mapping::Mapping;
use crate::observability::metrics::EXCHANGE_REQUESTS;
use crate::types::{CurrencyPair, Interval, RequestKind};
use crate::utils::helper::{rate_limit_pause, request_time};

/// Request template plus mapping set for one request kind.
#[derive(Clone, Debug)]
pub struct KindSpec {
    pub request: RequestSpec,
    pub mappings: Vec<Mapping>,
}

/// Raw response of one call.
#[derive(Clone, Debug)]
pub struct RawResponse {
    /// `None` when the call covered every pair.
    pub pair: Option<CurrencyPair>,
    /// `None` when the call failed.
    pub body: Option<JsonValue>,
}

/// Everything one `request` returned for one exchange.
#[derive(Clone, Debug)]
pub struct RawBundle {
    pub exchange: String,
    pub kind: RequestKind,
    pub interval: Interval,
    /// Batch start, rounded to the nearest second.
    pub request_time: DateTime<Utc>,
    pub response_time: DateTime<Utc>,
    pub responses: Vec<RawResponse>,
}

impl RawBundle {
    /// Every call of the batch failed.
    pub fn is_failure(&self) -> bool {
        !self.responses.is_empty() && self.responses.iter().all(|r| r.body.is_none())
    }
}

/// Per-exchange request builder, executor and formatter.
///
/// Immutable once built; shared read-only by every job polling the exchange.
#[derive(Debug)]
pub struct ExchangeAdapter {
    pub(crate) name: String,
    api_url: String,
    client: Client,
    pause: Duration,
    ping: Option<String>,
    row_limits: RowLimits,
    pub(crate) kinds: HashMap<RequestKind, KindSpec>,
}

impl ExchangeAdapter {
    /// Compiles every request template and mapping. Any unknown conversion or
    /// malformed path fails the whole exchange.
    pub fn new(definition: &ExchangeDefinition) -> Result<Self> {
        let name = definition.name.to_lowercase();
        let mut kinds = HashMap::new();

        for (kind_name, request) in &definition.requests {
            let kind: RequestKind = kind_name.parse()?;
            let mappings = request
                .response
                .mapping
                .iter()
                .map(Mapping::compile)
                .collect::<Result<Vec<_>>>()?;
            kinds.insert(
                kind,
                KindSpec {
                    request: RequestSpec::compile(&request.request)?,
                    mappings,
                },
            );
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(definition.timeout_secs))
            .build()?;
        let pause = definition
            .rate_limit
            .as_ref()
            .map(|r| rate_limit_pause(r.max, r.unit))
            .unwrap_or(Duration::ZERO);

        info!("Loaded exchange {} with {} request kinds", name, kinds.len());

        Ok(ExchangeAdapter {
            name,
            api_url: definition.api_url.clone(),
            client,
            pause,
            ping: definition.ping.clone(),
            row_limits: definition.historic_rates.clone(),
            kinds,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn row_limits(&self) -> &RowLimits {
        &self.row_limits
    }

    /// The exchange can both request and format `kind`.
    pub fn supports(&self, kind: RequestKind) -> bool {
        self.kinds.get(&kind).is_some_and(|k| !k.mappings.is_empty())
    }

    pub(crate) fn kind(&self, kind: RequestKind) -> Result<&KindSpec> {
        self.kinds.get(&kind).ok_or_else(|| Error::UnsupportedRequest {
            exchange: self.name.clone(),
            kind,
        })
    }

    pub fn effective_interval(&self, kind: RequestKind, interval: Interval) -> Interval {
        self.kinds
            .get(&kind)
            .map(|k| k.request.effective_interval(interval))
            .unwrap_or(interval)
    }

    pub fn build_request(
        &self,
        kind: RequestKind,
        target: Option<&PairTarget>,
        interval: Interval,
    ) -> Result<PreparedRequest> {
        self.kind(kind)?.request.build(&self.api_url, target, interval)
    }

    /// Issues one call per pair (or a single call for pair-less endpoints).
    /// Failures are logged and leave that pair's body empty.
    pub async fn request(
        &self,
        kind: RequestKind,
        targets: &[PairTarget],
        interval: Interval,
    ) -> Result<RawBundle> {
        let spec = self.kind(kind)?;
        let request_time = request_time();
        let interval = spec.request.effective_interval(interval);

        let calls: Vec<(Option<CurrencyPair>, Result<PreparedRequest>)> = if spec.request.is_pair_less() {
            vec![(None, spec.request.build(&self.api_url, None, interval))]
        } else {
            targets
                .iter()
                .map(|t| (Some(t.pair.clone()), spec.request.build(&self.api_url, Some(t), interval)))
                .collect()
        };

        let mut responses = Vec::with_capacity(calls.len());
        for (i, (pair, prepared)) in calls.into_iter().enumerate() {
            if i > 0 && !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }

            let body = match prepared {
                Ok(req) => match self.fetch(&req).await {
                    Ok(body) => {
                        EXCHANGE_REQUESTS.with_label_values(&[self.name.as_str(), "ok"]).inc();
                        Some(body)
                    }
                    Err(e) => {
                        let outcome = if matches!(e, Error::Timeout(_)) { "timeout" } else { "error" };
                        EXCHANGE_REQUESTS.with_label_values(&[self.name.as_str(), outcome]).inc();
                        warn!("{} request to {} failed for {:?}: {}", kind, self.name, pair, e);
                        None
                    }
                },
                Err(e) => {
                    warn!("Cannot build {} request for {} {:?}: {}", kind, self.name, pair, e);
                    None
                }
            };
            responses.push(RawResponse { pair, body });
        }

        Ok(RawBundle {
            exchange: self.name.clone(),
            kind,
            interval,
            request_time,
            response_time: Utc::now(),
            responses,
        })
    }

    /// Lightweight reachability check: the dedicated ping endpoint, else the
    /// ticker endpoint. The body is not parsed.
    pub async fn test_connection(&self, sample: Option<&CurrencyPair>) -> (String, bool) {
        let url = match &self.ping {
            Some(ping) => join_url(&self.api_url, ping),
            None => {
                let target = sample.cloned().map(PairTarget::new);
                self.build_request(RequestKind::Tickers, target.as_ref(), Interval::default())
                    .map(|req| req.url)
                    .unwrap_or_else(|_| self.api_url.clone())
            }
        };

        let reachable = match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Connectivity probe to {} failed: {}", self.name, e);
                false
            }
        };
        (self.name.clone(), reachable)
    }

    async fn fetch(&self, req: &PreparedRequest) -> Result<JsonValue> {
        let mut retried = false;

        loop {
            debug!("GET {} {:?}", req.url, req.query);
            let response = self
                .client
                .get(&req.url)
                .query(&req.query)
                .send()
                .await
                .map_err(|e| self.transport_error(e, &req.url))?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS && !retried {
                retried = true;
                warn!("Rate limit hit on {}, retrying once", self.name);
                tokio::time::sleep(self.pause * 2).await;
                continue;
            }
            if !status.is_success() {
                return Err(Error::InvalidResponse {
                    exchange: self.name.clone(),
                    reason: format!("HTTP status {}", status),
                });
            }

            let body = response
                .text()
                .await
                .map_err(|e| self.transport_error(e, &req.url))?;
            return serde_json::from_str(&body).map_err(|e| Error::InvalidResponse {
                exchange: self.name.clone(),
                reason: format!("malformed JSON: {}", e),
            });
        }
    }

    fn transport_error(&self, e: reqwest::Error, url: &str) -> Error {
        if e.is_timeout() {
            Error::Timeout(format!("{} ({})", self.name, url))
        } else {
            Error::HttpError(e)
        }
    }
}
