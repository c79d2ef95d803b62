use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use crate::error::{Error, Result};
use crate::exchange::definition::{PairTemplate, ParamSpec, RequestTemplate};
use crate::mapping::{ConversionChain, ExtractionContext, PairContext};
use crate::types::{CurrencyPair, Interval, Value};
use crate::utils::helper::now_seconds;

const LAST_TIMESTAMP: &str = "last_timestamp";
const PAIR_PLACEHOLDER: &str = "currency_pair";

/// A pair to request, with the point historic collection resumes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PairTarget {
    pub pair: CurrencyPair,
    pub cursor: Option<DateTime<Utc>>,
}

impl PairTarget {
    pub fn new(pair: CurrencyPair) -> Self {
        PairTarget { pair, cursor: None }
    }
}

/// A concrete GET request.
#[derive(Clone, Debug, PartialEq)]
pub struct PreparedRequest {
    /// `None` when the call covers every pair.
    pub pair: Option<CurrencyPair>,
    pub url: String,
    pub query: Vec<(String, String)>,
}

#[derive(Clone, Debug)]
enum ParamFunction {
    LastTimestamp,
}

#[derive(Clone, Debug)]
struct CompiledParam {
    name: String,
    allowed: BTreeMap<Interval, JsonValue>,
    function: Option<ParamFunction>,
    default: Option<Value>,
    chain: Option<ConversionChain>,
}

/// One request kind's template, checked at adapter construction.
#[derive(Clone, Debug)]
pub struct RequestSpec {
    template: String,
    pair_template: Option<PairTemplate>,
    params: Vec<CompiledParam>,
}

impl RequestSpec {
    pub fn compile(template: &RequestTemplate) -> Result<Self> {
        let mut params = Vec::new();
        for (name, spec) in &template.params {
            if !spec.required {
                continue;
            }
            params.push(compile_param(name, spec)?);
        }

        Ok(RequestSpec {
            template: template.template.clone(),
            pair_template: template.pair_template.clone(),
            params,
        })
    }

    /// One call returns every pair.
    pub fn is_pair_less(&self) -> bool {
        self.pair_template.is_none()
    }

    /// The pair as this exchange spells it, e.g. `btc_usd`.
    pub fn format_pair(&self, pair: &CurrencyPair) -> Option<String> {
        self.pair_template
            .as_ref()
            .map(|t| pair.format(&t.template, t.lower_case))
    }

    /// The interval actually requested: the configured one if the exchange
    /// offers it, else the next coarser offered one, else the coarsest offered.
    pub fn effective_interval(&self, interval: Interval) -> Interval {
        let Some(offered) = self.params.iter().find(|p| !p.allowed.is_empty()) else {
            return interval;
        };
        offered
            .allowed
            .keys()
            .copied()
            .find(|i| *i >= interval)
            .or_else(|| offered.allowed.keys().next_back().copied())
            .unwrap_or(interval)
    }

    pub fn build(
        &self,
        api_url: &str,
        target: Option<&PairTarget>,
        interval: Interval,
    ) -> Result<PreparedRequest> {
        let interval = self.effective_interval(interval);
        let pair = target.map(|t| &t.pair);
        let pair_key = pair.and_then(|p| self.format_pair(p));
        let ctx = ExtractionContext {
            pair: match (pair, &pair_key) {
                (Some(p), Some(key)) => Some(PairContext::new(&p.first, &p.second, key)),
                _ => None,
            },
            interval,
        };

        let mut values = BTreeMap::new();
        for param in &self.params {
            let resolved = resolve_param(param, target, interval, &ctx)?;
            if let Some(rendered) = render(&resolved) {
                values.insert(param.name.clone(), rendered);
            }
        }

        if let (Some(key), Some(template)) = (&pair_key, &self.pair_template) {
            match &template.alias {
                Some(alias) => {
                    values.insert(alias.clone(), key.clone());
                }
                None => {
                    values.insert(PAIR_PLACEHOLDER.to_string(), key.clone());
                }
            }
        }

        let path = fill_template(&self.template, &mut values)?;
        Ok(PreparedRequest {
            pair: pair.cloned(),
            url: join_url(api_url, &path),
            query: values.into_iter().collect(),
        })
    }
}

fn compile_param(name: &str, spec: &ParamSpec) -> Result<CompiledParam> {
    let mut allowed = BTreeMap::new();
    for (interval, value) in spec.allowed.iter().flatten() {
        match interval.parse::<Interval>() {
            Ok(i) => {
                allowed.insert(i, value.clone());
            }
            Err(_) => tracing::debug!("Ignoring unsupported interval {} for parameter {}", interval, name),
        }
    }

    let function = match spec.function.as_deref() {
        None => None,
        Some(LAST_TIMESTAMP) => Some(ParamFunction::LastTimestamp),
        Some(other) => {
            return Err(Error::ConfigError(format!(
                "Unknown function '{}' for request parameter '{}'",
                other, name
            )))
        }
    };

    // A single tag only declares the parameter's type.
    let chain = match &spec.conversions {
        Some(types) if types.len() >= 2 => Some(ConversionChain::compile(name, types)?),
        _ => None,
    };

    Ok(CompiledParam {
        name: name.to_string(),
        allowed,
        function,
        default: spec.default.as_ref().map(Value::from_json),
        chain,
    })
}

fn resolve_param(
    param: &CompiledParam,
    target: Option<&PairTarget>,
    interval: Interval,
    ctx: &ExtractionContext,
) -> Result<Value> {
    let mut value = Value::Null;

    if !param.allowed.is_empty() {
        value = param
            .allowed
            .get(&interval)
            .map(Value::from_json)
            .unwrap_or(Value::Null);
    }
    if let Some(ParamFunction::LastTimestamp) = param.function {
        let cursor = target.and_then(|t| t.cursor).unwrap_or_else(now_seconds);
        value = Value::DateTime(cursor);
    }
    if value.is_null() {
        if let Some(default) = &param.default {
            value = default.clone();
        }
    }
    if let Some(chain) = &param.chain {
        value = chain
            .apply(value, ctx)
            .map_err(|source| Error::Conversion {
                key: param.name.clone(),
                source,
            })?;
    }
    Ok(value)
}

/// Query rendering of a parameter value. Null parameters are left out.
fn render(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::DateTime(dt) => Some(dt.timestamp().to_string()),
        other => Some(other.to_string()),
    }
}

/// Substitutes `{name}` placeholders from `values`, removing every value
/// that went into the path so it is not repeated in the query.
fn fill_template(template: &str, values: &mut BTreeMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(|| {
            Error::ConfigError(format!("Unclosed placeholder in request template '{}'", template))
        })?;
        let name = &after[..close];
        let value = values.remove(name).ok_or_else(|| {
            Error::ConfigError(format!(
                "No value for placeholder '{{{}}}' in request template '{}'",
                name, template
            ))
        })?;
        out.push_str(&value);
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

pub(crate) fn join_url(api_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    if path.is_empty() {
        return api_url.to_string();
    }
    format!(
        "{}/{}",
        api_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
