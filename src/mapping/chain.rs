use serde_json::Value as JsonValue;
use crate::error::{Error, Result};
use crate::mapping::extractor::ExtractionContext;
use crate::mapping::registry::{self, Conversion, ConversionError, SKIP_TAG, VALUE_LESS_SOURCES};
use crate::types::Value;

const FIRST_CURRENCY: &str = "first_currency";
const SECOND_CURRENCY: &str = "second_currency";

/// Literal placeholder replaced by the exchange's current interval name.
const INTERVAL_PARAM: &str = "interval";

#[derive(Clone, Debug, PartialEq)]
enum Param {
    Literal(Value),
    CurrentInterval,
}

#[derive(Clone, Debug)]
struct ChainStep {
    source: String,
    target: String,
    conversion: &'static Conversion,
    params: Vec<Param>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Head {
    Registry,
    FirstCurrency,
    SecondCurrency,
}

/// A conversion chain resolved against the registry.
///
/// `[source, target, params.., target2, params..]`: every adjacent tag pair
/// must be registered and is followed by exactly the parameters it declares.
#[derive(Clone, Debug)]
pub struct ConversionChain {
    source: String,
    head: Head,
    steps: Vec<ChainStep>,
}

impl ConversionChain {
    pub fn compile(key: &str, raw: &[JsonValue]) -> Result<Self> {
        let mut items = raw.iter();
        let source = match items.next() {
            Some(first) => tag(key, first)?,
            None => return Err(Error::EmptyConversionChain(key.to_string())),
        };

        let head = match source.as_str() {
            FIRST_CURRENCY => Head::FirstCurrency,
            SECOND_CURRENCY => Head::SecondCurrency,
            _ => Head::Registry,
        };
        if head != Head::Registry {
            if raw.len() > 1 {
                return Err(Error::ConfigError(format!(
                    "mapping '{}': {} takes no further conversions",
                    key, source
                )));
            }
            return Ok(ConversionChain {
                source,
                head,
                steps: Vec::new(),
            });
        }

        let mut steps = Vec::new();
        let mut current = source.clone();
        while let Some(next) = items.next() {
            let target = tag(key, next)?;
            if current == SKIP_TAG || target == SKIP_TAG {
                continue;
            }

            let conversion = registry::lookup(&current, &target).ok_or_else(|| {
                Error::UnknownConversion {
                    key: key.to_string(),
                    source_tag: current.clone(),
                    target_tag: target.clone(),
                }
            })?;

            let params: Vec<Param> = items
                .by_ref()
                .take(conversion.params)
                .map(|p| match p {
                    JsonValue::String(s) if s == INTERVAL_PARAM => Param::CurrentInterval,
                    other => Param::Literal(Value::from_json(other)),
                })
                .collect();
            if params.len() < conversion.params {
                return Err(Error::MissingConversionParams {
                    key: key.to_string(),
                    source_tag: current,
                    target_tag: target,
                    expected: conversion.params,
                    found: params.len(),
                });
            }

            steps.push(ChainStep {
                source: current,
                target: target.clone(),
                conversion,
                params,
            });
            current = target;
        }

        Ok(ConversionChain { source, head, steps })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Tag the last conversion produces, or the source tag for identity chains.
    pub fn target(&self) -> &str {
        self.steps.last().map(|s| s.target.as_str()).unwrap_or(&self.source)
    }

    /// Chains that produce their value without looking at the response.
    pub fn is_value_less(&self) -> bool {
        VALUE_LESS_SOURCES.contains(&self.source.as_str())
    }

    /// `first_currency` / `second_currency` chains resolve from the request
    /// context instead of the response.
    pub fn is_symbolic(&self) -> bool {
        self.head != Head::Registry
    }

    /// Runs the chain. Null input propagates as null unless the step's source
    /// ignores its input.
    pub fn apply(&self, value: Value, ctx: &ExtractionContext) -> std::result::Result<Value, ConversionError> {
        match self.head {
            Head::FirstCurrency => {
                return Ok(ctx.pair.as_ref().map(|p| Value::from(p.first.as_str())).unwrap_or(Value::Null))
            }
            Head::SecondCurrency => {
                return Ok(ctx.pair.as_ref().map(|p| Value::from(p.second.as_str())).unwrap_or(Value::Null))
            }
            Head::Registry => {}
        }

        let mut result = value;
        for step in &self.steps {
            if result.is_null() && !VALUE_LESS_SOURCES.contains(&step.source.as_str()) {
                return Ok(Value::Null);
            }
            let params: Vec<Value> = step
                .params
                .iter()
                .map(|p| match p {
                    Param::Literal(v) => v.clone(),
                    Param::CurrentInterval => Value::from(ctx.interval.as_str()),
                })
                .collect();
            result = (step.conversion.func)(&result, &params)?;
        }
        Ok(result)
    }
}

fn tag(key: &str, raw: &JsonValue) -> Result<String> {
    match raw {
        JsonValue::String(s) => Ok(s.clone()),
        other => Err(Error::ConfigError(format!(
            "mapping '{}': expected a type tag, found {}",
            key, other
        ))),
    }
}
