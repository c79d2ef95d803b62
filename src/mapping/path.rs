use serde_json::Value as JsonValue;
use std::borrow::Cow;
use crate::error::{Error, Result};

/// One traversal instruction of a mapping path.
#[derive(Clone, Debug, PartialEq)]
pub enum PathStep {
    /// Descend into an object by key.
    Key(String),
    /// Descend into a list by position (negative counts from the end), or
    /// into an object by the index's string form.
    Index(i64),
    /// Replace an object (or list) with the sequence of its keys.
    Keys,
    /// Replace an object (or list) with the sequence of its values.
    Values,
    /// `[]`: the remaining path applies per element of the current list.
    EachElement,
    /// Descend by the formatted key of the pair being requested.
    CurrencyPair,
}

impl PathStep {
    pub fn parse(key: &str, raw: &JsonValue) -> Result<Self> {
        let invalid = || Error::InvalidPathStep {
            key: key.to_string(),
            step: raw.to_string(),
        };

        match raw {
            JsonValue::String(s) => Ok(match s.as_str() {
                "currency_pair" => PathStep::CurrencyPair,
                "dict_key" | "list_key" => PathStep::Keys,
                "dict_values" | "list_values" => PathStep::Values,
                _ => PathStep::Key(s.clone()),
            }),
            JsonValue::Number(n) => n.as_i64().map(PathStep::Index).ok_or_else(invalid),
            JsonValue::Array(items) if items.is_empty() => Ok(PathStep::EachElement),
            _ => Err(invalid()),
        }
    }

    pub fn parse_all(key: &str, raw: &[JsonValue]) -> Result<Vec<Self>> {
        raw.iter().map(|step| Self::parse(key, step)).collect()
    }

    /// Applies this step to a container node. `None` means the target is
    /// missing. `EachElement` is handled by the extractor and is a no-op here.
    pub(crate) fn descend<'a>(
        &self,
        node: &'a JsonValue,
        pair_key: Option<&str>,
    ) -> Option<Cow<'a, JsonValue>> {
        let found = match (self, node) {
            (PathStep::Key(k), JsonValue::Object(map)) => map.get(k),
            (PathStep::Key(k), JsonValue::Array(items)) => {
                k.parse::<i64>().ok().and_then(|i| index(items, i))
            }
            (PathStep::Index(i), JsonValue::Array(items)) => index(items, *i),
            (PathStep::Index(i), JsonValue::Object(map)) => map.get(&i.to_string()),
            (PathStep::CurrencyPair, JsonValue::Object(map)) => map.get(pair_key?),
            (PathStep::Keys, JsonValue::Object(map)) => {
                return Some(Cow::Owned(JsonValue::Array(
                    map.keys().map(|k| JsonValue::String(k.clone())).collect(),
                )))
            }
            (PathStep::Keys, JsonValue::Array(items)) => {
                return Some(Cow::Owned(JsonValue::Array(
                    (0..items.len()).map(|i| JsonValue::from(i as i64)).collect(),
                )))
            }
            (PathStep::Values, JsonValue::Object(map)) => {
                return Some(Cow::Owned(JsonValue::Array(map.values().cloned().collect())))
            }
            (PathStep::Values, JsonValue::Array(_)) | (PathStep::EachElement, _) => Some(node),
            _ => None,
        };
        found.map(Cow::Borrowed)
    }
}

fn index(items: &[JsonValue], i: i64) -> Option<&JsonValue> {
    let len = items.len() as i64;
    let resolved = if i < 0 { len + i } else { i };
    if (0..len).contains(&resolved) {
        items.get(resolved as usize)
    } else {
        None
    }
}
