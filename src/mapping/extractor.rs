use serde_json::Value as JsonValue;
use std::borrow::Cow;
use crate::mapping::registry::ConversionError;
use crate::mapping::{Mapping, PathStep};
use crate::types::{Interval, Value};

/// The pair a response was requested for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PairContext {
    pub first: String,
    pub second: String,
    /// The pair as the exchange formats it, used for `currency_pair` descents.
    pub key: String,
}

impl PairContext {
    pub fn new(first: &str, second: &str, key: &str) -> Self {
        PairContext {
            first: first.to_string(),
            second: second.to_string(),
            key: key.to_string(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ExtractionContext {
    pub pair: Option<PairContext>,
    pub interval: Interval,
}

/// Result of running one mapping against one response.
#[derive(Clone, Debug, PartialEq)]
pub enum Extracted {
    Value(Value),
    /// The conversion chain rejected this element. Siblings are unaffected.
    Failed(ConversionError),
    /// One result per element of an iterated list.
    Many(Vec<Extracted>),
}

pub type Cell = std::result::Result<Value, ConversionError>;

impl Extracted {
    pub fn is_many(&self) -> bool {
        matches!(self, Extracted::Many(_))
    }

    /// Number of cells `into_cells` yields.
    pub fn cell_count(&self) -> usize {
        match self {
            Extracted::Many(items) => items.iter().map(Extracted::cell_count).sum(),
            _ => 1,
        }
    }

    /// Flattens nested iterations into one column of cells.
    pub fn into_cells(self) -> Vec<Cell> {
        match self {
            Extracted::Value(v) => vec![Ok(v)],
            Extracted::Failed(e) => vec![Err(e)],
            Extracted::Many(items) => items.into_iter().flat_map(Extracted::into_cells).collect(),
        }
    }
}

impl From<Cell> for Extracted {
    fn from(cell: Cell) -> Self {
        match cell {
            Ok(v) => Extracted::Value(v),
            Err(e) => Extracted::Failed(e),
        }
    }
}

/// Runs `mapping` against `response`. Never fails as a whole: missing nodes
/// come back as null, conversion failures as `Failed` elements.
pub fn extract(response: &JsonValue, mapping: &Mapping, ctx: &ExtractionContext) -> Extracted {
    let chain = &mapping.chain;
    if chain.is_symbolic() || (mapping.path.is_empty() && chain.is_value_less()) {
        return convert(mapping, Value::Null, ctx);
    }
    walk(Cow::Borrowed(response), &mapping.path, true, mapping, ctx)
}

fn walk(
    node: Cow<'_, JsonValue>,
    steps: &[PathStep],
    iterate: bool,
    mapping: &Mapping,
    ctx: &ExtractionContext,
) -> Extracted {
    let pair_key = ctx.pair.as_ref().map(|p| p.key.as_str());
    let mut node = node;
    let mut steps = steps;

    loop {
        if is_absent(&node) {
            return convert(mapping, Value::Null, ctx);
        }
        let Some((step, rest)) = steps.split_first() else {
            break;
        };

        if iterate {
            if let JsonValue::Array(items) = node.as_ref() {
                if items.len() == 1 {
                    node = first_element(node);
                    continue;
                }
                if items.iter().any(is_scalar) {
                    return walk(node, steps, false, mapping, ctx);
                }
                return Extracted::Many(
                    items
                        .iter()
                        .map(|item| walk(Cow::Borrowed(item), steps, true, mapping, ctx))
                        .collect(),
                );
            }
        }

        if *step == PathStep::EachElement {
            steps = rest;
            continue;
        }
        if is_scalar(&node) {
            return convert(mapping, Value::Null, ctx);
        }

        let next = match &node {
            Cow::Borrowed(n) => step.descend(n, pair_key),
            Cow::Owned(n) => step
                .descend(n, pair_key)
                .map(|child| Cow::Owned(child.into_owned())),
        };
        match next {
            Some(child) => node = child,
            None => return convert(mapping, Value::Null, ctx),
        }
        steps = rest;
    }

    match node.as_ref() {
        JsonValue::Array(items) => {
            let mut results: Vec<Extracted> = items
                .iter()
                .map(|item| convert(mapping, Value::from_json(item), ctx))
                .collect();
            if results.len() == 1 {
                results.remove(0)
            } else {
                Extracted::Many(results)
            }
        }
        other => convert(mapping, Value::from_json(other), ctx),
    }
}

fn convert(mapping: &Mapping, value: Value, ctx: &ExtractionContext) -> Extracted {
    mapping.chain.apply(value, ctx).into()
}

fn first_element(node: Cow<'_, JsonValue>) -> Cow<'_, JsonValue> {
    match node {
        Cow::Borrowed(JsonValue::Array(items)) if !items.is_empty() => Cow::Borrowed(&items[0]),
        Cow::Owned(JsonValue::Array(mut items)) if !items.is_empty() => {
            Cow::Owned(items.swap_remove(0))
        }
        other => other,
    }
}

/// Absent: null, an empty container or an empty string. `0` and `false` are present.
fn is_absent(node: &JsonValue) -> bool {
    match node {
        JsonValue::Null => true,
        JsonValue::String(s) => s.is_empty(),
        JsonValue::Array(items) => items.is_empty(),
        JsonValue::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn is_scalar(node: &JsonValue) -> bool {
    !matches!(node, JsonValue::Array(_) | JsonValue::Object(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MappingDefinition;
    use serde_json::json;

    fn mapping(path: JsonValue, types: JsonValue) -> Mapping {
        Mapping::compile(&MappingDefinition {
            key: "field".to_string(),
            path: path.as_array().cloned().unwrap_or_default(),
            conversions: types.as_array().cloned().unwrap_or_default(),
        })
        .unwrap()
    }

    fn btc_usd() -> ExtractionContext {
        ExtractionContext {
            pair: Some(PairContext::new("BTC", "USD", "BTC_USD")),
            interval: Interval::Days,
        }
    }

    #[test]
    fn pair_keyed_object() {
        let response = json!({"BTC_USD": {"last": "100.5"}});
        let m = mapping(json!(["currency_pair", "last"]), json!(["str", "float"]));
        assert_eq!(extract(&response, &m, &btc_usd()), Extracted::Value(Value::Float(100.5)));
    }

    #[test]
    fn iterates_list_of_objects() {
        let response = json!([{"p": "1"}, {"p": "2"}, {"p": "3"}]);
        let m = mapping(json!([[], "p"]), json!(["str", "int"]));
        assert_eq!(
            extract(&response, &m, &ExtractionContext::default()),
            Extracted::Many(vec![
                Extracted::Value(Value::Int(1)),
                Extracted::Value(Value::Int(2)),
                Extracted::Value(Value::Int(3)),
            ])
        );
    }

    #[test]
    fn single_element_list_is_unwrapped() {
        let m = mapping(json!(["price"]), json!(["str", "float"]));
        let wrapped = extract(&json!([{"price": "2.5"}]), &m, &ExtractionContext::default());
        let bare = extract(&json!({"price": "2.5"}), &m, &ExtractionContext::default());
        assert_eq!(wrapped, bare);
    }

    #[test]
    fn scalar_list_is_converted_per_element() {
        let response = json!({"bids": [["1.0", "2"], ["0.9", "3"]]});
        let price = mapping(json!(["bids", [], 0]), json!(["str", "float"]));
        assert_eq!(
            extract(&response, &price, &ExtractionContext::default()),
            Extracted::Many(vec![
                Extracted::Value(Value::Float(1.0)),
                Extracted::Value(Value::Float(0.9)),
            ])
        );
    }

    #[test]
    fn missing_key_is_null_without_conversion_error() {
        let m = mapping(json!(["result", "missing", "deeper"]), json!(["str", "float"]));
        let response = json!({"result": {"present": 1}});
        assert_eq!(
            extract(&response, &m, &ExtractionContext::default()),
            Extracted::Value(Value::Null)
        );
    }

    #[test]
    fn scalar_guard_stops_descent() {
        let m = mapping(json!(["price", "value"]), json!(["str", "float"]));
        assert_eq!(
            extract(&json!({"price": "1"}), &m, &ExtractionContext::default()),
            Extracted::Value(Value::Null)
        );
    }

    #[test]
    fn zero_survives_extraction() {
        let m = mapping(json!(["volume"]), json!(["float", "int"]));
        assert_eq!(
            extract(&json!({"volume": 0}), &m, &ExtractionContext::default()),
            Extracted::Value(Value::Int(0))
        );
    }

    #[test]
    fn keys_of_object_enumerate_pairs() {
        let response = json!({"BTC_USD": {}, "ETH_USD": {}});
        let m = mapping(json!(["dict_key"]), json!(["str", "split", "_", 0]));
        assert_eq!(
            extract(&response, &m, &ExtractionContext::default()),
            Extracted::Many(vec![
                Extracted::Value("BTC".into()),
                Extracted::Value("ETH".into()),
            ])
        );
    }

    #[test]
    fn failed_element_does_not_poison_siblings() {
        let response = json!([{"t": "2020-01-01"}, {"t": "garbage"}]);
        let m = mapping(json!([[], "t"]), json!(["str", "strptime", "%Y-%m-%d"]));
        let Extracted::Many(items) = extract(&response, &m, &ExtractionContext::default()) else {
            panic!("expected one result per element");
        };
        assert!(matches!(items[0], Extracted::Value(Value::DateTime(_))));
        assert!(matches!(items[1], Extracted::Failed(ConversionError::TimeParse { .. })));
    }

    #[test]
    fn empty_path_uses_generators_or_whole_response() {
        let now = mapping(json!([]), json!(["none", "now"]));
        assert!(matches!(
            extract(&json!({"a": 1}), &now, &ExtractionContext::default()),
            Extracted::Value(Value::DateTime(_))
        ));

        let whole = mapping(json!([]), json!(["str", "float"]));
        assert_eq!(
            extract(&json!("4.25"), &whole, &ExtractionContext::default()),
            Extracted::Value(Value::Float(4.25))
        );
    }

    #[test]
    fn currency_pair_without_context_is_null() {
        let m = mapping(json!(["currency_pair", "last"]), json!(["str", "float"]));
        let response = json!({"BTC_USD": {"last": "1"}});
        assert_eq!(
            extract(&response, &m, &ExtractionContext::default()),
            Extracted::Value(Value::Null)
        );
    }

    #[test]
    fn cells_flatten_nested_iterations() {
        let nested = Extracted::Many(vec![
            Extracted::Many(vec![Extracted::Value(Value::Int(1))]),
            Extracted::Value(Value::Int(2)),
        ]);
        assert_eq!(nested.into_cells(), vec![Ok(Value::Int(1)), Ok(Value::Int(2))]);
    }
}
