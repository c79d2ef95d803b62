//! Declarative field extraction: a mapping walks a response with a path of
//! traversal steps, then runs the reached value through a conversion chain.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use crate::error::Result;

pub mod chain;
pub mod extractor;
pub mod path;
pub mod registry;

pub use chain::ConversionChain;
pub use extractor::{extract, Cell, Extracted, ExtractionContext, PairContext};
pub use path::PathStep;
pub use registry::ConversionError;

/// A mapping as written in an exchange definition.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MappingDefinition {
    pub key: String,
    #[serde(default)]
    pub path: Vec<JsonValue>,
    #[serde(rename = "type", alias = "types")]
    pub conversions: Vec<JsonValue>,
}

/// A mapping checked against the conversion registry. Immutable once built.
#[derive(Clone, Debug)]
pub struct Mapping {
    pub key: String,
    pub path: Vec<PathStep>,
    pub chain: ConversionChain,
}

impl Mapping {
    pub fn compile(definition: &MappingDefinition) -> Result<Self> {
        Ok(Mapping {
            key: definition.key.clone(),
            path: PathStep::parse_all(&definition.key, &definition.path)?,
            chain: ConversionChain::compile(&definition.key, &definition.conversions)?,
        })
    }

    pub fn extract(&self, response: &JsonValue, ctx: &ExtractionContext) -> Extracted {
        extractor::extract(response, self, ctx)
    }
}
