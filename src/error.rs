use thiserror::Error;
use crate::mapping::ConversionError;
use crate::types::RequestKind;

#[derive(Error, Debug)]
pub enum Error {
    // Configuration Errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Unknown conversion {source_tag} -> {target_tag} in mapping '{key}'")]
    UnknownConversion {
        key: String,
        source_tag: String,
        target_tag: String,
    },

    #[error("Conversion {source_tag} -> {target_tag} in mapping '{key}' needs {expected} parameter(s), found {found}")]
    MissingConversionParams {
        key: String,
        source_tag: String,
        target_tag: String,
        expected: usize,
        found: usize,
    },

    #[error("Invalid path step in mapping '{key}': {step}")]
    InvalidPathStep {
        key: String,
        step: String,
    },

    #[error("Empty conversion chain in mapping '{0}'")]
    EmptyConversionChain(String),

    #[error("No mapping for {kind} on exchange {exchange}")]
    MappingNotFound {
        exchange: String,
        kind: RequestKind,
    },

    #[error("Exchange {exchange} does not support {kind} requests")]
    UnsupportedRequest {
        exchange: String,
        kind: RequestKind,
    },

    // Transport Errors
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Request to {0} timed out")]
    Timeout(String),

    #[error("Invalid response from {exchange}: {reason}")]
    InvalidResponse {
        exchange: String,
        reason: String,
    },

    // Extraction Errors
    #[error("Conversion failed for '{key}': {source}")]
    Conversion {
        key: String,
        #[source]
        source: ConversionError,
    },

    #[error("No currency pair provided by {exchange} for {kind}")]
    NoCurrencyPairProvided {
        exchange: String,
        kind: RequestKind,
    },

    // Persistence Errors
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    // Task Errors
    #[error("Tasks terminated abnormally: {0:?}")]
    TaskFailed(Vec<String>),

    // IO Errors
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::ConfigError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
