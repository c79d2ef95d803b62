use serde::{Deserialize, Serialize};
use std::fmt;
use crate::error::{Error, Result};

/// A tradeable pair as offered by one exchange.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CurrencyPair {
    pub exchange: String,
    pub first: String,
    pub second: String,
}

impl CurrencyPair {
    pub fn new(exchange: &str, first: &str, second: &str) -> Result<Self> {
        let first = first.trim().to_uppercase();
        let second = second.trim().to_uppercase();

        if first.is_empty() || second.is_empty() {
            return Err(Error::ConfigError(format!(
                "Empty currency symbol in pair {}-{} on {}",
                first, second, exchange
            )));
        }
        if first == second {
            return Err(Error::ConfigError(format!(
                "Currency pair {}-{} on {} has identical sides",
                first, second, exchange
            )));
        }

        Ok(CurrencyPair {
            exchange: exchange.to_lowercase(),
            first,
            second,
        })
    }

    /// Renders the pair with an exchange template such as `{first}_{second}`.
    pub fn format(&self, template: &str, lower_case: bool) -> String {
        let formatted = template
            .replace("{first}", &self.first)
            .replace("{second}", &self.second);

        if lower_case {
            formatted.to_lowercase()
        } else {
            formatted
        }
    }

    pub fn matches_symbols(&self, first: &str, second: &str) -> bool {
        self.first.eq_ignore_ascii_case(first) && self.second.eq_ignore_ascii_case(second)
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.exchange, self.first, self.second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_identical_sides() {
        assert!(CurrencyPair::new("bitstamp", "btc", "BTC").is_err());
    }

    #[test]
    fn normalizes_symbols_and_formats_template() {
        let pair = CurrencyPair::new("Bitstamp", "btc", "usd").unwrap();
        assert_eq!(pair.exchange, "bitstamp");
        assert_eq!(pair.format("{first}_{second}", false), "BTC_USD");
        assert_eq!(pair.format("{first}{second}", true), "btcusd");
    }
}
