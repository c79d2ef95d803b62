use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    #[serde(alias = "ticker")]
    Tickers,
    #[serde(alias = "trade")]
    Trades,
    #[serde(alias = "order_book")]
    OrderBooks,
    #[serde(alias = "historic_rate")]
    HistoricRates,
    CurrencyPairs,
}

impl RequestKind {
    pub const ALL: [RequestKind; 5] = [
        RequestKind::Tickers,
        RequestKind::Trades,
        RequestKind::OrderBooks,
        RequestKind::HistoricRates,
        RequestKind::CurrencyPairs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Tickers => "tickers",
            RequestKind::Trades => "trades",
            RequestKind::OrderBooks => "order_books",
            RequestKind::HistoricRates => "historic_rates",
            RequestKind::CurrencyPairs => "currency_pairs",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tickers" | "ticker" => Ok(RequestKind::Tickers),
            "trades" | "trade" => Ok(RequestKind::Trades),
            "order_books" | "order_book" => Ok(RequestKind::OrderBooks),
            "historic_rates" | "historic_rate" => Ok(RequestKind::HistoricRates),
            "currency_pairs" => Ok(RequestKind::CurrencyPairs),
            other => Err(Error::ConfigError(format!("Unknown request kind: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_singular_and_plural_names() {
        assert_eq!("ticker".parse::<RequestKind>().unwrap(), RequestKind::Tickers);
        assert_eq!("order_books".parse::<RequestKind>().unwrap(), RequestKind::OrderBooks);
        assert!("candles".parse::<RequestKind>().is_err());
        for kind in RequestKind::ALL {
            assert_eq!(kind.as_str().parse::<RequestKind>().unwrap(), kind);
        }
    }
}
