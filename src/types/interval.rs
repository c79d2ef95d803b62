use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use crate::error::{Error, Result};

/// Granularity of historic-rate requests, ordered from finest to coarsest.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    #[serde(alias = "second")]
    Seconds,
    #[serde(alias = "minute")]
    Minutes,
    #[serde(alias = "hour")]
    Hours,
    #[serde(alias = "day")]
    #[default]
    Days,
}

impl Interval {
    pub const SCALE: [Interval; 4] = [
        Interval::Seconds,
        Interval::Minutes,
        Interval::Hours,
        Interval::Days,
    ];

    pub fn step(&self) -> usize {
        *self as usize
    }

    /// Next coarser step, clamped at the coarsest.
    pub fn coarser(&self) -> Interval {
        Self::SCALE[(self.step() + 1).min(Self::SCALE.len() - 1)]
    }

    /// Next finer step, clamped at the finest.
    pub fn finer(&self) -> Interval {
        Self::SCALE[self.step().saturating_sub(1)]
    }

    pub fn is_coarsest(&self) -> bool {
        *self == Interval::Days
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Seconds => "seconds",
            Interval::Minutes => "minutes",
            Interval::Hours => "hours",
            Interval::Days => "days",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "seconds" | "second" => Ok(Interval::Seconds),
            "minutes" | "minute" => Ok(Interval::Minutes),
            "hours" | "hour" => Ok(Interval::Hours),
            "days" | "day" => Ok(Interval::Days),
            other => Err(Error::ConfigError(format!("Unknown interval: {}", other))),
        }
    }
}
