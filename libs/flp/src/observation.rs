use std::{fmt, str::FromStr};

use anyhow::{Context, Result, anyhow};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use serde_json::{Number, Value};

/// Raw prices are fixed-point integers; divide by this to get dollars.
pub const PRICE_SCALE: i64 = 1_000_000;

/// Fractional digits shown in a quote.
pub const DISPLAY_DP: u32 = 4;

//
// Match the flp-stats JSON
// [{ "symbol": "FLP.1", "timestamp": 1718841600, "price": "1234567", ... }]
//
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Observation {
    pub symbol: String,
    pub timestamp: f64,
    pub price: RawPrice,
}

/// The API is not consistent about quoting prices.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum RawPrice {
    Text(String),
    Number(Number),
}

impl RawPrice {
    /// Exact dollar value of the fixed-point price.
    pub fn to_decimal(&self) -> Result<Decimal> {
        let raw = match self {
            RawPrice::Text(s) => parse_decimal(s.trim())?,
            RawPrice::Number(n) => match n.as_i64() {
                Some(i) => Decimal::from(i),
                None => parse_decimal(&n.to_string())?,
            },
        };

        raw.checked_div(Decimal::from(PRICE_SCALE))
            .ok_or_else(|| anyhow!("price {raw} out of range"))
    }
}

fn parse_decimal(s: &str) -> Result<Decimal> {
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .with_context(|| format!("price {s:?} is not a number"))
}

/// Decodes the rows belonging to `symbol`. Rows of other symbols are skipped
/// without being looked at, so their shape does not matter.
pub fn observations_for(symbol: &str, rows: Vec<Value>) -> Result<Vec<Observation>> {
    rows.into_iter()
        .filter(|row| row.get("symbol").and_then(Value::as_str) == Some(symbol))
        .map(|row| {
            serde_json::from_value(row).with_context(|| format!("malformed {symbol} observation"))
        })
        .collect()
}

/// Picks the observation of `symbol` with the greatest timestamp.
///
/// Ties keep the first one seen.
pub fn latest_for<'a>(symbol: &str, observations: &'a [Observation]) -> Option<&'a Observation> {
    let mut latest: Option<&Observation> = None;

    for obs in observations.iter().filter(|o| o.symbol == symbol) {
        match latest {
            Some(cur) if obs.timestamp <= cur.timestamp => {}
            _ => latest = Some(obs),
        }
    }

    latest
}

/// A price ready to be shown, in dollars, rounded half away from zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    value: Decimal,
}

impl Quote {
    pub fn from_raw(price: &RawPrice) -> Result<Self> {
        let mut value = price
            .to_decimal()?
            .round_dp_with_strategy(DISPLAY_DP, RoundingStrategy::MidpointAwayFromZero);
        value.rescale(DISPLAY_DP);

        Ok(Self { value })
    }

    pub fn from_observation(obs: &Observation) -> Result<Self> {
        Self::from_raw(&obs.price)
            .with_context(|| format!("bad price for {} at {}", obs.symbol, obs.timestamp))
    }

    pub fn value(&self) -> Decimal {
        self.value
    }

    pub fn nickname(&self) -> String {
        format!("${self}")
    }
}

impl fmt::Display for Quote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}
