use anyhow::{Context, Error, Result};
use chrono::{Days, NaiveDate};
use reqwest::{
    Client,
    header::{HeaderMap, HeaderValue, USER_AGENT},
};
use tracing::debug;

use serde_json::Value;

use crate::observation::{Observation, Quote, latest_for, observations_for};

pub const DEFAULT_PRICE_API: &str = "https://api.prod.flash.trade/flp-stats/by-date-range";
pub const DEFAULT_SYMBOL: &str = "FLP.1";

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Clone)]
pub struct PriceClient {
    client: Client,
    base_api: String,
    symbol: String,
}

impl PriceClient {
    pub fn new(base_api: impl Into<String>, symbol: impl Into<String>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("flp/", env!("CARGO_PKG_VERSION"))),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_api: base_api.into(),
            symbol: symbol.into(),
        })
    }

    /// Reads PRICE_API_URL and PRICE_SYMBOL, falling back to the flash.trade
    /// endpoint and FLP.1.
    pub fn from_env() -> Result<Self> {
        let base_api =
            std::env::var("PRICE_API_URL").unwrap_or_else(|_| DEFAULT_PRICE_API.to_string());
        let symbol = std::env::var("PRICE_SYMBOL").unwrap_or_else(|_| DEFAULT_SYMBOL.to_string());
        Self::new(base_api, symbol)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Observations of the configured symbol between `from` and `to`.
    pub async fn fetch_observations(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Observation>, Error> {
        let rows: Vec<Value> = self
            .client
            .get(self.base_api.as_str())
            .query(&[
                ("from", from.format(DATE_FORMAT).to_string()),
                ("to", to.format(DATE_FORMAT).to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        observations_for(&self.symbol, rows)
    }

    /// Latest quote for the configured symbol over yesterday and `today`.
    ///
    /// `Ok(None)` when the window holds no observation of the symbol.
    pub async fn latest_quote(&self, today: NaiveDate) -> Result<Option<Quote>> {
        let (from, to) = lookback_window(today);
        let observations = self
            .fetch_observations(from, to)
            .await
            .with_context(|| format!("fetching {} for {from}..{to}", self.symbol))?;

        debug!(
            symbol = %self.symbol,
            total = observations.len(),
            "fetched observations"
        );

        latest_for(&self.symbol, &observations)
            .map(Quote::from_observation)
            .transpose()
    }
}

/// Yesterday through today, inclusive.
pub fn lookback_window(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let yesterday = today.checked_sub_days(Days::new(1)).unwrap_or(today);
    (yesterday, today)
}
