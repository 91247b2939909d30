use std::{env::var, time::Duration};

use anyhow::{Context, Result, anyhow, ensure};
use chrono_tz::Tz;

pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct Config {
    pub discord_token: String,
    pub update_interval: Duration,
    /// Decides which calendar day counts as "today" for the price window.
    pub time_zone: Tz,
    pub version: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let discord_token = lookup("DISCORD_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .context("DISCORD_TOKEN not set")?;

        let update_interval = match lookup("UPDATE_INTERVAL_SECS") {
            Some(raw) => {
                let secs: u64 = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("UPDATE_INTERVAL_SECS={raw:?} is not a number"))?;
                ensure!(secs > 0, "UPDATE_INTERVAL_SECS must be greater than zero");
                Duration::from_secs(secs)
            }
            None => DEFAULT_UPDATE_INTERVAL,
        };

        let time_zone = match lookup("PRICE_TIME_ZONE") {
            Some(raw) => raw
                .trim()
                .parse::<Tz>()
                .map_err(|e| anyhow!("PRICE_TIME_ZONE={raw:?}: {e}"))?,
            None => chrono_tz::UTC,
        };

        Ok(Self {
            discord_token,
            update_interval,
            time_zone,
            version: lookup("APP_VERSION").unwrap_or_else(|| "Unknown".to_string()),
        })
    }
}
