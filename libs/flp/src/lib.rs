mod observation;
mod price_client;

pub use observation::{
    DISPLAY_DP, Observation, PRICE_SCALE, Quote, RawPrice, latest_for, observations_for,
};
pub use price_client::{DEFAULT_PRICE_API, DEFAULT_SYMBOL, PriceClient, lookback_window};
