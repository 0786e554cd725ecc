//! Outbound BTC price quotes, used to value holdings in USD.

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde_json::Value;

const QUOTES_URL: &str = "https://pro-api.coinmarketcap.com/v1/cryptocurrency/quotes/latest";

/// Mockable source of the current BTC price for unit tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait BtcPriceQuoting: Send + Sync {
    async fn btc_price_in_usd(&self) -> Result<f64>;
}

pub struct CoinMarketCap {
    client: Client,
    api_key: String,
}

impl CoinMarketCap {
    pub fn new(client: Client, api_key: String) -> Self {
        Self { client, api_key }
    }
}

#[async_trait::async_trait]
impl BtcPriceQuoting for CoinMarketCap {
    async fn btc_price_in_usd(&self) -> Result<f64> {
        let response = self
            .client
            .get(QUOTES_URL)
            .query(&[("symbol", "BTC")])
            .header("X-CMC_PRO_API_KEY", &self.api_key)
            .header("Accepts", "application/json")
            .send()
            .await
            .context("quote request failed")?;
        let body: Value = response
            .json()
            .await
            .context("quote response is not json")?;
        price_from_response(&body)
    }
}

fn price_from_response(body: &Value) -> Result<f64> {
    body.pointer("/data/BTC/quote/USD/price")
        .and_then(Value::as_f64)
        .ok_or_else(|| anyhow!("quote response carries no BTC price"))
}
