//! Optional quote-only provider for symbols the tabular providers cannot
//! serve. Never asked for history.

use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;

use screener_core::{
    MarketDataProvider, Period, PriceSeries, ProviderCapabilities, Quote, ScreenerError,
};

use super::classify_status;

pub const PROVIDER_ID: &str = "quote_only";

pub struct QuoteOnlyProvider {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
}

impl QuoteOnlyProvider {
    pub fn new(api_key: String, base_url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_key,
            client,
            base_url,
        }
    }
}

#[async_trait]
impl MarketDataProvider for QuoteOnlyProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            ohlcv: false,
            quote: true,
            indices: false,
        }
    }

    async fn fetch_ohlcv(&self, symbol: &str, _period: Period) -> Result<PriceSeries, ScreenerError> {
        Err(ScreenerError::permanent(
            PROVIDER_ID,
            format!("history unsupported for {}", symbol),
        ))
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, ScreenerError> {
        let url = format!("{}/quote", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("symbol", symbol), ("token", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| ScreenerError::transient(PROVIDER_ID, e.to_string()))?;

        if !response.status().is_success() {
            return Err(classify_status(PROVIDER_ID, response.status()));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|_| ScreenerError::transient(PROVIDER_ID, "non-JSON body"))?;

        let price = json
            .get("c")
            .and_then(|v| v.as_f64())
            .filter(|p| *p > 0.0)
            .ok_or_else(|| ScreenerError::permanent(PROVIDER_ID, "symbol not served"))?;

        Ok(Quote {
            symbol: symbol.to_string(),
            price,
            prev_close: json.get("pc").and_then(|v| v.as_f64()).unwrap_or(price),
            volume: None,
            asof: Utc::now(),
        })
    }
}
