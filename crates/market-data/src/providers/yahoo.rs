//! Primary tabular-history provider: the Yahoo v8 chart endpoint. Serves
//! caret-prefixed indices and most equities. Only the time-series chart
//! endpoint is called; quote data comes from the chart meta block, never
//! from an HTML-metadata page.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use screener_core::{
    Bar, MarketDataProvider, Period, PriceSeries, ProviderCapabilities, Quote, ScreenerError,
};

use super::classify_status;

const DEFAULT_BASE_URL: &str = "https://query2.finance.yahoo.com";

pub const PROVIDER_ID: &str = "yahoo_chart";

pub struct YahooChartProvider {
    client: reqwest::Client,
    base_url: String,
}

impl YahooChartProvider {
    pub fn new(base_url: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    fn range_param(period: Period) -> &'static str {
        match period {
            Period::ThreeMonths => "3mo",
            Period::SixMonths => "6mo",
            Period::OneYear => "1y",
        }
    }

    async fn get_chart(
        &self,
        symbol: &str,
        range: &str,
    ) -> Result<serde_json::Value, ScreenerError> {
        let url = format!("{}/v8/finance/chart/{}", self.base_url, symbol);
        let response = self
            .client
            .get(&url)
            .query(&[("range", range), ("interval", "1d")])
            .send()
            .await
            .map_err(|e| ScreenerError::transient(PROVIDER_ID, e.to_string()))?;

        if !response.status().is_success() {
            return Err(classify_status(PROVIDER_ID, response.status()));
        }

        // Blocked scrapers get an HTML consent page with a 200 status.
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|_| ScreenerError::transient(PROVIDER_ID, "non-JSON (HTML-shaped) body"))?;

        if let Some(err) = json
            .get("chart")
            .and_then(|c| c.get("error"))
            .filter(|e| !e.is_null())
        {
            let code = err.get("code").and_then(|c| c.as_str()).unwrap_or("unknown");
            return Err(ScreenerError::permanent(
                PROVIDER_ID,
                format!("chart error: {}", code),
            ));
        }

        json.get("chart")
            .and_then(|c| c.get("result"))
            .and_then(|r| r.as_array())
            .and_then(|arr| arr.first())
            .cloned()
            .ok_or_else(|| ScreenerError::transient(PROVIDER_ID, "empty chart result"))
    }

    fn parse_bars(result: &serde_json::Value) -> Vec<Bar> {
        let timestamps = result
            .get("timestamp")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let quote = result
            .get("indicators")
            .and_then(|v| v.get("quote"))
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .cloned()
            .unwrap_or_default();

        let adjclose = result
            .get("indicators")
            .and_then(|v| v.get("adjclose"))
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .and_then(|v| v.get("adjclose"))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let field = |name: &str| -> Vec<serde_json::Value> {
            quote
                .get(name)
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default()
        };

        let opens = field("open");
        let highs = field("high");
        let lows = field("low");
        let closes = field("close");
        let volumes = field("volume");

        let mut bars = Vec::with_capacity(timestamps.len());
        for i in 0..timestamps.len() {
            let ts = timestamps[i].as_i64();
            let open = opens.get(i).and_then(|v| v.as_f64());
            let high = highs.get(i).and_then(|v| v.as_f64());
            let low = lows.get(i).and_then(|v| v.as_f64());
            let close = closes.get(i).and_then(|v| v.as_f64());

            // Rows with missing OHLC are halted sessions; skip them.
            // Missing volume is normal for indices and becomes NaN, never 0.
            if let (Some(ts), Some(open), Some(high), Some(low), Some(close)) =
                (ts, open, high, low, close)
            {
                if let Some(timestamp) = DateTime::<Utc>::from_timestamp(ts, 0) {
                    bars.push(Bar {
                        timestamp,
                        open,
                        high,
                        low,
                        close,
                        adjusted_close: adjclose.get(i).and_then(|v| v.as_f64()),
                        volume: volumes
                            .get(i)
                            .and_then(|v| v.as_f64())
                            .unwrap_or(f64::NAN),
                    });
                }
            }
        }
        bars
    }
}

#[async_trait]
impl MarketDataProvider for YahooChartProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            ohlcv: true,
            quote: true,
            indices: true,
        }
    }

    async fn fetch_ohlcv(&self, symbol: &str, period: Period) -> Result<PriceSeries, ScreenerError> {
        let result = self.get_chart(symbol, Self::range_param(period)).await?;
        let bars = Self::parse_bars(&result);
        if bars.is_empty() {
            return Err(ScreenerError::transient(PROVIDER_ID, "no bars in window"));
        }
        PriceSeries::new(symbol, period, bars, PROVIDER_ID)
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, ScreenerError> {
        let result = self.get_chart(symbol, "5d").await?;
        let meta = result
            .get("meta")
            .cloned()
            .ok_or_else(|| ScreenerError::transient(PROVIDER_ID, "missing chart meta"))?;

        let price = meta
            .get("regularMarketPrice")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| ScreenerError::transient(PROVIDER_ID, "missing market price"))?;

        let prev_close = meta
            .get("chartPreviousClose")
            .or_else(|| meta.get("previousClose"))
            .and_then(|v| v.as_f64())
            .unwrap_or(price);

        let bars = Self::parse_bars(&result);
        let volume = bars.last().map(|b| b.volume).filter(|v| v.is_finite());

        Ok(Quote {
            symbol: symbol.to_string(),
            price,
            prev_close,
            volume,
            asof: Utc::now(),
        })
    }
}
