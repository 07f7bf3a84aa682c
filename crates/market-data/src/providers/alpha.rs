//! Secondary tabular-history provider, Alpha-Vantage shaped: API-key
//! authenticated, daily adjusted time series keyed by date strings.
//! Silent symbol remapping is forbidden: the metadata echo must match the
//! requested symbol exactly or the provider fails over.

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use std::time::Duration;

use screener_core::{
    Bar, MarketDataProvider, Period, PriceSeries, ProviderCapabilities, Quote, ScreenerError,
};

use super::classify_status;

const DEFAULT_BASE_URL: &str = "https://www.alphavantage.co";

pub const PROVIDER_ID: &str = "alpha_history";

pub struct AlphaHistoryProvider {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
}

impl AlphaHistoryProvider {
    pub fn new(api_key: String, base_url: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_key,
            client,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    async fn query(&self, params: &[(&str, &str)]) -> Result<serde_json::Value, ScreenerError> {
        let url = format!("{}/query", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(params)
            .query(&[("apikey", self.api_key.as_str())])
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

        // Quota exhaustion arrives as HTTP 200 with a "Note" field.
        if let Some(note) = json.get("Note").and_then(|v| v.as_str()) {
            return Err(ScreenerError::transient(
                PROVIDER_ID,
                format!("rate limited: {}", note),
            ));
        }
        if let Some(msg) = json.get("Error Message").and_then(|v| v.as_str()) {
            return Err(ScreenerError::permanent(PROVIDER_ID, msg.to_string()));
        }

        Ok(json)
    }

    fn check_symbol_echo(
        requested: &str,
        json: &serde_json::Value,
    ) -> Result<(), ScreenerError> {
        let echoed = json
            .get("Meta Data")
            .and_then(|m| m.get("2. Symbol"))
            .and_then(|v| v.as_str());

        match echoed {
            Some(echo) if echo.eq_ignore_ascii_case(requested) => Ok(()),
            Some(echo) => Err(ScreenerError::permanent(
                PROVIDER_ID,
                format!("symbol remapped: requested {}, served {}", requested, echo),
            )),
            None => Err(ScreenerError::transient(PROVIDER_ID, "missing metadata echo")),
        }
    }

    fn parse_daily_series(
        symbol: &str,
        period: Period,
        json: &serde_json::Value,
    ) -> Result<PriceSeries, ScreenerError> {
        let series = json
            .get("Time Series (Daily)")
            .and_then(|v| v.as_object())
            .ok_or_else(|| ScreenerError::transient(PROVIDER_ID, "no daily time series"))?;

        let cutoff = Utc::now().date_naive() - chrono::Duration::days(period.days());
        let field = |row: &serde_json::Value, name: &str| -> Option<f64> {
            row.get(name).and_then(|v| v.as_str()).and_then(|s| s.parse().ok())
        };

        let mut bars = Vec::new();
        for (date_str, row) in series {
            let Ok(date) = NaiveDate::parse_from_str(date_str, "%Y-%m-%d") else {
                continue;
            };
            if date < cutoff {
                continue;
            }
            let (Some(open), Some(high), Some(low), Some(close)) = (
                field(row, "1. open"),
                field(row, "2. high"),
                field(row, "3. low"),
                field(row, "4. close"),
            ) else {
                continue;
            };
            bars.push(Bar {
                timestamp: Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap()),
                open,
                high,
                low,
                close,
                adjusted_close: field(row, "5. adjusted close"),
                volume: field(row, "6. volume")
                    .or_else(|| field(row, "5. volume"))
                    .unwrap_or(f64::NAN),
            });
        }

        if bars.is_empty() {
            return Err(ScreenerError::transient(PROVIDER_ID, "no bars in window"));
        }
        PriceSeries::new(symbol, period, bars, PROVIDER_ID)
    }
}

#[async_trait]
impl MarketDataProvider for AlphaHistoryProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            ohlcv: true,
            quote: true,
            indices: false,
        }
    }

    async fn fetch_ohlcv(&self, symbol: &str, period: Period) -> Result<PriceSeries, ScreenerError> {
        let outputsize = match period {
            Period::ThreeMonths => "compact",
            Period::SixMonths | Period::OneYear => "full",
        };
        let json = self
            .query(&[
                ("function", "TIME_SERIES_DAILY_ADJUSTED"),
                ("symbol", symbol),
                ("outputsize", outputsize),
            ])
            .await?;

        Self::check_symbol_echo(symbol, &json)?;
        Self::parse_daily_series(symbol, period, &json)
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, ScreenerError> {
        let json = self
            .query(&[("function", "GLOBAL_QUOTE"), ("symbol", symbol)])
            .await?;

        let quote = json
            .get("Global Quote")
            .and_then(|v| v.as_object())
            .ok_or_else(|| ScreenerError::transient(PROVIDER_ID, "no global quote"))?;

        let echoed = quote.get("01. symbol").and_then(|v| v.as_str()).unwrap_or("");
        if !echoed.eq_ignore_ascii_case(symbol) {
            return Err(ScreenerError::permanent(
                PROVIDER_ID,
                format!("symbol remapped: requested {}, served {}", symbol, echoed),
            ));
        }

        let field = |name: &str| -> Option<f64> {
            quote.get(name).and_then(|v| v.as_str()).and_then(|s| s.parse().ok())
        };

        let price = field("05. price")
            .ok_or_else(|| ScreenerError::transient(PROVIDER_ID, "missing price"))?;

        Ok(Quote {
            symbol: symbol.to_string(),
            price,
            prev_close: field("08. previous close").unwrap_or(price),
            volume: field("06. volume"),
            asof: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_remapped_symbol() {
        // The attested failure mode: CBA.AX silently served as US CBA.
        let json = json!({ "Meta Data": { "2. Symbol": "CBA" } });
        let err = AlphaHistoryProvider::check_symbol_echo("CBA.AX", &json).unwrap_err();
        assert!(matches!(err, ScreenerError::ProviderPermanent { .. }));
    }

    #[test]
    fn accepts_exact_echo_case_insensitive() {
        let json = json!({ "Meta Data": { "2. Symbol": "cba.ax" } });
        assert!(AlphaHistoryProvider::check_symbol_echo("CBA.AX", &json).is_ok());
    }

    #[test]
    fn parses_daily_rows_inside_window() {
        let today = Utc::now().date_naive();
        let recent = (today - chrono::Duration::days(3)).format("%Y-%m-%d").to_string();
        let ancient = "2010-01-04";
        let row = json!({
            "1. open": "100.0", "2. high": "101.0", "3. low": "99.0",
            "4. close": "100.5", "5. adjusted close": "100.5", "6. volume": "250000"
        });
        let json = json!({
            "Meta Data": { "2. Symbol": "CBA.AX" },
            "Time Series (Daily)": { recent: row.clone(), ancient: row }
        });

        let series =
            AlphaHistoryProvider::parse_daily_series("CBA.AX", Period::ThreeMonths, &json).unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series.bars[0].volume, 250000.0);
    }
}
