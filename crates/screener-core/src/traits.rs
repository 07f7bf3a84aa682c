use async_trait::async_trait;

use crate::error::ScreenerError;
use crate::types::{AggregateSentiment, Period, PriceSeries, Quote};

/// What a single upstream provider can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderCapabilities {
    pub ohlcv: bool,
    pub quote: bool,
    /// Whether caret-prefixed index symbols are supported.
    pub indices: bool,
}

/// One upstream data provider. The fetcher holds providers as an ordered
/// list and walks them until one returns a non-empty, schema-valid result.
/// Only time-series endpoints are ever invoked; HTML-metadata endpoints
/// (company name, market cap, beta, PE) are off limits.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn id(&self) -> &str;

    fn capabilities(&self) -> ProviderCapabilities;

    async fn fetch_ohlcv(&self, symbol: &str, period: Period) -> Result<PriceSeries, ScreenerError>;

    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, ScreenerError>;
}

/// Provider-agnostic bar/quote access, as consumed by the scanner, gap
/// monitor and ensemble predictor. Implemented by the failover fetcher;
/// tests substitute fixtures.
#[async_trait]
pub trait BarFeed: Send + Sync {
    async fn ohlcv(&self, symbol: &str, period: Period) -> Result<PriceSeries, ScreenerError>;

    async fn quote(&self, symbol: &str) -> Result<Quote, ScreenerError>;
}

/// Per-symbol aggregated news sentiment, as consumed by the ensemble.
#[async_trait]
pub trait SentimentFeed: Send + Sync {
    async fn aggregate_sentiment(&self, symbol: &str) -> Result<AggregateSentiment, ScreenerError>;
}
