//! Provider-failover fetcher: walks the configured providers in order
//! until one returns a non-empty, schema-valid result, pacing every call
//! through a per-provider token bucket and daily cap.

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use screener_core::{
    is_index_symbol, BarFeed, FetcherConfig, MarketDataProvider, Period, PriceSeries, Quote,
    ScreenerError,
};
use serde::Serialize;

use crate::cache::{QuoteCache, SeriesCache};
use crate::pacing::{backoff_delay, jitter, DailyUsage, TokenBucket};
use crate::providers::{AlphaHistoryProvider, QuoteOnlyProvider, YahooChartProvider};

struct ProviderSlot {
    provider: Arc<dyn MarketDataProvider>,
    bucket: TokenBucket,
    usage: DailyUsage,
    calls: AtomicU64,
    failures: AtomicU64,
}

/// Observability snapshot for run state.
#[derive(Debug, Clone, Serialize)]
pub struct FetcherStats {
    pub providers: Vec<ProviderUsage>,
    pub failovers: u64,
    pub ohlcv_cache_hits: u64,
    pub quote_cache_hits: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderUsage {
    pub id: String,
    pub calls: u64,
    pub failures: u64,
    pub calls_today: u32,
}

pub struct DataFetcher {
    slots: Vec<ProviderSlot>,
    series_cache: SeriesCache,
    quote_cache: QuoteCache,
    max_retries: u32,
    failovers: AtomicU64,
}

impl DataFetcher {
    /// Assemble the default provider stack from config. Credentials come
    /// from each provider's `<ID>_API_KEY` environment variable; a missing
    /// key drops that provider from the walk with a warning.
    pub fn from_config(config: &FetcherConfig, cache_root: &Path) -> Result<Self, ScreenerError> {
        let timeout = Duration::from_secs(config.http_timeout_seconds);
        let mut providers: Vec<(Arc<dyn MarketDataProvider>, u32, u32)> = Vec::new();

        for pc in &config.providers {
            let key = std::env::var(pc.api_key_env()).ok();
            let provider: Option<Arc<dyn MarketDataProvider>> = match pc.id.as_str() {
                "yahoo_chart" => Some(Arc::new(YahooChartProvider::new(
                    pc.base_url.clone(),
                    timeout,
                ))),
                "alpha_history" => match key {
                    Some(key) => Some(Arc::new(AlphaHistoryProvider::new(
                        key,
                        pc.base_url.clone(),
                        timeout,
                    ))),
                    None => {
                        tracing::warn!("provider {} skipped: {} not set", pc.id, pc.api_key_env());
                        None
                    }
                },
                "quote_only" => match (key, pc.base_url.clone()) {
                    (Some(key), Some(base)) => {
                        Some(Arc::new(QuoteOnlyProvider::new(key, base, timeout)))
                    }
                    _ => {
                        tracing::warn!("provider {} skipped: needs api key and base_url", pc.id);
                        None
                    }
                },
                other => {
                    return Err(ScreenerError::Config(format!("unknown provider id {}", other)));
                }
            };
            if let Some(p) = provider {
                providers.push((p, pc.calls_per_minute, pc.daily_cap));
            }
        }

        if providers.is_empty() {
            return Err(ScreenerError::Config(
                "no usable providers after credential checks".to_string(),
            ));
        }

        Self::with_providers(providers, config, cache_root)
    }

    /// Build from explicit providers; tests inject stubs here.
    pub fn with_providers(
        providers: Vec<(Arc<dyn MarketDataProvider>, u32, u32)>,
        config: &FetcherConfig,
        cache_root: &Path,
    ) -> Result<Self, ScreenerError> {
        let slots = providers
            .into_iter()
            .map(|(provider, cpm, cap)| ProviderSlot {
                provider,
                bucket: TokenBucket::new(cpm),
                usage: DailyUsage::new(cap),
                calls: AtomicU64::new(0),
                failures: AtomicU64::new(0),
            })
            .collect();

        Ok(Self {
            slots,
            series_cache: SeriesCache::new(cache_root, config.cache_ttl_minutes)?,
            quote_cache: QuoteCache::new(config.quote_ttl_seconds),
            max_retries: config.max_retries.max(1),
            failovers: AtomicU64::new(0),
        })
    }

    pub fn stats(&self) -> FetcherStats {
        FetcherStats {
            providers: self
                .slots
                .iter()
                .map(|s| ProviderUsage {
                    id: s.provider.id().to_string(),
                    calls: s.calls.load(Ordering::Relaxed),
                    failures: s.failures.load(Ordering::Relaxed),
                    calls_today: s.usage.calls_today(),
                })
                .collect(),
            failovers: self.failovers.load(Ordering::Relaxed),
            ohlcv_cache_hits: self.series_cache.hit_count(),
            quote_cache_hits: self.quote_cache.hit_count(),
        }
    }

    pub fn cache_hits(&self) -> u64 {
        self.series_cache.hit_count() + self.quote_cache.hit_count()
    }

    pub fn failover_count(&self) -> u64 {
        self.failovers.load(Ordering::Relaxed)
    }

    async fn fetch_ohlcv_inner(
        &self,
        symbol: &str,
        period: Period,
    ) -> Result<PriceSeries, ScreenerError> {
        let key = SeriesCache::key(symbol, period);
        if let Some(series) = self.series_cache.get(&key) {
            return Ok(series);
        }

        // Single writer per key: concurrent misses collapse into one fetch.
        let lock = self.series_cache.lock_for(&key);
        let _guard = lock.lock().await;
        if let Some(series) = self.series_cache.get(&key) {
            return Ok(series);
        }

        for slot in &self.slots {
            let caps = slot.provider.capabilities();
            if !caps.ohlcv {
                continue;
            }
            if is_index_symbol(symbol) && !caps.indices {
                tracing::debug!("{}: {} does not serve indices", symbol, slot.provider.id());
                continue;
            }
            if slot.usage.near_cap() {
                tracing::warn!(
                    "{}: provider {} near daily cap, failing over",
                    symbol,
                    slot.provider.id()
                );
                continue;
            }

            match self
                .attempt_with_retries(slot, || slot.provider.fetch_ohlcv(symbol, period))
                .await
            {
                Ok(series) if !series.is_empty() => {
                    self.series_cache.put(&key, &series);
                    return Ok(series);
                }
                Ok(_) => {
                    slot.failures.fetch_add(1, Ordering::Relaxed);
                    self.failovers.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("{}: {} returned empty series", symbol, slot.provider.id());
                }
                Err(e) => {
                    slot.failures.fetch_add(1, Ordering::Relaxed);
                    self.failovers.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("{}: provider {} failed: {}", symbol, slot.provider.id(), e);
                }
            }
        }

        Err(ScreenerError::ProviderExhausted {
            symbol: symbol.to_string(),
        })
    }

    async fn fetch_quote_inner(&self, symbol: &str) -> Result<Quote, ScreenerError> {
        if let Some(quote) = self.quote_cache.get(symbol) {
            return Ok(quote);
        }

        for slot in &self.slots {
            let caps = slot.provider.capabilities();
            if !caps.quote {
                continue;
            }
            if is_index_symbol(symbol) && !caps.indices {
                continue;
            }
            if slot.usage.near_cap() {
                continue;
            }

            match self
                .attempt_with_retries(slot, || slot.provider.fetch_quote(symbol))
                .await
            {
                Ok(quote) => {
                    self.quote_cache.put(symbol, &quote);
                    return Ok(quote);
                }
                Err(e) => {
                    slot.failures.fetch_add(1, Ordering::Relaxed);
                    self.failovers.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("{}: provider {} failed: {}", symbol, slot.provider.id(), e);
                }
            }
        }

        Err(ScreenerError::ProviderExhausted {
            symbol: symbol.to_string(),
        })
    }

    /// Retry transient failures against one provider with the backoff
    /// schedule; permanent failures short-circuit to the caller, which
    /// fails over.
    async fn attempt_with_retries<T, F, Fut>(
        &self,
        slot: &ProviderSlot,
        call: F,
    ) -> Result<T, ScreenerError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, ScreenerError>>,
    {
        let mut last_err = None;
        for attempt in 0..self.max_retries {
            slot.bucket.acquire().await;
            slot.usage.record_call();
            slot.calls.fetch_add(1, Ordering::Relaxed);

            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    if attempt + 1 < self.max_retries {
                        let delay = jitter(backoff_delay(attempt));
                        tracing::debug!(
                            "{}: transient failure (attempt {}/{}), backing off {:.1}s: {}",
                            slot.provider.id(),
                            attempt + 1,
                            self.max_retries,
                            delay.as_secs_f64(),
                            e
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            ScreenerError::Internal("retry loop exited without error".to_string())
        }))
    }
}

#[async_trait]
impl BarFeed for DataFetcher {
    async fn ohlcv(&self, symbol: &str, period: Period) -> Result<PriceSeries, ScreenerError> {
        self.fetch_ohlcv_inner(symbol, period).await
    }

    async fn quote(&self, symbol: &str) -> Result<Quote, ScreenerError> {
        self.fetch_quote_inner(symbol).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use screener_core::{Bar, ProviderCapabilities};
    use std::sync::atomic::AtomicU32;

    fn test_config() -> FetcherConfig {
        FetcherConfig {
            providers: Vec::new(),
            cache_ttl_minutes: 240,
            quote_ttl_seconds: 60,
            max_retries: 3,
            http_timeout_seconds: 30,
        }
    }

    enum StubMode {
        Ok,
        Transient,
        Permanent,
    }

    struct StubProvider {
        id: &'static str,
        mode: StubMode,
        indices: bool,
        calls: AtomicU32,
    }

    impl StubProvider {
        fn new(id: &'static str, mode: StubMode) -> Arc<Self> {
            Arc::new(Self {
                id,
                mode,
                indices: true,
                calls: AtomicU32::new(0),
            })
        }

        fn no_indices(id: &'static str, mode: StubMode) -> Arc<Self> {
            Arc::new(Self {
                id,
                mode,
                indices: false,
                calls: AtomicU32::new(0),
            })
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::Relaxed)
        }

        fn series(&self, symbol: &str, period: Period) -> PriceSeries {
            let bars = (1..=60)
                .map(|d| Bar {
                    timestamp: Utc.timestamp_opt(1_720_000_000 + d * 86_400, 0).unwrap(),
                    open: 10.0,
                    high: 11.0,
                    low: 9.0,
                    close: 10.0,
                    adjusted_close: None,
                    volume: 200_000.0,
                })
                .collect();
            PriceSeries::new(symbol, period, bars, self.id).unwrap()
        }
    }

    #[async_trait]
    impl MarketDataProvider for StubProvider {
        fn id(&self) -> &str {
            self.id
        }

        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities {
                ohlcv: true,
                quote: true,
                indices: self.indices,
            }
        }

        async fn fetch_ohlcv(
            &self,
            symbol: &str,
            period: Period,
        ) -> Result<PriceSeries, ScreenerError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            match self.mode {
                StubMode::Ok => Ok(self.series(symbol, period)),
                StubMode::Transient => Err(ScreenerError::transient(self.id, "HTTP 429")),
                StubMode::Permanent => Err(ScreenerError::permanent(self.id, "HTTP 404")),
            }
        }

        async fn fetch_quote(&self, symbol: &str) -> Result<Quote, ScreenerError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            match self.mode {
                StubMode::Ok => Ok(Quote {
                    symbol: symbol.to_string(),
                    price: 10.0,
                    prev_close: 9.9,
                    volume: Some(100.0),
                    asof: Utc::now(),
                }),
                StubMode::Transient => Err(ScreenerError::transient(self.id, "HTTP 503")),
                StubMode::Permanent => Err(ScreenerError::permanent(self.id, "HTTP 403")),
            }
        }
    }

    fn fetcher_with(
        providers: Vec<Arc<StubProvider>>,
        dir: &tempfile::TempDir,
    ) -> DataFetcher {
        let slots = providers
            .into_iter()
            .map(|p| (p as Arc<dyn MarketDataProvider>, 600, 100_000))
            .collect();
        DataFetcher::with_providers(slots, &test_config(), dir.path()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_fails_over_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let bad = StubProvider::new("p1", StubMode::Permanent);
        let good = StubProvider::new("p2", StubMode::Ok);
        let fetcher = fetcher_with(vec![bad.clone(), good.clone()], &dir);

        let series = fetcher.ohlcv("CBA.AX", Period::ThreeMonths).await.unwrap();
        assert_eq!(series.source, "p2");
        assert_eq!(bad.call_count(), 1);
        assert_eq!(good.call_count(), 1);
        assert_eq!(fetcher.failover_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_error_retries_then_fails_over() {
        let dir = tempfile::tempdir().unwrap();
        let flaky = StubProvider::new("p1", StubMode::Transient);
        let good = StubProvider::new("p2", StubMode::Ok);
        let fetcher = fetcher_with(vec![flaky.clone(), good.clone()], &dir);

        let series = fetcher.ohlcv("NAB.AX", Period::ThreeMonths).await.unwrap();
        assert_eq!(series.source, "p2");
        assert_eq!(flaky.call_count(), 3); // max_retries
        assert_eq!(fetcher.failover_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn all_providers_failing_exhausts() {
        let dir = tempfile::tempdir().unwrap();
        let p1 = StubProvider::new("p1", StubMode::Permanent);
        let p2 = StubProvider::new("p2", StubMode::Permanent);
        let fetcher = fetcher_with(vec![p1, p2], &dir);

        let err = fetcher.ohlcv("ANZ.AX", Period::ThreeMonths).await.unwrap_err();
        assert!(matches!(err, ScreenerError::ProviderExhausted { .. }));
        assert_eq!(fetcher.failover_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn second_fetch_within_ttl_hits_cache() {
        let dir = tempfile::tempdir().unwrap();
        let provider = StubProvider::new("p1", StubMode::Ok);
        let fetcher = fetcher_with(vec![provider.clone()], &dir);

        let first = fetcher.ohlcv("WBC.AX", Period::ThreeMonths).await.unwrap();
        let second = fetcher.ohlcv("WBC.AX", Period::ThreeMonths).await.unwrap();

        assert_eq!(provider.call_count(), 1);
        assert_eq!(fetcher.stats().ohlcv_cache_hits, 1);
        assert_eq!(first.closes(), second.closes());
        assert_eq!(first.fetched_at, second.fetched_at);
    }

    #[tokio::test(start_paused = true)]
    async fn index_symbols_skip_non_index_providers() {
        let dir = tempfile::tempdir().unwrap();
        let equities_only = StubProvider::no_indices("p1", StubMode::Ok);
        let full = StubProvider::new("p2", StubMode::Ok);
        let fetcher = fetcher_with(vec![equities_only.clone(), full.clone()], &dir);

        let series = fetcher.ohlcv("^AXJO", Period::SixMonths).await.unwrap();
        assert_eq!(series.source, "p2");
        assert_eq!(equities_only.call_count(), 0);
        // A capability skip is not a failover.
        assert_eq!(fetcher.failover_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn quote_failover_works() {
        let dir = tempfile::tempdir().unwrap();
        let bad = StubProvider::new("p1", StubMode::Permanent);
        let good = StubProvider::new("p2", StubMode::Ok);
        let fetcher = fetcher_with(vec![bad, good], &dir);

        let quote = fetcher.quote("MQG.AX").await.unwrap();
        assert_eq!(quote.price, 10.0);

        // Second call within the 60s TTL is served from cache.
        let _ = fetcher.quote("MQG.AX").await.unwrap();
        assert_eq!(fetcher.stats().quote_cache_hits, 1);
    }
}
