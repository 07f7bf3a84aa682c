//! Stock scanner: validate each candidate against price/liquidity gates
//! and score it 0-100 from liquidity, momentum, RSI, volatility and volume
//! consistency. A fetch failure for one symbol drops that symbol, never
//! the sector.

pub mod indicators;

#[cfg(test)]
#[path = "indicators_tests.rs"]
mod indicators_tests;

use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

use indicators::{finite_mean, realized_vol, rsi, sma, volume_consistency};
use screener_core::{
    is_index_symbol, BarFeed, Period, ScanResult, ScannerConfig, ScreenerError,
};

/// Bars needed for the 50-day average plus headroom for RSI.
const MIN_BARS: usize = 51;
/// Sub-score weight; five sub-scores of 20 points each.
const SUB_SCORE_MAX: f64 = 20.0;

/// One sector's scan outcome.
#[derive(Debug, Clone)]
pub struct SectorScan {
    pub sector: String,
    /// Valid results, top N by score, deterministic order.
    pub results: Vec<ScanResult>,
    /// Candidates that failed validation, with reasons.
    pub rejected: Vec<ScanResult>,
    /// Symbols dropped on fetch errors: (symbol, error).
    pub errors: Vec<(String, String)>,
}

pub struct StockScanner {
    feed: Arc<dyn BarFeed>,
    config: ScannerConfig,
}

impl StockScanner {
    pub fn new(feed: Arc<dyn BarFeed>, config: ScannerConfig) -> Self {
        Self { feed, config }
    }

    /// Scan a sector's symbols with a bounded worker pool. The cancel flag
    /// is checked before each worker pickup: in-flight symbols finish, no
    /// new symbol starts.
    pub async fn scan_sector(
        &self,
        sector: &str,
        symbols: &[String],
        top_n: usize,
        workers: usize,
        cancel: &watch::Receiver<bool>,
    ) -> SectorScan {
        let semaphore = Arc::new(Semaphore::new(workers.max(1)));
        let mut tasks: JoinSet<(String, Result<ScanResult, ScreenerError>)> = JoinSet::new();

        for symbol in symbols {
            if *cancel.borrow() {
                tracing::info!("scan of {} stopping early: cancelled", sector);
                break;
            }
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            let feed = Arc::clone(&self.feed);
            let config = self.config.clone();
            let symbol = symbol.clone();
            let sector = sector.to_string();
            tasks.spawn(async move {
                let _permit = permit;
                let result = scan_symbol(feed.as_ref(), &config, &sector, &symbol).await;
                (symbol, result)
            });
        }

        let mut results = Vec::new();
        let mut rejected = Vec::new();
        let mut errors = Vec::new();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(scan))) if scan.valid => results.push(scan),
                Ok((_, Ok(scan))) => rejected.push(scan),
                Ok((symbol, Err(e))) => {
                    tracing::warn!("{}: dropped from scan: {}", symbol, e);
                    errors.push((symbol, e.to_string()));
                }
                Err(e) => {
                    tracing::error!("scan task panicked: {}", e);
                }
            }
        }

        // Deterministic order before the top-N cut.
        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        results.truncate(top_n);
        rejected.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        errors.sort();

        SectorScan {
            sector: sector.to_string(),
            results,
            rejected,
            errors,
        }
    }
}

/// Fetch, validate and score a single symbol.
pub async fn scan_symbol(
    feed: &dyn BarFeed,
    config: &ScannerConfig,
    sector: &str,
    symbol: &str,
) -> Result<ScanResult, ScreenerError> {
    let series = feed.ohlcv(symbol, Period::ThreeMonths).await?;
    let closes = series.closes();
    let volumes = series.volumes();

    let mut reasons = Vec::new();

    if closes.len() < MIN_BARS {
        return Ok(ScanResult {
            symbol: symbol.to_string(),
            sector: sector.to_string(),
            price: closes.last().copied().unwrap_or(0.0),
            avg_volume: 0.0,
            rsi14: 0.0,
            ma20: 0.0,
            ma50: 0.0,
            volatility20: 0.0,
            volume_consistency: 0.0,
            score: 0.0,
            valid: false,
            reasons: vec![format!(
                "insufficient history: {} bars (need {})",
                closes.len(),
                MIN_BARS
            )],
        });
    }

    let price = *closes.last().unwrap();
    let is_index = is_index_symbol(symbol);

    // Indices legitimately report no volume; never treat that as zero
    // liquidity, and never apply the volume floor to them.
    let vol_tail = &volumes[volumes.len().saturating_sub(20)..];
    let avg_volume = finite_mean(vol_tail);
    let volume_floor = if is_index { 0.0 } else { config.volume_floor };

    if !(price > 0.0) {
        reasons.push(format!("last close {:.2} is not positive", price));
    } else if price < config.price_floor {
        reasons.push(format!(
            "last close {:.2} below floor {:.2}",
            price, config.price_floor
        ));
    }
    if avg_volume < volume_floor {
        reasons.push(format!(
            "avg volume {:.0} below floor {:.0}",
            avg_volume, volume_floor
        ));
    }

    let ma20 = sma(&closes, 20).last().copied().unwrap_or(0.0);
    let ma50 = sma(&closes, 50).last().copied().unwrap_or(0.0);
    let rsi14 = rsi(&closes, 14).last().copied().unwrap_or(50.0);
    let volatility20 = realized_vol(&closes, 20);
    let consistency = volume_consistency(vol_tail);

    let score = composite_score(
        avg_volume,
        config.volume_floor,
        price,
        ma20,
        ma50,
        rsi14,
        volatility20,
        consistency,
    );

    Ok(ScanResult {
        symbol: symbol.to_string(),
        sector: sector.to_string(),
        price,
        avg_volume,
        rsi14,
        ma20,
        ma50,
        volatility20,
        volume_consistency: consistency,
        score,
        valid: reasons.is_empty(),
        reasons,
    })
}

/// Weighted sum of the five 20-point sub-scores. Exactly 0 only when every
/// sub-score is 0; exactly 100 only when all saturate.
#[allow(clippy::too_many_arguments)]
fn composite_score(
    avg_volume: f64,
    volume_midpoint: f64,
    price: f64,
    ma20: f64,
    ma50: f64,
    rsi14: f64,
    volatility20: f64,
    consistency: f64,
) -> f64 {
    let liquidity = SUB_SCORE_MAX * liquidity_factor(avg_volume, volume_midpoint);
    let momentum = SUB_SCORE_MAX * momentum_factor(price, ma20, ma50);
    let rsi_score = SUB_SCORE_MAX * (1.0 - (rsi14 - 55.0).abs() / 55.0).clamp(0.0, 1.0);
    let vol_score = SUB_SCORE_MAX * (1.0 - volatility20 / 0.05).clamp(0.0, 1.0);
    let consistency_score = SUB_SCORE_MAX * consistency.clamp(0.0, 1.0);

    (liquidity + momentum + rsi_score + vol_score + consistency_score).clamp(0.0, 100.0)
}

/// Logistic on mean volume, centered on the configured floor.
fn liquidity_factor(avg_volume: f64, midpoint: f64) -> f64 {
    if avg_volume <= 0.0 {
        return 0.0;
    }
    let midpoint = midpoint.max(1.0);
    let z = (avg_volume / midpoint).ln() / 1.5;
    1.0 / (1.0 + (-z).exp())
}

/// Position of the last close relative to the 20- and 50-day averages.
/// +-5% average displacement saturates the factor.
fn momentum_factor(price: f64, ma20: f64, ma50: f64) -> f64 {
    if price <= 0.0 || ma20 <= 0.0 || ma50 <= 0.0 {
        return 0.0;
    }
    let rel = ((price / ma20 - 1.0) + (price / ma50 - 1.0)) / 2.0;
    (0.5 + rel / 0.10).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use screener_core::{Bar, PriceSeries, Quote};
    use std::collections::HashMap;

    struct FixtureFeed {
        bars: HashMap<String, Vec<(f64, f64)>>, // (close, volume)
        fail: Vec<String>,
    }

    impl FixtureFeed {
        fn new() -> Self {
            Self {
                bars: HashMap::new(),
                fail: Vec::new(),
            }
        }

        fn with(mut self, symbol: &str, bars: Vec<(f64, f64)>) -> Self {
            self.bars.insert(symbol.to_string(), bars);
            self
        }

        fn failing(mut self, symbol: &str) -> Self {
            self.fail.push(symbol.to_string());
            self
        }
    }

    #[async_trait]
    impl BarFeed for FixtureFeed {
        async fn ohlcv(&self, symbol: &str, period: Period) -> Result<PriceSeries, ScreenerError> {
            if self.fail.contains(&symbol.to_string()) {
                return Err(ScreenerError::ProviderExhausted {
                    symbol: symbol.to_string(),
                });
            }
            let rows = self.bars.get(symbol).cloned().ok_or_else(|| {
                ScreenerError::ProviderExhausted {
                    symbol: symbol.to_string(),
                }
            })?;
            let bars = rows
                .iter()
                .enumerate()
                .map(|(i, (close, volume))| Bar {
                    timestamp: Utc.timestamp_opt(1_700_000_000 + i as i64 * 86_400, 0).unwrap(),
                    open: *close,
                    high: close * 1.01,
                    low: close * 0.99,
                    close: *close,
                    adjusted_close: None,
                    volume: *volume,
                })
                .collect();
            PriceSeries::new(symbol, period, bars, "fixture")
        }

        async fn quote(&self, symbol: &str) -> Result<Quote, ScreenerError> {
            Err(ScreenerError::ProviderExhausted {
                symbol: symbol.to_string(),
            })
        }
    }

    fn healthy_bars(n: usize, price: f64, volume: f64) -> Vec<(f64, f64)> {
        (0..n)
            .map(|i| {
                let drift = price * 0.0005 * i as f64;
                let wiggle = price * 0.002 * if i % 2 == 0 { 1.0 } else { -1.0 };
                (price + drift + wiggle, volume)
            })
            .collect()
    }

    fn no_cancel() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[tokio::test]
    async fn healthy_symbol_passes_validation() {
        let feed = FixtureFeed::new().with("CBA.AX", healthy_bars(60, 100.0, 500_000.0));
        let result = scan_symbol(&feed, &ScannerConfig::default(), "Financials", "CBA.AX")
            .await
            .unwrap();

        assert!(result.valid, "reasons: {:?}", result.reasons);
        assert!(result.score > 0.0 && result.score <= 100.0);
        assert!(result.ma20 > 0.0 && result.ma50 > 0.0);
        assert!((0.0..=100.0).contains(&result.rsi14));
    }

    #[tokio::test]
    async fn penny_stock_fails_price_floor() {
        let feed = FixtureFeed::new().with("PNY.AX", healthy_bars(60, 0.50, 500_000.0));
        let result = scan_symbol(&feed, &ScannerConfig::default(), "Spec", "PNY.AX")
            .await
            .unwrap();

        assert!(!result.valid);
        assert!(result.reasons[0].contains("below floor"));
    }

    #[tokio::test]
    async fn illiquid_symbol_fails_volume_floor() {
        let feed = FixtureFeed::new().with("THN.AX", healthy_bars(60, 10.0, 20_000.0));
        let result = scan_symbol(&feed, &ScannerConfig::default(), "Spec", "THN.AX")
            .await
            .unwrap();

        assert!(!result.valid);
        assert!(result.reasons.iter().any(|r| r.contains("avg volume")));
    }

    #[tokio::test]
    async fn index_with_nan_volume_is_valid_with_zero_avg() {
        // The S5 case: ^LOCAL bars arrive with volume = NaN.
        let bars: Vec<(f64, f64)> = healthy_bars(60, 8000.0, 0.0)
            .into_iter()
            .map(|(c, _)| (c, f64::NAN))
            .collect();
        let feed = FixtureFeed::new().with("^AXJO", bars);
        let result = scan_symbol(&feed, &ScannerConfig::default(), "Indices", "^AXJO")
            .await
            .unwrap();

        assert!(result.valid, "reasons: {:?}", result.reasons);
        assert_eq!(result.avg_volume, 0.0);
        assert!(result.score.is_finite());
    }

    #[tokio::test]
    async fn short_history_is_invalid_not_an_error() {
        let feed = FixtureFeed::new().with("NEW.AX", healthy_bars(30, 10.0, 500_000.0));
        let result = scan_symbol(&feed, &ScannerConfig::default(), "Spec", "NEW.AX")
            .await
            .unwrap();

        assert!(!result.valid);
        assert!(result.reasons[0].contains("insufficient history"));
    }

    #[tokio::test]
    async fn fetch_failure_drops_symbol_not_sector() {
        let feed = FixtureFeed::new()
            .with("CBA.AX", healthy_bars(60, 100.0, 500_000.0))
            .with("NAB.AX", healthy_bars(60, 30.0, 400_000.0))
            .failing("ANZ.AX");

        let scanner = StockScanner::new(Arc::new(feed), ScannerConfig::default());
        let symbols: Vec<String> = ["CBA.AX", "NAB.AX", "ANZ.AX"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let scan = scanner
            .scan_sector("Financials", &symbols, 10, 2, &no_cancel())
            .await;

        assert_eq!(scan.results.len(), 2);
        assert_eq!(scan.errors.len(), 1);
        assert_eq!(scan.errors[0].0, "ANZ.AX");
    }

    #[tokio::test]
    async fn top_n_cut_is_deterministic() {
        let mut feed = FixtureFeed::new();
        for (i, symbol) in ["AAA.AX", "BBB.AX", "CCC.AX", "DDD.AX"].iter().enumerate() {
            feed = feed.with(symbol, healthy_bars(60, 50.0 + i as f64, 500_000.0));
        }
        let scanner = StockScanner::new(Arc::new(feed), ScannerConfig::default());
        let symbols: Vec<String> = ["AAA.AX", "BBB.AX", "CCC.AX", "DDD.AX"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let a = scanner
            .scan_sector("Test", &symbols, 2, 4, &no_cancel())
            .await;
        let b = scanner
            .scan_sector("Test", &symbols, 2, 4, &no_cancel())
            .await;

        assert_eq!(a.results.len(), 2);
        let order_a: Vec<&String> = a.results.iter().map(|r| &r.symbol).collect();
        let order_b: Vec<&String> = b.results.iter().map(|r| &r.symbol).collect();
        assert_eq!(order_a, order_b);
    }

    #[tokio::test]
    async fn cancelled_sector_starts_no_new_symbols() {
        let feed = FixtureFeed::new().with("CBA.AX", healthy_bars(60, 100.0, 500_000.0));
        let scanner = StockScanner::new(Arc::new(feed), ScannerConfig::default());
        let (tx, rx) = watch::channel(true);
        let symbols = vec!["CBA.AX".to_string(), "NAB.AX".to_string()];

        let scan = scanner
            .scan_sector("Financials", &symbols, 10, 2, &rx)
            .await;
        drop(tx);

        assert!(scan.results.is_empty());
        assert!(scan.errors.is_empty());
    }

    #[test]
    fn score_saturation_bounds() {
        // Everything at its worst: zero sub-scores.
        let zero = composite_score(0.0, 100_000.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0);
        assert_eq!(zero, 0.0);

        // Everything saturated: RSI at the sweet spot, calm vol, huge
        // steady volume, price far above both averages.
        let full = composite_score(1e9, 100_000.0, 120.0, 100.0, 100.0, 55.0, 0.0, 1.0);
        assert!(full > 99.0, "score {}", full);
    }
}
