//! Index/gap monitor: aggregate overnight US closes and local index
//! history into an opening-gap prediction, a 0-100 market sentiment score
//! and its band. A provider failure for any single index degrades the
//! prediction's confidence; it never aborts the snapshot.

pub mod window;

pub use window::window_open;

use chrono::Utc;
use chrono_tz::Tz;
use futures_util::future::join_all;
use std::sync::Arc;

use screener_core::{
    BarFeed, GapConfig, IndexMove, LocalIndexStats, MarketSnapshot, Period, PriceSeries,
    RegimeLabel, SentimentBand,
};

/// Score weights: US overnight average, predicted gap, US agreement,
/// local 7/14-day momentum blend, confidence baseline.
const W_US: f64 = 0.30;
const W_GAP: f64 = 0.25;
const W_AGREE: f64 = 0.15;
const W_LOCAL: f64 = 0.20;
const W_CONF: f64 = 0.10;

pub struct GapMonitor {
    feed: Arc<dyn BarFeed>,
    config: GapConfig,
    local_index: String,
}

impl GapMonitor {
    pub fn new(feed: Arc<dyn BarFeed>, config: GapConfig, local_index: String) -> Self {
        Self {
            feed,
            config,
            local_index,
        }
    }

    /// Build the market snapshot. The regime assessment is supplied by the
    /// caller; this component contributes the gap and bias pieces.
    pub async fn build_snapshot(&self, regime: RegimeLabel, crash_risk: f64) -> MarketSnapshot {
        let mut symbols = vec![self.local_index.clone()];
        symbols.extend(self.config.us_indices.iter().cloned());

        let results = join_all(
            symbols
                .iter()
                .map(|s| self.feed.ohlcv(s, Period::SixMonths)),
        )
        .await;

        let mut fetched: Vec<Option<PriceSeries>> = Vec::with_capacity(results.len());
        let mut degraded = false;
        for (symbol, result) in symbols.iter().zip(results) {
            match result {
                Ok(series) => fetched.push(Some(series)),
                Err(e) => {
                    tracing::warn!("index fetch failed for {}: {}", symbol, e);
                    degraded = true;
                    fetched.push(None);
                }
            }
        }

        let local_index = fetched[0].as_ref().and_then(local_stats);

        let us_indices: Vec<IndexMove> = self
            .config
            .us_indices
            .iter()
            .zip(fetched[1..].iter())
            .filter_map(|(symbol, series)| {
                let series = series.as_ref()?;
                let closes = series.closes();
                let n = closes.len();
                if n < 2 {
                    return None;
                }
                Some(IndexMove {
                    symbol: symbol.clone(),
                    name: index_name(symbol).to_string(),
                    last_close: closes[n - 1],
                    change_1d_pct: pct_change(closes[n - 2], closes[n - 1]),
                })
            })
            .collect();

        let changes: Vec<f64> = us_indices.iter().map(|m| m.change_1d_pct).collect();
        let weighted_us_change = self.weighted_us_change(&changes);
        let predicted_gap_pct = weighted_us_change * self.config.correlation;

        let expected = self.config.us_indices.len();
        let agreement = sign_agreement(&changes);
        let gap_confidence = gap_confidence(&changes, expected);

        let local_momentum = local_index
            .as_ref()
            .map(|l| 0.6 * l.pct_7d + 0.4 * l.pct_14d)
            .unwrap_or(0.0);

        let us_avg = if changes.is_empty() {
            0.0
        } else {
            changes.iter().sum::<f64>() / changes.len() as f64
        };

        let market_score = market_score(
            us_avg,
            predicted_gap_pct,
            agreement,
            local_momentum,
            gap_confidence,
        );
        let band = band_for(market_score, gap_confidence);

        MarketSnapshot {
            asof: Utc::now(),
            local_index,
            us_indices,
            predicted_gap_pct,
            gap_confidence,
            market_score,
            band,
            regime,
            crash_risk,
            degraded,
        }
    }

    /// Weight the prior-close US returns; equal weights when the config
    /// list is absent or mismatched. The correlation scalar is applied
    /// exactly once, by the caller.
    fn weighted_us_change(&self, changes: &[f64]) -> f64 {
        if changes.is_empty() {
            return 0.0;
        }
        let weights: Vec<f64> = if self.config.us_weights.len() == changes.len() {
            self.config.us_weights.clone()
        } else {
            vec![1.0; changes.len()]
        };
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return 0.0;
        }
        changes
            .iter()
            .zip(&weights)
            .map(|(c, w)| c * w)
            .sum::<f64>()
            / total
    }

    /// Whether the SPI/futures window is currently open in exchange-local
    /// time.
    pub fn is_futures_window_open(&self) -> bool {
        let tz: Tz = self
            .config
            .exchange_timezone
            .parse()
            .unwrap_or(chrono_tz::Australia::Sydney);
        let now = Utc::now().with_timezone(&tz);
        use chrono::Timelike;
        window_open(now.hour(), now.minute())
    }
}

fn index_name(symbol: &str) -> &'static str {
    match symbol {
        "^GSPC" => "S&P 500",
        "^IXIC" => "Nasdaq Composite",
        "^DJI" => "Dow Jones Industrial Average",
        "^AXJO" => "S&P/ASX 200",
        _ => "Index",
    }
}

fn pct_change(from: f64, to: f64) -> f64 {
    if from.is_finite() && to.is_finite() && from != 0.0 {
        (to - from) / from * 100.0
    } else {
        0.0
    }
}

/// Changes of the local index over 1/5/7/14 sessions.
fn local_stats(series: &PriceSeries) -> Option<LocalIndexStats> {
    let closes = series.closes();
    let n = closes.len();
    let last = *closes.last()?;

    let pct_back = |sessions: usize| -> f64 {
        if n > sessions {
            pct_change(closes[n - 1 - sessions], last)
        } else {
            0.0
        }
    };

    Some(LocalIndexStats {
        last,
        pct_1d: pct_back(1),
        pct_5d: pct_back(5),
        pct_7d: pct_back(7),
        pct_14d: pct_back(14),
    })
}

/// Fraction of available US indices agreeing on direction.
fn sign_agreement(changes: &[f64]) -> f64 {
    if changes.is_empty() {
        return 0.0;
    }
    let pos = changes.iter().filter(|c| **c > 0.0).count();
    let neg = changes.iter().filter(|c| **c < 0.0).count();
    pos.max(neg) as f64 / changes.len() as f64
}

/// 0-100 confidence in the gap prediction: rises with sign-concordance,
/// falls when indices disagree or are missing.
pub fn gap_confidence(changes: &[f64], expected: usize) -> f64 {
    if changes.is_empty() || expected == 0 {
        return 0.0;
    }
    let agreement = sign_agreement(changes);
    let coverage = changes.len() as f64 / expected as f64;
    (30.0 + 50.0 * agreement + 20.0 * coverage).clamp(0.0, 100.0)
}

/// Compose the 0-100 market sentiment score.
pub fn market_score(
    us_avg_pct: f64,
    gap_pct: f64,
    agreement: f64,
    local_momentum_pct: f64,
    confidence: f64,
) -> f64 {
    let us_comp = (50.0 + 20.0 * us_avg_pct).clamp(0.0, 100.0);
    let gap_comp = (50.0 + 40.0 * gap_pct).clamp(0.0, 100.0);
    let agree_comp = (100.0 * agreement).clamp(0.0, 100.0);
    let local_comp = (50.0 + 10.0 * local_momentum_pct).clamp(0.0, 100.0);
    let conf_comp = confidence.clamp(0.0, 100.0);

    (W_US * us_comp + W_GAP * gap_comp + W_AGREE * agree_comp + W_LOCAL * local_comp
        + W_CONF * conf_comp)
        .clamp(0.0, 100.0)
}

/// Band table, inclusive and non-overlapping:
/// score >= 70 & conf >= 70 -> STRONG_BUY; >= 60 -> BUY; 45..=55 ->
/// NEUTRAL; (55, 60) or (40, 45) -> HOLD; <= 40 -> SELL; <= 30 & conf >=
/// 70 -> STRONG_SELL.
pub fn band_for(score: f64, confidence: f64) -> SentimentBand {
    if score <= 30.0 && confidence >= 70.0 {
        SentimentBand::StrongSell
    } else if score <= 40.0 {
        SentimentBand::Sell
    } else if score < 45.0 {
        SentimentBand::Hold
    } else if score <= 55.0 {
        SentimentBand::Neutral
    } else if score < 60.0 {
        SentimentBand::Hold
    } else if score >= 70.0 && confidence >= 70.0 {
        SentimentBand::StrongBuy
    } else {
        SentimentBand::Buy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use screener_core::{Bar, Quote, ScreenerError};
    use std::collections::HashMap;

    struct FixtureFeed {
        series: HashMap<String, Vec<f64>>,
        fail: Vec<String>,
    }

    impl FixtureFeed {
        fn new() -> Self {
            Self {
                series: HashMap::new(),
                fail: Vec::new(),
            }
        }

        fn with_closes(mut self, symbol: &str, closes: Vec<f64>) -> Self {
            self.series.insert(symbol.to_string(), closes);
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
            let closes = self
                .series
                .get(symbol)
                .cloned()
                .ok_or_else(|| ScreenerError::ProviderExhausted {
                    symbol: symbol.to_string(),
                })?;
            let bars = closes
                .iter()
                .enumerate()
                .map(|(i, c)| Bar {
                    timestamp: Utc.timestamp_opt(1_700_000_000 + i as i64 * 86_400, 0).unwrap(),
                    open: *c,
                    high: *c,
                    low: *c,
                    close: *c,
                    adjusted_close: None,
                    volume: f64::NAN,
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

    fn monitor(feed: FixtureFeed) -> GapMonitor {
        GapMonitor::new(
            Arc::new(feed),
            GapConfig::default(),
            "^AXJO".to_string(),
        )
    }

    /// n closes ending with a final-session move of `last_move_pct`.
    fn closes_with_final_move(n: usize, last_move_pct: f64) -> Vec<f64> {
        let mut closes = vec![100.0; n - 1];
        closes.push(100.0 * (1.0 + last_move_pct / 100.0));
        closes
    }

    #[tokio::test]
    async fn bullish_us_overnight_predicts_positive_gap() {
        // The S1 setup: all three US indices +0.5%.
        let feed = FixtureFeed::new()
            .with_closes("^AXJO", vec![8000.0; 30])
            .with_closes("^GSPC", closes_with_final_move(30, 0.5))
            .with_closes("^IXIC", closes_with_final_move(30, 0.5))
            .with_closes("^DJI", closes_with_final_move(30, 0.5));

        let snapshot = monitor(feed)
            .build_snapshot(RegimeLabel::Normal, 0.1)
            .await;

        assert_relative_eq!(snapshot.predicted_gap_pct, 0.325, epsilon = 1e-9);
        assert!(!snapshot.degraded);
        assert_eq!(snapshot.us_indices.len(), 3);
        assert_eq!(snapshot.gap_confidence, 100.0);
        assert!(matches!(
            snapshot.band,
            SentimentBand::Buy | SentimentBand::StrongBuy
        ));
    }

    #[tokio::test]
    async fn single_index_failure_degrades_but_does_not_abort() {
        let feed = FixtureFeed::new()
            .with_closes("^AXJO", vec![8000.0; 30])
            .with_closes("^GSPC", closes_with_final_move(30, 0.5))
            .with_closes("^IXIC", closes_with_final_move(30, 0.5))
            .failing("^DJI");

        let snapshot = monitor(feed)
            .build_snapshot(RegimeLabel::Normal, 0.1)
            .await;

        assert!(snapshot.degraded);
        assert_eq!(snapshot.us_indices.len(), 2);
        assert!(snapshot.gap_confidence < 100.0);
        assert!(snapshot.predicted_gap_pct > 0.0);
    }

    #[tokio::test]
    async fn all_us_indices_failing_yields_neutral_gap() {
        let feed = FixtureFeed::new()
            .with_closes("^AXJO", vec![8000.0; 30])
            .failing("^GSPC")
            .failing("^IXIC")
            .failing("^DJI");

        let snapshot = monitor(feed)
            .build_snapshot(RegimeLabel::Normal, 0.1)
            .await;

        assert!(snapshot.degraded);
        assert_eq!(snapshot.predicted_gap_pct, 0.0);
        assert_eq!(snapshot.gap_confidence, 0.0);
    }

    #[test]
    fn confidence_falls_when_signs_disagree() {
        let agree = gap_confidence(&[0.5, 0.4, 0.6], 3);
        let disagree = gap_confidence(&[0.5, -0.4, 0.6], 3);
        assert!(agree > disagree);
        assert_relative_eq!(agree, 100.0, epsilon = 1e-9);
    }

    #[test]
    fn band_boundaries_are_inclusive_and_non_overlapping() {
        assert_eq!(band_for(70.0, 70.0), SentimentBand::StrongBuy);
        assert_eq!(band_for(70.0, 60.0), SentimentBand::Buy);
        assert_eq!(band_for(60.0, 50.0), SentimentBand::Buy);
        assert_eq!(band_for(57.0, 50.0), SentimentBand::Hold);
        assert_eq!(band_for(55.0, 50.0), SentimentBand::Neutral);
        assert_eq!(band_for(45.0, 50.0), SentimentBand::Neutral);
        assert_eq!(band_for(44.0, 50.0), SentimentBand::Hold);
        assert_eq!(band_for(40.0, 50.0), SentimentBand::Sell);
        assert_eq!(band_for(35.0, 90.0), SentimentBand::Sell);
        assert_eq!(band_for(30.0, 70.0), SentimentBand::StrongSell);
        assert_eq!(band_for(30.0, 60.0), SentimentBand::Sell);
    }

    #[test]
    fn local_momentum_blend_feeds_score() {
        let flat = market_score(0.0, 0.0, 0.0, 0.0, 50.0);
        let bullish = market_score(0.0, 0.0, 0.0, 2.0, 50.0);
        assert!(bullish > flat);
        assert_relative_eq!(bullish - flat, W_LOCAL * 20.0, epsilon = 1e-9);
    }
}
