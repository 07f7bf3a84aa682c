//! Trend and technical ensemble components, plus the LSTM feature
//! builder. Each returns `(direction, confidence)` in [-1,1] x [0,1].

use screener_core::PriceSeries;
use stock_scanner::indicators::{finite_or, macd, rsi, sma};

use crate::model::INPUT_WINDOW;

/// Features per session fed to the LSTM surrogate: daily return,
/// intraday range, displacement from SMA20, volume ratio vs 20-day mean.
pub const N_FEATURES: usize = 4;

/// Build the `[60, 4]` feature window from a price series. None when the
/// series is too short.
pub fn build_features(series: &PriceSeries) -> Option<Vec<Vec<f64>>> {
    let bars = &series.bars;
    if bars.len() < INPUT_WINDOW + 20 {
        return None;
    }

    let closes = series.closes();
    let sma20 = sma(&closes, 20);
    let volumes = series.volumes();

    let mut rows = Vec::with_capacity(INPUT_WINDOW);
    let start = bars.len() - INPUT_WINDOW;
    for i in start..bars.len() {
        let bar = &bars[i];
        let prev_close = bars[i - 1].close;
        let ret = if prev_close > 0.0 {
            finite_or(bar.close / prev_close - 1.0, 0.0)
        } else {
            0.0
        };
        let range = if bar.close > 0.0 {
            finite_or((bar.high - bar.low) / bar.close, 0.0)
        } else {
            0.0
        };
        // sma20[k] covers closes[k..k+20]; the window ending at i is k = i-19.
        let ma = sma20.get(i + 1 - 20).copied().unwrap_or(bar.close);
        let displacement = if ma > 0.0 {
            finite_or(bar.close / ma - 1.0, 0.0)
        } else {
            0.0
        };
        let vol_window = &volumes[i.saturating_sub(19)..=i];
        let vol_mean = stock_scanner::indicators::finite_mean(vol_window);
        let vol_ratio = if vol_mean > 0.0 {
            finite_or(bar.volume / vol_mean - 1.0, 0.0)
        } else {
            0.0
        };

        rows.push(vec![ret, range, displacement, vol_ratio]);
    }
    Some(rows)
}

/// Trend: sign of SMA20 - SMA50 scaled by the gap as a fraction of price;
/// confidence from the separation relative to the rolling dispersion.
pub fn trend_component(closes: &[f64]) -> Option<(f64, f64)> {
    if closes.len() < 50 {
        return None;
    }
    let ma20 = *sma(closes, 20).last()?;
    let ma50 = *sma(closes, 50).last()?;
    let price = *closes.last()?;
    if price <= 0.0 || ma20 <= 0.0 || ma50 <= 0.0 {
        return None;
    }

    let gap_fraction = (ma20 - ma50) / price;
    // A 5% separation between the averages saturates the direction.
    let direction = (gap_fraction / 0.05).clamp(-1.0, 1.0);

    let tail = &closes[closes.len() - 20..];
    let mean = tail.iter().sum::<f64>() / tail.len() as f64;
    let std = (tail.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / tail.len() as f64).sqrt();
    let separation = (ma20 - ma50).abs();
    let confidence = if std > 0.0 {
        (separation / (2.0 * std)).clamp(0.05, 0.95)
    } else if separation > 0.0 {
        0.95
    } else {
        0.05
    };

    Some((direction, confidence))
}

/// Technical: RSI centering blended with the MACD histogram sign;
/// confidence rises when the two indicators agree.
pub fn technical_component(closes: &[f64]) -> Option<(f64, f64)> {
    if closes.len() < 40 {
        return None;
    }
    let rsi14 = *rsi(closes, 14).last()?;
    let price = *closes.last()?;
    if price <= 0.0 {
        return None;
    }

    let rsi_centered = ((rsi14 - 50.0) / 50.0).clamp(-1.0, 1.0);

    let macd_result = macd(closes, 12, 26, 9);
    let hist = macd_result.histogram.last().copied().unwrap_or(0.0);
    // Normalize the histogram by price; 1% of price saturates.
    let macd_direction = (hist / (0.01 * price)).clamp(-1.0, 1.0);

    let direction = (0.6 * rsi_centered + 0.4 * macd_direction).clamp(-1.0, 1.0);

    let agree = rsi_centered * macd_direction > 0.0;
    let magnitude = (rsi_centered.abs() + macd_direction.abs()) / 2.0;
    let confidence = if agree {
        (0.5 + 0.4 * magnitude).clamp(0.0, 0.9)
    } else {
        0.3
    };

    Some((direction, confidence))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use screener_core::{Bar, Period};

    fn series_from_closes(closes: &[f64]) -> PriceSeries {
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, c)| Bar {
                timestamp: Utc.timestamp_opt(1_700_000_000 + i as i64 * 86_400, 0).unwrap(),
                open: *c,
                high: c * 1.01,
                low: c * 0.99,
                close: *c,
                adjusted_close: None,
                volume: 100_000.0,
            })
            .collect();
        PriceSeries::new("TST.AX", Period::ThreeMonths, bars, "fixture").unwrap()
    }

    fn rising_closes(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 * 1.005f64.powi(i as i32)).collect()
    }

    fn falling_closes(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 * 0.995f64.powi(i as i32)).collect()
    }

    #[test]
    fn features_have_expected_shape() {
        let series = series_from_closes(&rising_closes(90));
        let features = build_features(&series).unwrap();
        assert_eq!(features.len(), INPUT_WINDOW);
        assert!(features.iter().all(|row| row.len() == N_FEATURES));
        assert!(features.iter().flatten().all(|v| v.is_finite()));
    }

    #[test]
    fn features_decline_short_series() {
        let series = series_from_closes(&rising_closes(50));
        assert!(build_features(&series).is_none());
    }

    #[test]
    fn trend_positive_in_uptrend_negative_in_downtrend() {
        let (up_dir, up_conf) = trend_component(&rising_closes(90)).unwrap();
        assert!(up_dir > 0.0);
        assert!((0.0..=1.0).contains(&up_conf));

        let (down_dir, _) = trend_component(&falling_closes(90)).unwrap();
        assert!(down_dir < 0.0);
    }

    #[test]
    fn technical_tracks_momentum() {
        let (up_dir, up_conf) = technical_component(&rising_closes(90)).unwrap();
        assert!(up_dir > 0.0);
        // RSI and MACD agree in a steady uptrend.
        assert!(up_conf > 0.5);

        let (down_dir, _) = technical_component(&falling_closes(90)).unwrap();
        assert!(down_dir < 0.0);
    }

    #[test]
    fn components_stay_bounded() {
        for closes in [rising_closes(90), falling_closes(90)] {
            let (d, c) = trend_component(&closes).unwrap();
            assert!((-1.0..=1.0).contains(&d) && (0.0..=1.0).contains(&c));
            let (d, c) = technical_component(&closes).unwrap();
            assert!((-1.0..=1.0).contains(&d) && (0.0..=1.0).contains(&c));
        }
    }
}
