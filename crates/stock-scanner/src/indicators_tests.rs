use super::indicators::*;
use approx::assert_relative_eq;

#[test]
fn sma_basic() {
    let data = vec![1.0, 2.0, 3.0, 4.0, 5.0];
    let result = sma(&data, 3);
    assert_eq!(result, vec![2.0, 3.0, 4.0]);
}

#[test]
fn sma_short_input_is_empty() {
    assert!(sma(&[1.0, 2.0], 3).is_empty());
    assert!(sma(&[1.0, 2.0, 3.0], 0).is_empty());
}

#[test]
fn ema_output_length_matches_input() {
    let data: Vec<f64> = (1..=30).map(|i| i as f64).collect();
    let result = ema(&data, 12);
    assert_eq!(result.len(), data.len());
    // EMA of a rising series trails the last value but exceeds the SMA seed.
    assert!(result.last().unwrap() < &30.0);
    assert!(result.last().unwrap() > &result[11]);
}

#[test]
fn rsi_of_monotone_rise_saturates() {
    let data: Vec<f64> = (1..=40).map(|i| 100.0 + i as f64).collect();
    let result = rsi(&data, 14);
    assert!(!result.is_empty());
    assert_relative_eq!(*result.last().unwrap(), 100.0, epsilon = 1e-9);
}

#[test]
fn rsi_of_flat_series_is_neutral() {
    let data = vec![50.0; 40];
    let result = rsi(&data, 14);
    assert!(result.iter().all(|v| (*v - 50.0).abs() < 1e-9));
}

#[test]
fn rsi_bounded() {
    let data: Vec<f64> = (0..60)
        .map(|i| 100.0 + ((i * 7) % 13) as f64 - 6.0)
        .collect();
    for v in rsi(&data, 14) {
        assert!((0.0..=100.0).contains(&v));
    }
}

#[test]
fn macd_sign_tracks_trend() {
    let rising: Vec<f64> = (1..=80).map(|i| 100.0 + i as f64).collect();
    let result = macd(&rising, 12, 26, 9);
    assert!(*result.macd_line.last().unwrap() > 0.0);

    let falling: Vec<f64> = (1..=80).map(|i| 200.0 - i as f64).collect();
    let result = macd(&falling, 12, 26, 9);
    assert!(*result.macd_line.last().unwrap() < 0.0);
}

#[test]
fn realized_vol_of_flat_series_is_zero() {
    let closes = vec![100.0; 40];
    assert_eq!(realized_vol(&closes, 20), 0.0);
}

#[test]
fn realized_vol_of_constant_swing() {
    // Alternating +1%/-1% simple returns have stdev ~1%.
    let mut closes = vec![100.0];
    for i in 0..40 {
        let prev = *closes.last().unwrap();
        closes.push(prev * if i % 2 == 0 { 1.01 } else { 0.99 });
    }
    let vol = realized_vol(&closes, 20);
    assert!((0.009..=0.011).contains(&vol), "vol {}", vol);
}

#[test]
fn volume_consistency_steady_vs_spiky() {
    let steady = vec![100_000.0; 20];
    assert_relative_eq!(volume_consistency(&steady), 1.0, epsilon = 1e-12);

    let mut spiky = vec![10_000.0; 19];
    spiky.push(2_000_000.0);
    assert!(volume_consistency(&spiky) < 0.2);
}

#[test]
fn volume_consistency_of_nan_volumes_is_zero() {
    let volumes = vec![f64::NAN; 20];
    assert_eq!(volume_consistency(&volumes), 0.0);
}

#[test]
fn finite_mean_skips_nan() {
    let data = vec![f64::NAN, 10.0, 20.0, f64::NAN];
    assert_relative_eq!(finite_mean(&data), 15.0, epsilon = 1e-12);
    assert_eq!(finite_mean(&[f64::NAN, f64::NAN]), 0.0);
}
