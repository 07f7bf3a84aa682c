//! Indicator math over close/volume slices. Inputs may contain NaN
//! (index volume, halted sessions); every path degrades to a finite
//! default instead of propagating it.

/// Return val if finite, otherwise default.
#[inline]
pub fn finite_or(val: f64, default: f64) -> f64 {
    if val.is_finite() {
        val
    } else {
        default
    }
}

/// Mean over the finite values of a slice; 0 when none are finite.
pub fn finite_mean(data: &[f64]) -> f64 {
    let finite: Vec<f64> = data.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        0.0
    } else {
        finite.iter().sum::<f64>() / finite.len() as f64
    }
}

/// Simple moving average series; one value per full window.
pub fn sma(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period {
        return vec![];
    }
    let mut out = Vec::with_capacity(data.len() - period + 1);
    for i in period - 1..data.len() {
        let sum: f64 = data[i + 1 - period..=i].iter().sum();
        out.push(finite_or(sum / period as f64, 0.0));
    }
    out
}

/// Exponential moving average. Output length matches input length; the
/// first `period` slots carry the SMA seed (MACD relies on this).
pub fn ema(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.is_empty() {
        return vec![];
    }
    if data.len() < period {
        let avg = data.iter().sum::<f64>() / data.len() as f64;
        return vec![finite_or(avg, 0.0)];
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let seed = finite_or(data[..period].iter().sum::<f64>() / period as f64, 0.0);

    let mut out = Vec::with_capacity(data.len());
    for _ in 0..period {
        out.push(seed);
    }
    for i in period..data.len() {
        let prev = out[i - 1];
        let val = (data[i] - prev) * multiplier + prev;
        out.push(finite_or(val, prev));
    }
    out
}

/// Wilder-smoothed RSI series.
pub fn rsi(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period + 1 {
        return vec![];
    }

    let mut gains = Vec::with_capacity(data.len() - 1);
    let mut losses = Vec::with_capacity(data.len() - 1);
    for w in data.windows(2) {
        let change = w[1] - w[0];
        gains.push(change.max(0.0));
        losses.push((-change).max(0.0));
    }

    let mut avg_gain = gains[..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss = losses[..period].iter().sum::<f64>() / period as f64;

    let mut out = Vec::with_capacity(gains.len() - period + 1);
    out.push(rsi_value(avg_gain, avg_loss));

    for i in period..gains.len() {
        avg_gain = (avg_gain * (period - 1) as f64 + gains[i]) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + losses[i]) / period as f64;
        out.push(rsi_value(avg_gain, avg_loss));
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return if avg_gain == 0.0 { 50.0 } else { 100.0 };
    }
    let rs = avg_gain / avg_loss;
    finite_or(100.0 - 100.0 / (1.0 + rs), 50.0)
}

pub struct MacdResult {
    pub macd_line: Vec<f64>,
    pub signal_line: Vec<f64>,
    pub histogram: Vec<f64>,
}

/// MACD(12, 26, 9) unless overridden.
pub fn macd(data: &[f64], fast: usize, slow: usize, signal: usize) -> MacdResult {
    if fast == 0 || slow == 0 || signal == 0 || slow <= fast || data.len() < slow {
        return MacdResult {
            macd_line: vec![],
            signal_line: vec![],
            histogram: vec![],
        };
    }

    let ema_fast = ema(data, fast);
    let ema_slow = ema(data, slow);
    let macd_line: Vec<f64> = ema_fast
        .iter()
        .zip(&ema_slow)
        .map(|(f, s)| f - s)
        .collect();

    let signal_line = ema(&macd_line, signal);
    let offset = macd_line.len().saturating_sub(signal_line.len());
    let histogram: Vec<f64> = signal_line
        .iter()
        .enumerate()
        .map(|(i, s)| macd_line[i + offset] - s)
        .collect();

    MacdResult {
        macd_line,
        signal_line,
        histogram,
    }
}

/// Simple daily returns over a close series, skipping non-finite inputs.
pub fn simple_returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .filter_map(|w| {
            if w[0].is_finite() && w[1].is_finite() && w[0] != 0.0 {
                Some(w[1] / w[0] - 1.0)
            } else {
                None
            }
        })
        .collect()
}

/// Standard deviation of the last `window` daily returns.
pub fn realized_vol(closes: &[f64], window: usize) -> f64 {
    let returns = simple_returns(closes);
    if returns.len() < window || window < 2 {
        return 0.0;
    }
    let tail = &returns[returns.len() - window..];
    let mean = tail.iter().sum::<f64>() / window as f64;
    let var = tail.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / window as f64;
    finite_or(var.sqrt(), 0.0)
}

/// 1 - coefficient of variation of the finite volumes, clamped to [0, 1].
/// All-NaN input (indices) scores 0.
pub fn volume_consistency(volumes: &[f64]) -> f64 {
    let finite: Vec<f64> = volumes.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.len() < 2 {
        return 0.0;
    }
    let mean = finite.iter().sum::<f64>() / finite.len() as f64;
    if mean <= 0.0 {
        return 0.0;
    }
    let var = finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / finite.len() as f64;
    let cv = var.sqrt() / mean;
    (1.0 - cv).clamp(0.0, 1.0)
}
