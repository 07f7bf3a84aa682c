//! Volatility estimators. All functions are pure over their input slice.

use statrs::distribution::{Continuous, Normal};

/// Trading sessions per year used for annualization.
pub const SESSIONS_PER_YEAR: f64 = 252.0;

/// Log returns over a close series, skipping non-finite or non-positive
/// prices rather than fabricating values.
pub fn log_returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .filter_map(|w| {
            if w[0].is_finite() && w[1].is_finite() && w[0] > 0.0 && w[1] > 0.0 {
                Some((w[1] / w[0]).ln())
            } else {
                None
            }
        })
        .filter(|r| r.is_finite())
        .collect()
}

/// EWMA of squared returns with the given half-life (sessions). Returns
/// the latest variance estimate.
pub fn ewma_variance(returns: &[f64], half_life: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let lambda = (0.5f64).powf(1.0 / half_life);
    let mut var = returns[0] * returns[0];
    for r in &returns[1..] {
        var = lambda * var + (1.0 - lambda) * r * r;
    }
    var
}

/// Annualized volatility from a daily variance.
pub fn annualize(daily_variance: f64) -> f64 {
    (daily_variance * SESSIONS_PER_YEAR).sqrt()
}

/// Rolling standard deviation of returns, one value per full window.
pub fn rolling_vol(returns: &[f64], window: usize) -> Vec<f64> {
    if window == 0 || returns.len() < window {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(returns.len() - window + 1);
    for i in window - 1..returns.len() {
        let slice = &returns[i + 1 - window..=i];
        let mean = slice.iter().sum::<f64>() / window as f64;
        let var = slice.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / window as f64;
        out.push(var.sqrt());
    }
    out
}

/// Excess kurtosis of the return distribution; 0 for a Gaussian. Used as
/// a tail-shape proxy in the crash-risk score.
pub fn excess_kurtosis(returns: &[f64]) -> f64 {
    let n = returns.len();
    if n < 4 {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / n as f64;
    let m2 = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n as f64;
    if m2 <= 0.0 {
        return 0.0;
    }
    let m4 = returns.iter().map(|r| (r - mean).powi(4)).sum::<f64>() / n as f64;
    m4 / (m2 * m2) - 3.0
}

/// GARCH(1,1) next-day variance forecast via a variance-targeted grid MLE.
/// Returns None when the series is too short or no stationary fit improves
/// on the unconditional variance; callers fall back to EWMA.
pub fn garch11_forecast(returns: &[f64]) -> Option<f64> {
    if returns.len() < 30 {
        return None;
    }
    let n = returns.len() as f64;
    let uncond = returns.iter().map(|r| r * r).sum::<f64>() / n;
    if uncond <= 0.0 || !uncond.is_finite() {
        return None;
    }

    // Coarse grid, then one refinement pass around the winner.
    let coarse_alphas: Vec<f64> = (1..=15).map(|i| i as f64 * 0.02).collect();
    let coarse_betas: Vec<f64> = (50..=97).step_by(3).map(|i| i as f64 * 0.01).collect();
    let best = search(returns, uncond, &coarse_alphas, &coarse_betas, None);

    let (_, a0, b0) = best?;
    let fine_alphas: Vec<f64> = (-3..=3).map(|i| a0 + i as f64 * 0.005).collect();
    let fine_betas: Vec<f64> = (-3..=3).map(|i| b0 + i as f64 * 0.01).collect();
    let best = search(returns, uncond, &fine_alphas, &fine_betas, best);

    let (loglik, alpha, beta) = best?;
    if !loglik.is_finite() {
        return None;
    }

    let omega = uncond * (1.0 - alpha - beta);
    let (_, last_var) = conditional_variances(returns, omega, alpha, beta, uncond)?;
    let last_r2 = returns.last().map(|r| r * r)?;
    let forecast = omega + alpha * last_r2 + beta * last_var;
    forecast.is_finite().then_some(forecast)
}

fn search(
    returns: &[f64],
    uncond: f64,
    alphas: &[f64],
    betas: &[f64],
    mut best: Option<(f64, f64, f64)>,
) -> Option<(f64, f64, f64)> {
    for &alpha in alphas {
        for &beta in betas {
            if alpha <= 0.0 || beta <= 0.0 || alpha + beta >= 0.999 {
                continue;
            }
            let omega = uncond * (1.0 - alpha - beta);
            if let Some((loglik, _)) = conditional_variances(returns, omega, alpha, beta, uncond) {
                if best.map_or(true, |(b, _, _)| loglik > b) {
                    best = Some((loglik, alpha, beta));
                }
            }
        }
    }
    best
}

/// Run the GARCH recursion; returns (log-likelihood, last conditional
/// variance), or None on numeric breakdown.
fn conditional_variances(
    returns: &[f64],
    omega: f64,
    alpha: f64,
    beta: f64,
    seed: f64,
) -> Option<(f64, f64)> {
    let mut var = seed;
    let mut loglik = 0.0;
    for r in returns {
        if var <= 0.0 || !var.is_finite() {
            return None;
        }
        loglik += -0.5 * (var.ln() + r * r / var);
        var = omega + alpha * r * r + beta * var;
    }
    loglik.is_finite().then_some((loglik, var))
}

/// Two-state Gaussian mixture over a volatility series, fit by EM.
/// Returns the probability that the latest observation sits in the
/// high-volatility state. None on degenerate data; callers fall back to
/// the quantile rank.
pub fn gmm2_high_state_prob(values: &[f64]) -> Option<f64> {
    if values.len() < 20 {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let lo_seed = sorted[sorted.len() / 4];
    let hi_seed = sorted[3 * sorted.len() / 4];
    if (hi_seed - lo_seed).abs() < 1e-12 {
        return None;
    }

    let n = values.len() as f64;
    let global_var = {
        let mean = values.iter().sum::<f64>() / n;
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
    };
    if global_var <= 0.0 {
        return None;
    }

    let mut mu = [lo_seed, hi_seed];
    let mut var = [global_var, global_var];
    let mut weight = [0.5, 0.5];
    let mut resp_hi = vec![0.5; values.len()];

    for _ in 0..100 {
        // E step
        let mut changed = 0.0f64;
        for (i, &v) in values.iter().enumerate() {
            let p_lo = weight[0] * gaussian_pdf(v, mu[0], var[0]);
            let p_hi = weight[1] * gaussian_pdf(v, mu[1], var[1]);
            let total = p_lo + p_hi;
            if total <= 0.0 || !total.is_finite() {
                return None;
            }
            let r = p_hi / total;
            changed = changed.max((r - resp_hi[i]).abs());
            resp_hi[i] = r;
        }

        // M step
        let n_hi: f64 = resp_hi.iter().sum();
        let n_lo = n - n_hi;
        if n_hi < 1e-6 || n_lo < 1e-6 {
            return None;
        }
        mu[1] = values.iter().zip(&resp_hi).map(|(v, r)| v * r).sum::<f64>() / n_hi;
        mu[0] = values.iter().zip(&resp_hi).map(|(v, r)| v * (1.0 - r)).sum::<f64>() / n_lo;
        var[1] = values
            .iter()
            .zip(&resp_hi)
            .map(|(v, r)| r * (v - mu[1]).powi(2))
            .sum::<f64>()
            / n_hi;
        var[0] = values
            .iter()
            .zip(&resp_hi)
            .map(|(v, r)| (1.0 - r) * (v - mu[0]).powi(2))
            .sum::<f64>()
            / n_lo;
        var[0] = var[0].max(1e-12);
        var[1] = var[1].max(1e-12);
        weight[1] = n_hi / n;
        weight[0] = n_lo / n;

        if changed < 1e-8 {
            break;
        }
    }

    // Keep state 1 the high-vol state.
    let high_is_one = mu[1] >= mu[0];
    let last = *values.last()?;
    let p_lo = weight[0] * gaussian_pdf(last, mu[0], var[0]);
    let p_hi = weight[1] * gaussian_pdf(last, mu[1], var[1]);
    let total = p_lo + p_hi;
    if total <= 0.0 || !total.is_finite() {
        return None;
    }
    let prob_one = p_hi / total;
    Some(if high_is_one { prob_one } else { 1.0 - prob_one })
}

fn gaussian_pdf(x: f64, mu: f64, var: f64) -> f64 {
    match Normal::new(mu, var.sqrt()) {
        Ok(dist) => dist.pdf(x),
        Err(_) => 0.0,
    }
}

/// Quantile rank of the last value within the series; the GMM fallback.
pub fn quantile_rank(values: &[f64]) -> f64 {
    match values.last() {
        Some(&last) if values.len() > 1 => {
            let below = values.iter().filter(|&&v| v < last).count();
            below as f64 / (values.len() - 1) as f64
        }
        _ => 0.5,
    }
}
