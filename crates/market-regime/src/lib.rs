//! Market regime engine: classify the local index into a volatility regime
//! and score crash risk. Every numeric path is a pure function of the
//! input close series.

pub mod vol;

use serde::{Deserialize, Serialize};

use screener_core::{RegimeConfig, RegimeLabel};
use vol::{
    annualize, ewma_variance, excess_kurtosis, garch11_forecast, gmm2_high_state_prob,
    log_returns, quantile_rank, rolling_vol,
};

/// EWMA half-life in sessions for realized volatility.
const VOL_HALF_LIFE: f64 = 22.0;
/// Minimum valid return observations before a label other than UNKNOWN.
const MIN_OBSERVATIONS: usize = 60;
/// Lookback for the drawdown-from-high input to crash risk.
const DRAWDOWN_WINDOW: usize = 60;
/// Window for the rolling-vol series fed to the mixture model.
const ROLLING_VOL_WINDOW: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeMetrics {
    /// Annualized realized volatility, percent.
    pub realized_vol_pct: f64,
    /// Annualized GARCH(1,1) next-day forecast, percent; None means the
    /// fit failed and EWMA was used.
    pub forecast_vol_pct: Option<f64>,
    /// Drawdown from the 60-session high, as a fraction.
    pub drawdown: f64,
    pub excess_kurtosis: f64,
    /// Probability the latest vol sits in the high-vol mixture state.
    pub high_state_prob: f64,
    pub n_observations: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeAssessment {
    pub label: RegimeLabel,
    pub crash_risk: f64,
    pub metrics: RegimeMetrics,
    pub reasoning: String,
}

pub struct RegimeEngine {
    calm_threshold_pct: f64,
    highvol_threshold_pct: f64,
}

impl RegimeEngine {
    pub fn new(config: &RegimeConfig) -> Self {
        Self {
            calm_threshold_pct: config.calm_threshold_pct,
            highvol_threshold_pct: config.highvol_threshold_pct,
        }
    }

    /// Classify the regime from daily closes of the local index.
    pub fn compute(&self, closes: &[f64]) -> RegimeAssessment {
        let returns = log_returns(closes);
        let n = returns.len();

        if n < MIN_OBSERVATIONS {
            return RegimeAssessment {
                label: RegimeLabel::Unknown,
                crash_risk: 0.0,
                metrics: RegimeMetrics {
                    realized_vol_pct: 0.0,
                    forecast_vol_pct: None,
                    drawdown: 0.0,
                    excess_kurtosis: 0.0,
                    high_state_prob: 0.0,
                    n_observations: n,
                },
                reasoning: format!(
                    "insufficient data: {} observations (need {})",
                    n, MIN_OBSERVATIONS
                ),
            };
        }

        let realized_var = ewma_variance(&returns, VOL_HALF_LIFE);
        let realized_vol = annualize(realized_var);

        let forecast_vol = match garch11_forecast(&returns) {
            Some(var) => Some(annualize(var)),
            None => {
                tracing::debug!("GARCH fit declined, using EWMA forecast");
                None
            }
        };

        let vol_series = rolling_vol(&returns, ROLLING_VOL_WINDOW);
        let high_state_prob = gmm2_high_state_prob(&vol_series)
            .unwrap_or_else(|| quantile_rank(&vol_series));

        let drawdown = drawdown_from_high(closes, DRAWDOWN_WINDOW);
        let kurt = excess_kurtosis(&returns);

        let label = self.label_for(realized_vol * 100.0);
        let crash_risk = crash_risk_score(drawdown, realized_vol, kurt, high_state_prob);

        let reasoning = format!(
            "{}: realized vol {:.1}% (forecast {}), drawdown {:.1}%, crash risk {:.2}",
            label.as_str(),
            realized_vol * 100.0,
            forecast_vol
                .map(|v| format!("{:.1}%", v * 100.0))
                .unwrap_or_else(|| "ewma".to_string()),
            drawdown * 100.0,
            crash_risk
        );

        RegimeAssessment {
            label,
            crash_risk,
            metrics: RegimeMetrics {
                realized_vol_pct: realized_vol * 100.0,
                forecast_vol_pct: forecast_vol.map(|v| v * 100.0),
                drawdown,
                excess_kurtosis: kurt,
                high_state_prob,
                n_observations: n,
            },
            reasoning,
        }
    }

    fn label_for(&self, annualized_vol_pct: f64) -> RegimeLabel {
        if annualized_vol_pct < self.calm_threshold_pct {
            RegimeLabel::Calm
        } else if annualized_vol_pct <= self.highvol_threshold_pct {
            RegimeLabel::Normal
        } else {
            RegimeLabel::HighVol
        }
    }
}

/// Fractional drawdown of the last close from the window high.
fn drawdown_from_high(closes: &[f64], window: usize) -> f64 {
    let tail: Vec<f64> = closes
        .iter()
        .rev()
        .take(window)
        .copied()
        .filter(|c| c.is_finite() && *c > 0.0)
        .collect();
    let (Some(&last), Some(high)) = (
        tail.first(),
        tail.iter().copied().reduce(f64::max),
    ) else {
        return 0.0;
    };
    if high <= 0.0 {
        return 0.0;
    }
    ((high - last) / high).max(0.0)
}

/// Logistic blend of drawdown, realized vol, tail shape and the mixture
/// state probability into [0, 1].
fn crash_risk_score(drawdown: f64, realized_vol: f64, kurt: f64, high_state_prob: f64) -> f64 {
    let z = 10.0 * drawdown
        + 12.0 * (realized_vol - 0.18)
        + 0.08 * kurt.clamp(-3.0, 10.0)
        + 0.6 * high_state_prob
        - 2.2;
    1.0 / (1.0 + (-z).exp())
}
