//! Ensemble predictor: LSTM, trend, technical and news sentiment combined
//! under fixed weights (45/25/15/15). A missing or failed component has
//! its weight redistributed pro-rata across the survivors. Each request
//! walks QUEUED -> FETCH_DATA -> (FAIL | RUN_COMPONENTS) -> COMBINE ->
//! DONE/FAILED; only a FETCH_DATA failure aborts the symbol.

pub mod components;
pub mod model;

pub use model::{model_path, LstmModel, INPUT_WINDOW};

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;

use components::{build_features, technical_component, trend_component};
use screener_core::{
    BarFeed, ComponentScore, ComponentScores, EnsembleConfig, EnsembleWeights, MarketSnapshot,
    Period, Prediction, RegimeLabel, ScreenerError, SentimentFeed, SentimentOrigin, Signal,
};

/// Crash-risk level at which the HIGH_VOL override engages.
const CRASH_RISK_OVERRIDE: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestState {
    Queued,
    FetchData,
    RunComponents,
    Combine,
    Done,
    Failed,
}

impl RequestState {
    fn as_str(&self) -> &'static str {
        match self {
            RequestState::Queued => "QUEUED",
            RequestState::FetchData => "FETCH_DATA",
            RequestState::RunComponents => "RUN_COMPONENTS",
            RequestState::Combine => "COMBINE",
            RequestState::Done => "DONE",
            RequestState::Failed => "FAILED",
        }
    }
}

struct RequestTrace {
    symbol: String,
    state: RequestState,
}

impl RequestTrace {
    fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            state: RequestState::Queued,
        }
    }

    fn advance(&mut self, next: RequestState) {
        tracing::debug!(
            "{}: prediction {} -> {}",
            self.symbol,
            self.state.as_str(),
            next.as_str()
        );
        self.state = next;
    }
}

pub struct EnsemblePredictor {
    feed: Arc<dyn BarFeed>,
    sentiment: Arc<dyn SentimentFeed>,
    weights: EnsembleWeights,
    models_dir: PathBuf,
    /// Count of component failures observed, for run counters.
    component_failures: std::sync::atomic::AtomicU64,
}

impl EnsemblePredictor {
    pub fn new(
        feed: Arc<dyn BarFeed>,
        sentiment: Arc<dyn SentimentFeed>,
        config: &EnsembleConfig,
    ) -> Self {
        Self {
            feed,
            sentiment,
            weights: config.weights.clone(),
            models_dir: config.models_path.clone(),
            component_failures: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn component_failure_count(&self) -> u64 {
        self.component_failures
            .load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Produce the next-session prediction for one symbol.
    pub async fn predict(
        &self,
        symbol: &str,
        snapshot: &MarketSnapshot,
    ) -> Result<Prediction, ScreenerError> {
        let mut trace = RequestTrace::new(symbol);

        trace.advance(RequestState::FetchData);
        let series = match self.feed.ohlcv(symbol, Period::ThreeMonths).await {
            Ok(series) => series,
            Err(e) => {
                trace.advance(RequestState::Failed);
                return Err(e);
            }
        };
        let closes = series.closes();

        trace.advance(RequestState::RunComponents);

        let lstm = self.run_lstm(symbol, &series);
        let trend = trend_component(&closes);
        let technical = technical_component(&closes);
        let (sentiment, sentiment_origin) = self.run_sentiment(symbol, snapshot).await;

        if trend.is_none() {
            self.note_failure(symbol, "trend", "insufficient history");
        }
        if technical.is_none() {
            self.note_failure(symbol, "technical", "insufficient history");
        }

        trace.advance(RequestState::Combine);

        let raw = [
            ("lstm", self.weights.lstm, lstm),
            ("trend", self.weights.trend, trend),
            ("technical", self.weights.technical, technical),
            ("sentiment", self.weights.sentiment, sentiment),
        ];

        let active_weight: f64 = raw
            .iter()
            .filter(|(_, _, c)| c.is_some())
            .map(|(_, w, _)| w)
            .sum();

        let mut direction = 0.0;
        let mut confidence = 0.0;
        let mut scored: [Option<ComponentScore>; 4] = [None, None, None, None];

        if active_weight > 0.0 {
            for (i, (_, base, component)) in raw.iter().enumerate() {
                if let Some((dir, conf)) = component {
                    let weight = base / active_weight;
                    direction += weight * dir;
                    confidence += weight * conf;
                    scored[i] = Some(ComponentScore {
                        direction: *dir,
                        confidence: *conf,
                        weight,
                    });
                }
            }
        }

        direction = direction.clamp(-1.0, 1.0);
        confidence = confidence.clamp(0.0, 1.0);
        let mut signal = Signal::from_direction(direction);

        // Sector-wide risk override in a crash-prone high-vol regime.
        if snapshot.regime == RegimeLabel::HighVol && snapshot.crash_risk >= CRASH_RISK_OVERRIDE {
            confidence *= 0.5;
            if signal == Signal::Buy {
                tracing::info!("{}: BUY downgraded to HOLD (high-vol override)", symbol);
                signal = Signal::Hold;
            }
        }

        trace.advance(RequestState::Done);

        let [lstm_score, trend_score, technical_score, sentiment_score] = scored;
        Ok(Prediction {
            symbol: symbol.to_string(),
            direction,
            confidence,
            signal,
            components: ComponentScores {
                lstm: lstm_score,
                trend: trend_score,
                technical: technical_score,
                sentiment: sentiment_score,
                sentiment_origin,
            },
            asof: Utc::now(),
        })
    }

    /// LSTM component: absent model file means absent component; a corrupt
    /// model or bad feature shape is a component failure, not a prediction
    /// failure.
    fn run_lstm(&self, symbol: &str, series: &screener_core::PriceSeries) -> Option<(f64, f64)> {
        let path = model_path(&self.models_dir, symbol);
        if !path.exists() {
            tracing::debug!("{}: no LSTM artifact", symbol);
            return None;
        }

        let result = LstmModel::load(&path).and_then(|model| {
            let features = build_features(series).ok_or_else(|| ScreenerError::Component {
                component: "lstm".to_string(),
                reason: "insufficient history for feature window".to_string(),
            })?;
            model.predict(&features)
        });

        match result {
            Ok(pair) => Some(pair),
            Err(e) => {
                self.note_failure(symbol, "lstm", &e.to_string());
                None
            }
        }
    }

    /// Sentiment component. Real articles when available; otherwise the
    /// gap-derived proxy. Never a deterministic function of the symbol.
    async fn run_sentiment(
        &self,
        symbol: &str,
        snapshot: &MarketSnapshot,
    ) -> (Option<(f64, f64)>, SentimentOrigin) {
        match self.sentiment.aggregate_sentiment(symbol).await {
            Ok(agg) if agg.article_count >= 1 => {
                let origin = SentimentOrigin::Articles {
                    count: agg.article_count,
                };
                (Some((agg.direction, agg.confidence)), origin)
            }
            Ok(_) => (Some(gap_proxy(snapshot)), SentimentOrigin::GapProxy),
            Err(e) => {
                self.note_failure(symbol, "sentiment", &e.to_string());
                (None, SentimentOrigin::GapProxy)
            }
        }
    }

    fn note_failure(&self, symbol: &str, component: &str, reason: &str) {
        self.component_failures
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        tracing::warn!(
            "{}: component {} failed, weight redistributed: {}",
            symbol,
            component,
            reason
        );
    }
}

/// No-news fallback: direction from the predicted opening gap, confidence
/// discounted from the gap confidence.
pub fn gap_proxy(snapshot: &MarketSnapshot) -> (f64, f64) {
    let direction = (snapshot.predicted_gap_pct / 2.0).clamp(-1.0, 1.0);
    let confidence = (0.8 * snapshot.gap_confidence / 100.0).clamp(0.0, 1.0);
    (direction, confidence)
}

/// Sentinel helper for tests and diagnostics.
pub fn is_gap_proxy(prediction: &Prediction) -> bool {
    prediction.components.sentiment_origin == SentimentOrigin::GapProxy
}
