//! Financial-text sentiment classifier behind a trait seam. The production
//! implementation talks to a local inference service pinned to the
//! configured model id and device; it is initialized lazily on first use
//! and kept resident for the run.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};

use screener_core::{ScreenerError, SentimentConfig, SentimentLabel};

/// Three-way probability distribution for one text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextScore {
    pub positive: f64,
    pub neutral: f64,
    pub negative: f64,
}

impl TextScore {
    pub fn label(&self) -> SentimentLabel {
        if self.positive >= self.neutral && self.positive >= self.negative {
            SentimentLabel::Positive
        } else if self.negative >= self.neutral {
            SentimentLabel::Negative
        } else {
            SentimentLabel::Neutral
        }
    }

    /// Signed score: p_pos - p_neg, in [-1, 1].
    pub fn signed_score(&self) -> f64 {
        (self.positive - self.negative).clamp(-1.0, 1.0)
    }

    /// Argmax probability, in [0, 1].
    pub fn confidence(&self) -> f64 {
        self.positive.max(self.neutral).max(self.negative).clamp(0.0, 1.0)
    }
}

/// Classifier seam. Callers guarantee `texts` is non-empty; the model is
/// never invoked on empty input.
#[async_trait]
pub trait SentimentModel: Send + Sync {
    async fn classify(&self, texts: &[String]) -> Result<Vec<TextScore>, ScreenerError>;
}

#[derive(Serialize)]
struct LoadRequest<'a> {
    model_id: &'a str,
    device: &'a str,
}

#[derive(Serialize)]
struct PredictRequest<'a> {
    texts: &'a [String],
    model_id: &'a str,
}

#[derive(Deserialize)]
struct PredictResponse {
    predictions: Vec<TextScore>,
}

/// HTTP client for the FinBERT inference service.
pub struct FinbertClient {
    client: reqwest::Client,
    base_url: String,
    model_id: String,
    device: String,
    warm: OnceCell<()>,
    /// Non-CPU devices run inference serially; workers queue here.
    gate: Option<Mutex<()>>,
}

impl FinbertClient {
    pub fn new(config: &SentimentConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let gate = if config.device == "cpu" {
            None
        } else {
            Some(Mutex::new(()))
        };

        Self {
            client,
            base_url: config.inference_url.clone(),
            model_id: config.model_id.clone(),
            device: config.device.clone(),
            warm: OnceCell::new(),
            gate,
        }
    }

    /// Ask the service to load the pinned model. Runs once per process.
    async fn warm_up(&self) -> Result<(), ScreenerError> {
        self.warm
            .get_or_try_init(|| async {
                tracing::info!(
                    "loading sentiment model {} on {}",
                    self.model_id,
                    self.device
                );
                let response = self
                    .client
                    .post(format!("{}/models/load", self.base_url))
                    .json(&LoadRequest {
                        model_id: &self.model_id,
                        device: &self.device,
                    })
                    .send()
                    .await
                    .map_err(|e| ScreenerError::Component {
                        component: "sentiment".to_string(),
                        reason: format!("model load failed: {}", e),
                    })?;

                if !response.status().is_success() {
                    return Err(ScreenerError::Component {
                        component: "sentiment".to_string(),
                        reason: format!("model load HTTP {}", response.status()),
                    });
                }
                Ok(())
            })
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl SentimentModel for FinbertClient {
    async fn classify(&self, texts: &[String]) -> Result<Vec<TextScore>, ScreenerError> {
        self.warm_up().await?;

        let _serial = match &self.gate {
            Some(gate) => Some(gate.lock().await),
            None => None,
        };

        let response = self
            .client
            .post(format!("{}/predict", self.base_url))
            .json(&PredictRequest {
                texts,
                model_id: &self.model_id,
            })
            .send()
            .await
            .map_err(|e| ScreenerError::Component {
                component: "sentiment".to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(ScreenerError::Component {
                component: "sentiment".to_string(),
                reason: format!("inference HTTP {}", response.status()),
            });
        }

        let body: PredictResponse =
            response.json().await.map_err(|e| ScreenerError::Component {
                component: "sentiment".to_string(),
                reason: e.to_string(),
            })?;

        if body.predictions.len() != texts.len() {
            return Err(ScreenerError::Component {
                component: "sentiment".to_string(),
                reason: format!(
                    "prediction count mismatch: {} texts, {} scores",
                    texts.len(),
                    body.predictions.len()
                ),
            });
        }

        Ok(body.predictions)
    }
}
