use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ScreenerError;
use crate::types::SectorMap;

/// Typed run configuration. Loaded once from a TOML document, validated at
/// Init, then passed by value into the orchestrator; components receive
/// only the slice they need.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub universe: UniverseConfig,
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub sentiment: SentimentConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub regime: RegimeConfig,
    #[serde(default)]
    pub gap: GapConfig,
    #[serde(default)]
    pub ensemble: EnsembleConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UniverseConfig {
    /// Sector name -> symbols. Required.
    pub sectors: SectorMap,
    #[serde(default = "default_top_n")]
    pub top_n_per_sector: usize,
}

fn default_top_n() -> usize {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    /// Provider id: `yahoo_chart`, `alpha_history`, `quote_only`.
    pub id: String,
    /// Env var holding the API key; defaults to `<ID>_API_KEY` uppercased.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default = "default_calls_per_minute")]
    pub calls_per_minute: u32,
    #[serde(default = "default_daily_cap")]
    pub daily_cap: u32,
    /// Endpoint override, used by tests and self-hosted mirrors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

fn default_calls_per_minute() -> u32 {
    60
}

fn default_daily_cap() -> u32 {
    5000
}

impl ProviderConfig {
    pub fn api_key_env(&self) -> String {
        self.api_key_env
            .clone()
            .unwrap_or_else(|| format!("{}_API_KEY", self.id.to_uppercase()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetcherConfig {
    /// Ordered provider list; precedence is list order. Required.
    pub providers: Vec<ProviderConfig>,
    #[serde(default = "default_ohlcv_ttl")]
    pub cache_ttl_minutes: u64,
    #[serde(default = "default_quote_ttl")]
    pub quote_ttl_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_seconds: u64,
}

fn default_ohlcv_ttl() -> u64 {
    240
}

fn default_quote_ttl() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    6
}

fn default_http_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SentimentConfig {
    #[serde(default = "default_max_articles")]
    pub max_articles: usize,
    #[serde(default = "default_sentiment_ttl")]
    pub cache_ttl_minutes: u64,
    /// Pinned classifier identifier.
    #[serde(default = "default_model_id")]
    pub model_id: String,
    /// `cpu` (default) or a CUDA device string. Non-CPU devices serialize
    /// inference through a single gate.
    #[serde(default = "default_device")]
    pub device: String,
    /// Inference service endpoint.
    #[serde(default = "default_inference_url")]
    pub inference_url: String,
    /// News feed endpoints, fetched concurrently per symbol.
    #[serde(default)]
    pub feeds: Vec<NewsFeedConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewsFeedConfig {
    pub id: String,
    pub base_url: String,
}

fn default_max_articles() -> usize {
    10
}

fn default_sentiment_ttl() -> u64 {
    15
}

fn default_model_id() -> String {
    "ProsusAI/finbert".to_string()
}

fn default_device() -> String {
    "cpu".to_string()
}

fn default_inference_url() -> String {
    "http://localhost:8001".to_string()
}

impl Default for SentimentConfig {
    fn default() -> Self {
        Self {
            max_articles: default_max_articles(),
            cache_ttl_minutes: default_sentiment_ttl(),
            model_id: default_model_id(),
            device: default_device(),
            inference_url: default_inference_url(),
            feeds: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScannerConfig {
    /// Minimum last close for a candidate to pass validation.
    #[serde(default = "default_price_floor")]
    pub price_floor: f64,
    /// Minimum 20-day mean volume; indices are exempt.
    #[serde(default = "default_volume_floor")]
    pub volume_floor: f64,
}

fn default_price_floor() -> f64 {
    1.0
}

fn default_volume_floor() -> f64 {
    100_000.0
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            price_floor: default_price_floor(),
            volume_floor: default_volume_floor(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegimeConfig {
    /// Annualized vol below this is CALM.
    #[serde(default = "default_calm_pct")]
    pub calm_threshold_pct: f64,
    /// Annualized vol above this is HIGH_VOL.
    #[serde(default = "default_highvol_pct")]
    pub highvol_threshold_pct: f64,
    /// Symbol of the primary local index.
    #[serde(default = "default_local_index")]
    pub local_index: String,
}

fn default_calm_pct() -> f64 {
    12.0
}

fn default_highvol_pct() -> f64 {
    22.0
}

fn default_local_index() -> String {
    "^AXJO".to_string()
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            calm_threshold_pct: default_calm_pct(),
            highvol_threshold_pct: default_highvol_pct(),
            local_index: default_local_index(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GapConfig {
    /// Single scaling knob between overnight US moves and the local open.
    #[serde(default = "default_correlation")]
    pub correlation: f64,
    #[serde(default = "default_us_indices")]
    pub us_indices: Vec<String>,
    /// Per-index weights; equal when empty or mismatched in length.
    #[serde(default)]
    pub us_weights: Vec<f64>,
    #[serde(default = "default_timezone")]
    pub exchange_timezone: String,
}

fn default_correlation() -> f64 {
    0.65
}

fn default_us_indices() -> Vec<String> {
    vec!["^GSPC".to_string(), "^IXIC".to_string(), "^DJI".to_string()]
}

fn default_timezone() -> String {
    "Australia/Sydney".to_string()
}

impl Default for GapConfig {
    fn default() -> Self {
        Self {
            correlation: default_correlation(),
            us_indices: default_us_indices(),
            us_weights: Vec::new(),
            exchange_timezone: default_timezone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnsembleWeights {
    pub lstm: f64,
    pub trend: f64,
    pub technical: f64,
    pub sentiment: f64,
}

impl Default for EnsembleWeights {
    fn default() -> Self {
        Self {
            lstm: 0.45,
            trend: 0.25,
            technical: 0.15,
            sentiment: 0.15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnsembleConfig {
    #[serde(default)]
    pub weights: EnsembleWeights,
    #[serde(default = "default_models_path")]
    pub models_path: PathBuf,
}

fn default_models_path() -> PathBuf {
    PathBuf::from("./models")
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            weights: EnsembleWeights::default(),
            models_path: default_models_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorConfig {
    /// Parallelism cap for the scan and predict worker pools.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_market_context_timeout")]
    pub market_context_timeout_s: u64,
    #[serde(default = "default_sector_timeout")]
    pub sector_timeout_s: u64,
    #[serde(default = "default_predict_timeout")]
    pub predict_timeout_s: u64,
    /// Scan only the first 5 symbols per sector.
    #[serde(default)]
    pub test_mode: bool,
}

fn default_workers() -> usize {
    2
}

fn default_market_context_timeout() -> u64 {
    60
}

fn default_sector_timeout() -> u64 {
    300
}

fn default_predict_timeout() -> u64 {
    60
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            market_context_timeout_s: default_market_context_timeout(),
            sector_timeout_s: default_sector_timeout(),
            predict_timeout_s: default_predict_timeout(),
            test_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistenceConfig {
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,
    #[serde(default = "default_runs_path")]
    pub runs_path: PathBuf,
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("./cache")
}

fn default_runs_path() -> PathBuf {
    PathBuf::from("./reports")
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            cache_path: default_cache_path(),
            runs_path: default_runs_path(),
        }
    }
}

impl Config {
    /// Parse and validate a TOML config document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ScreenerError> {
        let config: Config =
            toml::from_str(raw).map_err(|e| ScreenerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ScreenerError> {
        toml::to_string_pretty(self).map_err(|e| ScreenerError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ScreenerError> {
        if self.universe.sectors.is_empty() {
            return Err(ScreenerError::Config(
                "universe.sectors must not be empty".to_string(),
            ));
        }
        for (sector, symbols) in &self.universe.sectors {
            if symbols.is_empty() {
                return Err(ScreenerError::Config(format!(
                    "sector {} has no symbols",
                    sector
                )));
            }
        }
        if self.fetcher.providers.is_empty() {
            return Err(ScreenerError::Config(
                "fetcher.providers must not be empty".to_string(),
            ));
        }
        let w = &self.ensemble.weights;
        let sum = w.lstm + w.trend + w.technical + w.sentiment;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(ScreenerError::Config(format!(
                "ensemble.weights must sum to 1.0, got {:.4}",
                sum
            )));
        }
        if self.orchestrator.workers == 0 {
            return Err(ScreenerError::Config(
                "orchestrator.workers must be at least 1".to_string(),
            ));
        }
        if self.regime.calm_threshold_pct >= self.regime.highvol_threshold_pct {
            return Err(ScreenerError::Config(
                "regime thresholds must satisfy calm < highvol".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply the `RUN_HOME` environment override to persistence roots.
    pub fn apply_run_home(&mut self, run_home: Option<&str>) {
        if let Some(home) = run_home {
            let home = PathBuf::from(home);
            self.persistence.cache_path = home.join("cache");
            self.persistence.runs_path = home.join("reports");
        }
    }
}
