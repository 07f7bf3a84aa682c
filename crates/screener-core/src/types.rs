use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ScreenerError;

/// Daily OHLCV bar. Volume may be zero or absent for index symbols.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub adjusted_close: Option<f64>,
    pub volume: f64,
}

/// Fetch window for a price series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    ThreeMonths,
    SixMonths,
    OneYear,
}

impl Period {
    /// Stable label used in cache keys and file names.
    pub fn label(&self) -> &'static str {
        match self {
            Period::ThreeMonths => "3mo",
            Period::SixMonths => "6mo",
            Period::OneYear => "1y",
        }
    }

    /// Approximate calendar days covered by the window.
    pub fn days(&self) -> i64 {
        match self {
            Period::ThreeMonths => 92,
            Period::SixMonths => 183,
            Period::OneYear => 366,
        }
    }
}

/// Ordered bar sequence for one symbol and one period, tagged with the
/// provider that served it. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSeries {
    pub symbol: String,
    pub period: Period,
    pub bars: Vec<Bar>,
    pub source: String,
    pub fetched_at: DateTime<Utc>,
    /// Actual (first, last) bar timestamps. Gaps are never filled silently.
    pub span: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl PriceSeries {
    /// Build a series from raw bars. Bars are sorted by timestamp and
    /// duplicates rejected so the sequence is strictly increasing.
    pub fn new(
        symbol: impl Into<String>,
        period: Period,
        mut bars: Vec<Bar>,
        source: impl Into<String>,
    ) -> Result<Self, ScreenerError> {
        let symbol = symbol.into();
        bars.sort_by_key(|b| b.timestamp);
        for w in bars.windows(2) {
            if w[1].timestamp <= w[0].timestamp {
                return Err(ScreenerError::Internal(format!(
                    "non-increasing bar timestamps for {}",
                    symbol
                )));
            }
        }
        let span = match (bars.first(), bars.last()) {
            (Some(first), Some(last)) => Some((first.timestamp, last.timestamp)),
            _ => None,
        };
        Ok(Self {
            symbol,
            period,
            bars,
            source: source.into(),
            fetched_at: Utc::now(),
            span,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.volume).collect()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.bars.last().map(|b| b.close)
    }
}

/// Latest quote for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    pub prev_close: f64,
    #[serde(default)]
    pub volume: Option<f64>,
    pub asof: DateTime<Utc>,
}

/// News article fetched from a configured source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsArticle {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub summary: Option<String>,
    pub published_at: DateTime<Utc>,
    pub source: String,
    pub symbol_hint: String,
}

/// Three-way classifier label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

/// Per-article classifier output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleSentiment {
    pub article_url: String,
    pub label: SentimentLabel,
    /// Signed score: p_pos - p_neg, in [-1, 1].
    pub score: f64,
    /// max(p_pos, p_neu, p_neg), in [0, 1].
    pub confidence: f64,
}

/// Confidence-weighted sentiment aggregate for one symbol.
/// `article_count == 0` is the distinct "no news" state; such a value never
/// feeds the ensemble sentiment component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateSentiment {
    pub symbol: String,
    pub direction: f64,
    pub confidence: f64,
    pub article_count: usize,
    pub sources: Vec<String>,
    pub computed_at: DateTime<Utc>,
}

impl AggregateSentiment {
    /// Sentinel for symbols with no recent news.
    pub fn no_news(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            direction: 0.0,
            confidence: 0.0,
            article_count: 0,
            sources: Vec::new(),
            computed_at: Utc::now(),
        }
    }
}

/// Volatility regime of the local market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegimeLabel {
    Calm,
    Normal,
    HighVol,
    Unknown,
}

impl RegimeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegimeLabel::Calm => "CALM",
            RegimeLabel::Normal => "NORMAL",
            RegimeLabel::HighVol => "HIGH_VOL",
            RegimeLabel::Unknown => "UNKNOWN",
        }
    }
}

/// Percentage changes of the local index over recent sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalIndexStats {
    pub last: f64,
    pub pct_1d: f64,
    pub pct_5d: f64,
    pub pct_7d: f64,
    pub pct_14d: f64,
}

/// Prior-session move of one foreign index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMove {
    pub symbol: String,
    pub name: String,
    pub last_close: f64,
    pub change_1d_pct: f64,
}

/// Market-bias band derived from the 0-100 sentiment score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SentimentBand {
    StrongBuy,
    Buy,
    Hold,
    Neutral,
    Sell,
    StrongSell,
}

impl SentimentBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentBand::StrongBuy => "STRONG_BUY",
            SentimentBand::Buy => "BUY",
            SentimentBand::Hold => "HOLD",
            SentimentBand::Neutral => "NEUTRAL",
            SentimentBand::Sell => "SELL",
            SentimentBand::StrongSell => "STRONG_SELL",
        }
    }
}

/// Market-wide context assembled before scanning: local index stats,
/// foreign closes, the opening-gap prediction and the volatility regime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub asof: DateTime<Utc>,
    pub local_index: Option<LocalIndexStats>,
    pub us_indices: Vec<IndexMove>,
    pub predicted_gap_pct: f64,
    /// 0-100 confidence in the gap prediction.
    pub gap_confidence: f64,
    /// 0-100 market sentiment score.
    pub market_score: f64,
    pub band: SentimentBand,
    pub regime: RegimeLabel,
    pub crash_risk: f64,
    /// Set when any input index could not be fetched.
    pub degraded: bool,
}

impl MarketSnapshot {
    /// Neutral snapshot used when the market-context phase fails outright.
    pub fn unavailable() -> Self {
        Self {
            asof: Utc::now(),
            local_index: None,
            us_indices: Vec::new(),
            predicted_gap_pct: 0.0,
            gap_confidence: 0.0,
            market_score: 50.0,
            band: SentimentBand::Neutral,
            regime: RegimeLabel::Unknown,
            crash_risk: 0.0,
            degraded: true,
        }
    }
}

/// Scanner output for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub symbol: String,
    pub sector: String,
    pub price: f64,
    pub avg_volume: f64,
    pub rsi14: f64,
    pub ma20: f64,
    pub ma50: f64,
    pub volatility20: f64,
    pub volume_consistency: f64,
    /// 0-100 technical score.
    pub score: f64,
    pub valid: bool,
    pub reasons: Vec<String>,
}

/// Trade direction implied by an ensemble prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Buy,
    Hold,
    Sell,
}

impl Signal {
    /// Direction-to-signal mapping: >= +0.30 BUY, <= -0.30 SELL, else HOLD.
    pub fn from_direction(direction: f64) -> Self {
        if direction >= 0.30 {
            Signal::Buy
        } else if direction <= -0.30 {
            Signal::Sell
        } else {
            Signal::Hold
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Buy => "BUY",
            Signal::Hold => "HOLD",
            Signal::Sell => "SELL",
        }
    }
}

/// Where the ensemble's sentiment component came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SentimentOrigin {
    /// Real articles were classified.
    Articles { count: usize },
    /// No news: direction derived from the predicted opening gap.
    GapProxy,
}

/// One ensemble component's contribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentScore {
    pub direction: f64,
    pub confidence: f64,
    /// Effective weight after redistribution, in [0, 1].
    pub weight: f64,
}

/// Per-component breakdown attached to each prediction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentScores {
    #[serde(default)]
    pub lstm: Option<ComponentScore>,
    #[serde(default)]
    pub trend: Option<ComponentScore>,
    #[serde(default)]
    pub technical: Option<ComponentScore>,
    #[serde(default)]
    pub sentiment: Option<ComponentScore>,
    pub sentiment_origin: SentimentOrigin,
}

/// Next-session directional prediction for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub symbol: String,
    pub direction: f64,
    pub confidence: f64,
    pub signal: Signal,
    pub components: ComponentScores,
    pub asof: DateTime<Utc>,
}

/// Ranked, explained candidate for the morning report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub symbol: String,
    pub sector: String,
    pub price: f64,
    pub scan_score: f64,
    pub prediction: Prediction,
    pub combined_score: f64,
    pub rank: usize,
    pub explanation: String,
}

/// Pipeline phases, executed strictly in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Init,
    MarketContext,
    Scan,
    Predict,
    Rank,
    Emit,
    Close,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::MarketContext => "market_context",
            Phase::Scan => "scan",
            Phase::Predict => "predict",
            Phase::Rank => "rank",
            Phase::Emit => "emit",
            Phase::Close => "close",
        }
    }
}

/// Outcome of a single phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PhaseStatus {
    Ok,
    /// Finished, but some units failed.
    Degraded { failed: usize, total: usize },
    /// Zero units succeeded.
    Failed { reason: String },
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: Phase,
    pub status: PhaseStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Running,
    Done,
    Partial,
    Cancelled,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Done => "DONE",
            RunStatus::Partial => "PARTIAL",
            RunStatus::Cancelled => "CANCELLED",
            RunStatus::Failed => "FAILED",
        }
    }

    /// Process exit code per the CLI contract.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Done => 0,
            RunStatus::Partial => 1,
            RunStatus::Running | RunStatus::Cancelled | RunStatus::Failed => 2,
        }
    }
}

/// Observability counters accumulated over a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunCounters {
    pub provider_failovers: u64,
    pub cache_hits: u64,
    pub symbols_dropped: u64,
    pub component_failures: u64,
}

/// Persisted run record; checkpointed between phases so a crashed run is
/// recoverable or at least inspectable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub phase: Phase,
    pub phases: Vec<PhaseRecord>,
    pub artifacts: Vec<String>,
    #[serde(default)]
    pub counters: RunCounters,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl RunState {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
            phase: Phase::Init,
            phases: Vec::new(),
            artifacts: Vec::new(),
            counters: RunCounters::default(),
            failure_reason: None,
        }
    }

    pub fn begin_phase(&mut self, phase: Phase) {
        self.phase = phase;
        self.phases.push(PhaseRecord {
            phase,
            status: PhaseStatus::Ok,
            started_at: Utc::now(),
            finished_at: None,
        });
    }

    pub fn finish_phase(&mut self, phase: Phase, status: PhaseStatus) {
        if let Some(rec) = self.phases.iter_mut().rev().find(|r| r.phase == phase) {
            rec.status = status;
            rec.finished_at = Some(Utc::now());
        }
    }

    pub fn phase_status(&self, phase: Phase) -> Option<&PhaseStatus> {
        self.phases
            .iter()
            .rev()
            .find(|r| r.phase == phase)
            .map(|r| &r.status)
    }

    pub fn any_degraded(&self) -> bool {
        self.phases
            .iter()
            .any(|r| matches!(r.status, PhaseStatus::Degraded { .. } | PhaseStatus::Failed { .. }))
    }
}

/// Universe grouping: sector name to symbol list. BTreeMap keeps sector
/// iteration order deterministic across runs.
pub type SectorMap = BTreeMap<String, Vec<String>>;

/// True for caret-prefixed index symbols (`^AXJO`, `^GSPC`).
pub fn is_index_symbol(symbol: &str) -> bool {
    symbol.starts_with('^')
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(day: u32, close: f64) -> Bar {
        Bar {
            timestamp: Utc.with_ymd_and_hms(2025, 7, day, 0, 0, 0).unwrap(),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            adjusted_close: None,
            volume: 1000.0,
        }
    }

    #[test]
    fn series_sorts_and_records_span() {
        let series = PriceSeries::new(
            "BHP.AX",
            Period::ThreeMonths,
            vec![bar(3, 10.0), bar(1, 9.0), bar(2, 9.5)],
            "yahoo_chart",
        )
        .unwrap();

        let closes = series.closes();
        assert_eq!(closes, vec![9.0, 9.5, 10.0]);
        let (first, last) = series.span.unwrap();
        assert!(first < last);
    }

    #[test]
    fn series_rejects_duplicate_timestamps() {
        let result = PriceSeries::new(
            "BHP.AX",
            Period::ThreeMonths,
            vec![bar(1, 9.0), bar(1, 9.5)],
            "yahoo_chart",
        );
        assert!(result.is_err());
    }

    #[test]
    fn signal_mapping_matches_thresholds() {
        assert_eq!(Signal::from_direction(0.30), Signal::Buy);
        assert_eq!(Signal::from_direction(0.299), Signal::Hold);
        assert_eq!(Signal::from_direction(-0.30), Signal::Sell);
        assert_eq!(Signal::from_direction(-0.299), Signal::Hold);
        assert_eq!(Signal::from_direction(0.0), Signal::Hold);
    }

    #[test]
    fn no_news_sentinel_is_distinct() {
        let s = AggregateSentiment::no_news("CBA.AX");
        assert_eq!(s.article_count, 0);
        assert_eq!(s.direction, 0.0);
        assert_eq!(s.confidence, 0.0);
    }

    #[test]
    fn run_state_phase_bookkeeping() {
        let mut state = RunState::new("run-1");
        state.begin_phase(Phase::Scan);
        state.finish_phase(Phase::Scan, PhaseStatus::Degraded { failed: 1, total: 5 });

        assert!(state.any_degraded());
        assert!(matches!(
            state.phase_status(Phase::Scan),
            Some(PhaseStatus::Degraded { failed: 1, total: 5 })
        ));
    }

    #[test]
    fn index_symbols_detected() {
        assert!(is_index_symbol("^AXJO"));
        assert!(!is_index_symbol("BHP.AX"));
    }
}
