//! Overnight pipeline orchestrator. Phases run strictly in order:
//! Init -> Market context -> Scan -> Predict -> Rank -> Emit -> Close.
//! Market context components run concurrently; scan and predict fan out
//! per symbol through a bounded worker pool. Run state is checkpointed at
//! every phase boundary, and the pipeline always attempts to emit at
//! least a diagnostic report.

pub mod run_store;

pub use run_store::RunStateStore;

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::timeout;

use ensemble_predictor::EnsemblePredictor;
use gap_monitor::GapMonitor;
use market_data::DataFetcher;
use market_regime::RegimeEngine;
use opportunity_ranker::OpportunityRanker;
use report_generator::{ReportWriter, SectorReport};
use screener_core::{
    BarFeed, Config, MarketSnapshot, Opportunity, Period, Phase, PhaseStatus, Prediction,
    RegimeLabel, RunState, RunStatus, ScanResult, SentimentFeed,
};
use stock_scanner::{SectorScan, StockScanner};

/// Symbols scanned per sector when `--test-mode` is set.
const TEST_MODE_SYMBOLS: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub run_id: Option<String>,
    /// Restrict the run to these sectors.
    pub sectors: Option<Vec<String>>,
    pub test_mode: bool,
    pub skip_predict: bool,
}

#[derive(Debug)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub exit_code: i32,
    pub artifacts: Vec<PathBuf>,
}

pub struct Pipeline {
    config: Config,
    feed: Arc<dyn BarFeed>,
    regime_engine: RegimeEngine,
    gap_monitor: GapMonitor,
    scanner: StockScanner,
    predictor: Arc<EnsemblePredictor>,
    ranker: OpportunityRanker,
    reporter: ReportWriter,
    store: RunStateStore,
    cancel: watch::Receiver<bool>,
    /// Set when the feed is the production fetcher; source of the
    /// failover/cache counters in run state.
    fetcher: Option<Arc<DataFetcher>>,
}

impl Pipeline {
    pub fn new(
        config: Config,
        feed: Arc<dyn BarFeed>,
        sentiment: Arc<dyn SentimentFeed>,
        store: RunStateStore,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        let regime_engine = RegimeEngine::new(&config.regime);
        let gap_monitor = GapMonitor::new(
            Arc::clone(&feed),
            config.gap.clone(),
            config.regime.local_index.clone(),
        );
        let scanner = StockScanner::new(Arc::clone(&feed), config.scanner.clone());
        let predictor = Arc::new(EnsemblePredictor::new(
            Arc::clone(&feed),
            sentiment,
            &config.ensemble,
        ));
        let ranker = OpportunityRanker::default();
        let reporter = ReportWriter::new(&config.persistence.runs_path);

        Self {
            config,
            feed,
            regime_engine,
            gap_monitor,
            scanner,
            predictor,
            ranker,
            reporter,
            store,
            cancel,
            fetcher: None,
        }
    }

    /// Wire the production fetcher in for observability counters.
    pub fn with_fetcher_stats(mut self, fetcher: Arc<DataFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    async fn checkpoint(&self, state: &RunState) {
        if let Err(e) = self.store.checkpoint(state).await {
            tracing::warn!("run-state checkpoint failed: {}", e);
        }
    }

    /// Execute a full run. Never returns an error for in-run failures;
    /// the outcome is encoded in the summary status and exit code.
    pub async fn run(&self, opts: RunOptions) -> RunSummary {
        let run_id = opts
            .run_id
            .clone()
            .unwrap_or_else(|| format!("run-{}", Utc::now().format("%Y%m%d-%H%M%S")));
        tracing::info!("starting overnight run {}", run_id);

        let mut state = RunState::new(&run_id);
        let mut fatal: Option<String> = None;
        let mut was_cancelled = false;

        // Init.
        state.begin_phase(Phase::Init);
        state.finish_phase(Phase::Init, PhaseStatus::Ok);
        self.checkpoint(&state).await;

        // Market context: regime and gap monitor concurrently.
        state.begin_phase(Phase::MarketContext);
        let snapshot = match self.market_context_phase(&mut state).await {
            Ok(snapshot) => snapshot,
            Err(reason) => {
                fatal = Some(reason);
                MarketSnapshot::unavailable()
            }
        };
        self.checkpoint(&state).await;

        // Scan.
        let mut sector_scans: Vec<SectorScan> = Vec::new();
        if fatal.is_none() {
            state.begin_phase(Phase::Scan);
            match self.scan_phase(&opts, &mut state, &mut sector_scans).await {
                ScanOutcome::Complete => {}
                ScanOutcome::Cancelled => was_cancelled = true,
                ScanOutcome::Failed(reason) => fatal = Some(reason),
            }
            self.checkpoint(&state).await;
        }

        // Predict.
        let mut predictions: Vec<Prediction> = Vec::new();
        if fatal.is_none() && !was_cancelled {
            state.begin_phase(Phase::Predict);
            if opts.skip_predict {
                tracing::info!("predict phase skipped by request");
                state.finish_phase(Phase::Predict, PhaseStatus::Skipped);
            } else {
                was_cancelled = self
                    .predict_phase(&sector_scans, &snapshot, &mut state, &mut predictions)
                    .await;
            }
            self.checkpoint(&state).await;
        }

        // Rank: in-process and deterministic.
        let mut opportunities: Vec<Opportunity> = Vec::new();
        if fatal.is_none() {
            state.begin_phase(Phase::Rank);
            let valid_scans: Vec<ScanResult> = sector_scans
                .iter()
                .flat_map(|s| s.results.iter().cloned())
                .collect();
            opportunities = self.ranker.rank(&valid_scans, &predictions, &snapshot);
            state.finish_phase(Phase::Rank, PhaseStatus::Ok);
            self.checkpoint(&state).await;
        }

        // Emit: always attempted, even for failed or cancelled runs.
        state.begin_phase(Phase::Emit);
        self.collect_counters(&mut state, &sector_scans);
        let sectors_report: Vec<SectorReport> = sector_scans
            .iter()
            .map(|s| SectorReport {
                name: s.sector.clone(),
                scans: s
                    .results
                    .iter()
                    .chain(s.rejected.iter())
                    .cloned()
                    .collect(),
            })
            .collect();

        // Resolve final status before writing so the artifacts carry it.
        state.status = if let Some(reason) = &fatal {
            state.failure_reason = Some(reason.clone());
            RunStatus::Failed
        } else if was_cancelled || self.cancelled() {
            RunStatus::Cancelled
        } else if state.any_degraded() {
            RunStatus::Partial
        } else {
            RunStatus::Done
        };
        state.finished_at = Some(Utc::now());

        let artifacts = match self.reporter.write_all(
            &state,
            &snapshot,
            &sectors_report,
            &predictions,
            &opportunities,
        ) {
            Ok(paths) => {
                state.artifacts = paths
                    .iter()
                    .map(|p| p.to_string_lossy().to_string())
                    .collect();
                state.finish_phase(Phase::Emit, PhaseStatus::Ok);
                paths
            }
            Err(e) => {
                tracing::error!("artifact emit failed: {}", e);
                state.finish_phase(
                    Phase::Emit,
                    PhaseStatus::Failed {
                        reason: e.to_string(),
                    },
                );
                state.status = RunStatus::Failed;
                Vec::new()
            }
        };

        // Close.
        state.begin_phase(Phase::Close);
        state.finish_phase(Phase::Close, PhaseStatus::Ok);
        self.checkpoint(&state).await;

        tracing::info!(
            "run {} finished: {} ({} opportunities)",
            run_id,
            state.status.as_str(),
            opportunities.len()
        );

        RunSummary {
            run_id,
            exit_code: state.status.exit_code(),
            status: state.status,
            artifacts,
        }
    }

    /// Regime and gap snapshot, concurrently, under one phase timeout.
    /// Returns Err only when both subsystems produced nothing.
    async fn market_context_phase(
        &self,
        state: &mut RunState,
    ) -> Result<MarketSnapshot, String> {
        let phase_timeout = Duration::from_secs(self.config.orchestrator.market_context_timeout_s);
        let local_index = self.config.regime.local_index.clone();

        let work = async {
            let regime_fut = async {
                let series = self.feed.ohlcv(&local_index, Period::OneYear).await?;
                Ok::<_, screener_core::ScreenerError>(
                    self.regime_engine.compute(&series.closes()),
                )
            };
            // The snapshot is assembled with a placeholder regime and
            // stitched after both futures resolve.
            let gap_fut = self.gap_monitor.build_snapshot(RegimeLabel::Unknown, 0.0);
            tokio::join!(regime_fut, gap_fut)
        };

        match timeout(phase_timeout, work).await {
            Ok((regime_result, mut snapshot)) => {
                let regime_ok = match regime_result {
                    Ok(assessment) => {
                        tracing::info!("regime: {}", assessment.reasoning);
                        snapshot.regime = assessment.label;
                        snapshot.crash_risk = assessment.crash_risk;
                        true
                    }
                    Err(e) => {
                        tracing::warn!("regime computation failed: {}", e);
                        snapshot.degraded = true;
                        false
                    }
                };
                let gap_ok =
                    snapshot.local_index.is_some() || !snapshot.us_indices.is_empty();

                if !regime_ok && !gap_ok {
                    state.finish_phase(
                        Phase::MarketContext,
                        PhaseStatus::Failed {
                            reason: "no market context source succeeded".to_string(),
                        },
                    );
                    return Err("market context failed".to_string());
                }

                let status = if regime_ok && gap_ok && !snapshot.degraded {
                    PhaseStatus::Ok
                } else {
                    PhaseStatus::Degraded {
                        failed: usize::from(!regime_ok) + usize::from(!gap_ok),
                        total: 2,
                    }
                };
                state.finish_phase(Phase::MarketContext, status);
                Ok(snapshot)
            }
            Err(_) => {
                tracing::warn!("market context phase timed out");
                state.finish_phase(
                    Phase::MarketContext,
                    PhaseStatus::Degraded { failed: 2, total: 2 },
                );
                Ok(MarketSnapshot::unavailable())
            }
        }
    }

    /// Sectors iterate serially; symbols within a sector fan out through
    /// the scanner's bounded pool.
    async fn scan_phase(
        &self,
        opts: &RunOptions,
        state: &mut RunState,
        sector_scans: &mut Vec<SectorScan>,
    ) -> ScanOutcome {
        let sector_timeout = Duration::from_secs(self.config.orchestrator.sector_timeout_s);
        let workers = self.config.orchestrator.workers;
        let top_n = self.config.universe.top_n_per_sector;
        let test_mode = opts.test_mode || self.config.orchestrator.test_mode;

        let mut attempted = 0usize;
        let mut failed = 0usize;
        let mut timed_out = false;
        let mut cancelled = false;

        for (sector, symbols) in &self.config.universe.sectors {
            if let Some(filter) = &opts.sectors {
                if !filter.iter().any(|s| s.eq_ignore_ascii_case(sector)) {
                    continue;
                }
            }
            if self.cancelled() {
                cancelled = true;
                break;
            }

            let symbols: Vec<String> = if test_mode {
                symbols.iter().take(TEST_MODE_SYMBOLS).cloned().collect()
            } else {
                symbols.clone()
            };
            attempted += symbols.len();

            tracing::info!("scanning {} ({} symbols)", sector, symbols.len());
            match timeout(
                sector_timeout,
                self.scanner
                    .scan_sector(sector, &symbols, top_n, workers, &self.cancel),
            )
            .await
            {
                Ok(scan) => {
                    failed += scan.errors.len();
                    sector_scans.push(scan);
                }
                Err(_) => {
                    tracing::warn!("sector {} timed out", sector);
                    timed_out = true;
                    failed += symbols.len();
                }
            }
        }

        let valid_total: usize = sector_scans.iter().map(|s| s.results.len()).sum();

        if cancelled || self.cancelled() {
            state.finish_phase(
                Phase::Scan,
                PhaseStatus::Degraded {
                    failed,
                    total: attempted,
                },
            );
            return ScanOutcome::Cancelled;
        }

        if attempted > 0 && valid_total == 0 {
            state.finish_phase(
                Phase::Scan,
                PhaseStatus::Failed {
                    reason: "no symbol passed the scan".to_string(),
                },
            );
            return ScanOutcome::Failed("scan produced zero valid results".to_string());
        }

        let status = if failed > 0 || timed_out {
            PhaseStatus::Degraded {
                failed,
                total: attempted,
            }
        } else {
            PhaseStatus::Ok
        };
        state.finish_phase(Phase::Scan, status);
        ScanOutcome::Complete
    }

    /// Bounded-pool prediction over the scanned candidates. Returns true
    /// when the phase stopped on cancellation.
    async fn predict_phase(
        &self,
        sector_scans: &[SectorScan],
        snapshot: &MarketSnapshot,
        state: &mut RunState,
        predictions: &mut Vec<Prediction>,
    ) -> bool {
        let per_symbol_timeout = Duration::from_secs(self.config.orchestrator.predict_timeout_s);
        let workers = self.config.orchestrator.workers.max(1);
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut tasks: JoinSet<(String, Result<Prediction, String>)> = JoinSet::new();
        let mut cancelled = false;

        let candidates: Vec<String> = sector_scans
            .iter()
            .flat_map(|s| s.results.iter().map(|r| r.symbol.clone()))
            .collect();
        let total = candidates.len();

        for symbol in candidates {
            if self.cancelled() {
                cancelled = true;
                break;
            }
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            let predictor = Arc::clone(&self.predictor);
            let snapshot = snapshot.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let result = match timeout(per_symbol_timeout, predictor.predict(&symbol, &snapshot))
                    .await
                {
                    Ok(Ok(prediction)) => Ok(prediction),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err("prediction timed out".to_string()),
                };
                (symbol, result)
            });
        }

        let mut failed = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(prediction))) => predictions.push(prediction),
                Ok((symbol, Err(e))) => {
                    tracing::warn!("{}: prediction dropped: {}", symbol, e);
                    failed += 1;
                }
                Err(e) => {
                    tracing::error!("prediction task panicked: {}", e);
                    failed += 1;
                }
            }
        }

        // Deterministic downstream order.
        predictions.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        let status = if total > 0 && predictions.is_empty() && !cancelled {
            // A failed predict phase still emits a diagnostic report.
            PhaseStatus::Failed {
                reason: "every prediction failed".to_string(),
            }
        } else if failed > 0 || cancelled {
            PhaseStatus::Degraded { failed, total }
        } else {
            PhaseStatus::Ok
        };
        state.finish_phase(Phase::Predict, status);
        cancelled
    }

    fn collect_counters(&self, state: &mut RunState, sector_scans: &[SectorScan]) {
        if let Some(fetcher) = &self.fetcher {
            let stats = fetcher.stats();
            state.counters.provider_failovers = stats.failovers;
            state.counters.cache_hits = stats.ohlcv_cache_hits + stats.quote_cache_hits;
        }
        state.counters.component_failures = self.predictor.component_failure_count();
        state.counters.symbols_dropped = sector_scans
            .iter()
            .map(|s| s.errors.len() as u64)
            .sum();
    }
}

enum ScanOutcome {
    Complete,
    Cancelled,
    Failed(String),
}
