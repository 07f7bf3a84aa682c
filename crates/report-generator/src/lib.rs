//! Report generator: the three per-run artifacts (structured JSON,
//! tabular CSV, rendered HTML), written atomically under
//! `<runs_path>/<YYYY-MM-DD>/`. Identical inputs produce byte-identical
//! files.

pub mod template;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use screener_core::{
    MarketSnapshot, Opportunity, Prediction, RunState, ScanResult, ScreenerError, Signal,
};

/// Per-sector scan table carried into the JSON artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectorReport {
    pub name: String,
    pub scans: Vec<ScanResult>,
}

/// Top-level JSON document. Consumers tolerate extra fields; these keys
/// are stable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStateDoc {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: String,
    pub snapshot: MarketSnapshot,
    pub sectors: Vec<SectorReport>,
    pub predictions: Vec<Prediction>,
    pub opportunities: Vec<Opportunity>,
    pub run_state: RunState,
}

pub struct ReportWriter {
    runs_path: PathBuf,
}

impl ReportWriter {
    pub fn new(runs_path: &Path) -> Self {
        Self {
            runs_path: runs_path.to_path_buf(),
        }
    }

    /// Write all three artifacts; returns their paths in emit order.
    pub fn write_all(
        &self,
        run_state: &RunState,
        snapshot: &MarketSnapshot,
        sectors: &[SectorReport],
        predictions: &[Prediction],
        opportunities: &[Opportunity],
    ) -> Result<Vec<PathBuf>, ScreenerError> {
        let date = run_state.started_at.format("%Y-%m-%d").to_string();
        let dir = self.runs_path.join(&date);
        fs::create_dir_all(&dir).map_err(|e| ScreenerError::Internal(e.to_string()))?;

        let doc = PipelineStateDoc {
            run_id: run_state.run_id.clone(),
            started_at: run_state.started_at.to_rfc3339(),
            finished_at: run_state.finished_at.map(|t| t.to_rfc3339()),
            status: run_state.status.as_str().to_string(),
            snapshot: snapshot.clone(),
            sectors: sectors.to_vec(),
            predictions: predictions.to_vec(),
            opportunities: opportunities.to_vec(),
            run_state: run_state.clone(),
        };

        let json_path = dir.join("pipeline_state.json");
        let json_bytes = serde_json::to_vec_pretty(&doc)
            .map_err(|e| ScreenerError::Internal(e.to_string()))?;
        atomic_write(&json_path, &json_bytes)?;

        let csv_path = dir.join("opportunities.csv");
        atomic_write(&csv_path, render_csv(opportunities).as_bytes())?;

        let html_path = dir.join("morning_report.html");
        atomic_write(
            &html_path,
            render_html(run_state, snapshot, opportunities, &date).as_bytes(),
        )?;

        tracing::info!("wrote {} artifacts to {:?}", 3, dir);
        Ok(vec![json_path, csv_path, html_path])
    }
}

/// Write via a temp file and rename so readers never see a partial file.
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), ScreenerError> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).map_err(|e| ScreenerError::Internal(e.to_string()))?;
    fs::rename(&tmp, path).map_err(|e| ScreenerError::Internal(e.to_string()))?;
    Ok(())
}

/// One row per opportunity, fixed column order.
fn render_csv(opportunities: &[Opportunity]) -> String {
    let mut out = String::from(
        "rank,symbol,sector,price,scan_score,direction,signal,confidence,combined_score,explanation\n",
    );
    for opp in opportunities {
        out.push_str(&format!(
            "{},{},{},{:.2},{:.2},{:.4},{},{:.4},{:.2},{}\n",
            opp.rank,
            csv_field(&opp.symbol),
            csv_field(&opp.sector),
            opp.price,
            opp.scan_score,
            opp.prediction.direction,
            opp.prediction.signal.as_str(),
            opp.prediction.confidence,
            opp.combined_score,
            csv_field(&opp.explanation),
        ));
    }
    out
}

/// Quote a field when it contains a delimiter; double embedded quotes.
fn csv_field(raw: &str) -> String {
    if raw.contains(',') || raw.contains('"') || raw.contains('\n') {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

fn render_html(
    run_state: &RunState,
    snapshot: &MarketSnapshot,
    opportunities: &[Opportunity],
    date: &str,
) -> String {
    let rows = if opportunities.is_empty() {
        template::EMPTY_ROW.to_string()
    } else {
        opportunities
            .iter()
            .enumerate()
            .map(|(i, opp)| {
                let signal_color = match opp.prediction.signal {
                    Signal::Buy => "#22c55e",
                    Signal::Sell => "#ef4444",
                    Signal::Hold => "#64748b",
                };
                template::OPPORTUNITY_ROW
                    .replace("{{ROW_BG}}", if i % 2 == 0 { "#fff" } else { "#f8fafc" })
                    .replace("{{RANK}}", &opp.rank.to_string())
                    .replace("{{SYMBOL}}", &html_escape(&opp.symbol))
                    .replace("{{SECTOR}}", &html_escape(&opp.sector))
                    .replace("{{PRICE}}", &format!("{:.2}", opp.price))
                    .replace("{{SIGNAL_COLOR}}", signal_color)
                    .replace("{{SIGNAL}}", opp.prediction.signal.as_str())
                    .replace(
                        "{{CONFIDENCE}}",
                        &format!("{:.0}", opp.prediction.confidence * 100.0),
                    )
                    .replace("{{COMBINED}}", &format!("{:.1}", opp.combined_score))
            })
            .collect::<String>()
    };

    template::MORNING_REPORT
        .replace("{{RUN_DATE}}", date)
        .replace("{{RUN_ID}}", &html_escape(&run_state.run_id))
        .replace("{{STATUS}}", run_state.status.as_str())
        .replace("{{GAP_PCT}}", &format!("{:.3}", snapshot.predicted_gap_pct))
        .replace("{{MARKET_SCORE}}", &format!("{:.1}", snapshot.market_score))
        .replace("{{BAND}}", snapshot.band.as_str())
        .replace("{{REGIME}}", snapshot.regime.as_str())
        .replace("{{CRASH_RISK}}", &format!("{:.2}", snapshot.crash_risk))
        .replace("{{OPPORTUNITY_ROWS}}", &rows)
}

fn html_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
