//! Opportunity ranker: join scan results with predictions, compose the
//! combined score and emit a deterministically ordered, explained top-K
//! list. Ordering ties break by scan score, then symbol, so identical
//! inputs produce byte-identical artifacts.

use std::collections::HashMap;

use screener_core::{MarketSnapshot, Opportunity, Prediction, ScanResult, SentimentOrigin};

/// Combined score weights: 40% scanner, 60% prediction confidence.
const W_SCAN: f64 = 0.4;
const W_CONFIDENCE: f64 = 0.6;

/// Default size of the ranked list.
pub const DEFAULT_TOP_K: usize = 10;

pub struct OpportunityRanker {
    top_k: usize,
}

impl OpportunityRanker {
    pub fn new(top_k: usize) -> Self {
        Self {
            top_k: top_k.max(1),
        }
    }

    /// Rank all symbols that have both a valid scan and a prediction.
    pub fn rank(
        &self,
        scans: &[ScanResult],
        predictions: &[Prediction],
        snapshot: &MarketSnapshot,
    ) -> Vec<Opportunity> {
        let by_symbol: HashMap<&str, &Prediction> = predictions
            .iter()
            .map(|p| (p.symbol.as_str(), p))
            .collect();

        let mut opportunities: Vec<Opportunity> = scans
            .iter()
            .filter(|s| s.valid)
            .filter_map(|scan| {
                let prediction = by_symbol.get(scan.symbol.as_str())?;
                let combined_score =
                    W_SCAN * scan.score + W_CONFIDENCE * (prediction.confidence * 100.0);
                Some(Opportunity {
                    symbol: scan.symbol.clone(),
                    sector: scan.sector.clone(),
                    price: scan.price,
                    scan_score: scan.score,
                    prediction: (*prediction).clone(),
                    combined_score,
                    rank: 0,
                    explanation: explain(scan, prediction, snapshot),
                })
            })
            .collect();

        // Descending combined score; ties by scan score, then symbol.
        opportunities.sort_by(|a, b| {
            b.combined_score
                .total_cmp(&a.combined_score)
                .then_with(|| b.scan_score.total_cmp(&a.scan_score))
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        opportunities.truncate(self.top_k);

        for (i, opp) in opportunities.iter_mut().enumerate() {
            opp.rank = i + 1;
        }
        opportunities
    }
}

impl Default for OpportunityRanker {
    fn default() -> Self {
        Self::new(DEFAULT_TOP_K)
    }
}

/// Name the dominant ensemble component(s) and the market context.
fn explain(scan: &ScanResult, prediction: &Prediction, snapshot: &MarketSnapshot) -> String {
    let mut contributions: Vec<(&str, f64)> = Vec::new();
    if let Some(c) = &prediction.components.lstm {
        contributions.push(("price model", c.weight * c.direction.abs()));
    }
    if let Some(c) = &prediction.components.trend {
        contributions.push(("trend", c.weight * c.direction.abs()));
    }
    if let Some(c) = &prediction.components.technical {
        contributions.push(("technicals", c.weight * c.direction.abs()));
    }
    if let Some(c) = &prediction.components.sentiment {
        let label = match prediction.components.sentiment_origin {
            SentimentOrigin::Articles { .. } => "news sentiment",
            SentimentOrigin::GapProxy => "market gap bias",
        };
        contributions.push((label, c.weight * c.direction.abs()));
    }
    contributions.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    let dominant: Vec<&str> = contributions
        .iter()
        .take(2)
        .filter(|(_, v)| *v > 0.0)
        .map(|(name, _)| *name)
        .collect();

    let driver = if dominant.is_empty() {
        "no directional driver".to_string()
    } else {
        format!("driven by {}", dominant.join(" and "))
    };

    format!(
        "{} {} ({:.0}% confidence), scan {:.0}/100, {}; market regime {}",
        prediction.signal.as_str(),
        scan.symbol,
        prediction.confidence * 100.0,
        scan.score,
        driver,
        snapshot.regime.as_str()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use screener_core::{
        ComponentScore, ComponentScores, RegimeLabel, SentimentBand, Signal,
    };

    fn scan(symbol: &str, score: f64) -> ScanResult {
        ScanResult {
            symbol: symbol.to_string(),
            sector: "Financials".to_string(),
            price: 100.0,
            avg_volume: 500_000.0,
            rsi14: 55.0,
            ma20: 100.0,
            ma50: 98.0,
            volatility20: 0.01,
            volume_consistency: 0.8,
            score,
            valid: true,
            reasons: vec![],
        }
    }

    fn prediction(symbol: &str, direction: f64, confidence: f64) -> Prediction {
        Prediction {
            symbol: symbol.to_string(),
            direction,
            confidence,
            signal: Signal::from_direction(direction),
            components: ComponentScores {
                lstm: None,
                trend: Some(ComponentScore {
                    direction,
                    confidence,
                    weight: 0.6,
                }),
                technical: Some(ComponentScore {
                    direction: direction / 2.0,
                    confidence,
                    weight: 0.4,
                }),
                sentiment: None,
                sentiment_origin: screener_core::SentimentOrigin::GapProxy,
            },
            asof: Utc::now(),
        }
    }

    fn snapshot() -> MarketSnapshot {
        MarketSnapshot {
            asof: Utc::now(),
            local_index: None,
            us_indices: vec![],
            predicted_gap_pct: 0.3,
            gap_confidence: 80.0,
            market_score: 60.0,
            band: SentimentBand::Buy,
            regime: RegimeLabel::Normal,
            crash_risk: 0.2,
            degraded: false,
        }
    }

    #[test]
    fn combined_score_composition() {
        let ranker = OpportunityRanker::default();
        let opportunities = ranker.rank(
            &[scan("CBA.AX", 80.0)],
            &[prediction("CBA.AX", 0.5, 0.7)],
            &snapshot(),
        );

        assert_eq!(opportunities.len(), 1);
        // 0.4 * 80 + 0.6 * 70 = 74
        assert!((opportunities[0].combined_score - 74.0).abs() < 1e-9);
        assert_eq!(opportunities[0].rank, 1);
    }

    #[test]
    fn sorted_descending_with_deterministic_ties() {
        let ranker = OpportunityRanker::default();
        let scans = vec![scan("BBB.AX", 70.0), scan("AAA.AX", 70.0), scan("CCC.AX", 90.0)];
        let predictions = vec![
            prediction("AAA.AX", 0.4, 0.5),
            prediction("BBB.AX", 0.4, 0.5),
            prediction("CCC.AX", 0.4, 0.5),
        ];

        let opportunities = ranker.rank(&scans, &predictions, &snapshot());

        let symbols: Vec<&str> = opportunities.iter().map(|o| o.symbol.as_str()).collect();
        // CCC wins on scan score; AAA/BBB tie on everything, symbol breaks it.
        assert_eq!(symbols, vec!["CCC.AX", "AAA.AX", "BBB.AX"]);
        assert_eq!(
            opportunities.iter().map(|o| o.rank).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn invalid_scans_and_missing_predictions_are_excluded() {
        let ranker = OpportunityRanker::default();
        let mut invalid = scan("XXX.AX", 95.0);
        invalid.valid = false;
        let scans = vec![invalid, scan("CBA.AX", 60.0), scan("NAB.AX", 60.0)];
        // NAB has no prediction.
        let predictions = vec![prediction("CBA.AX", 0.2, 0.6), prediction("XXX.AX", 0.9, 0.9)];

        let opportunities = ranker.rank(&scans, &predictions, &snapshot());
        assert_eq!(opportunities.len(), 1);
        assert_eq!(opportunities[0].symbol, "CBA.AX");
    }

    #[test]
    fn top_k_truncates() {
        let ranker = OpportunityRanker::new(2);
        let scans: Vec<ScanResult> = (0..5).map(|i| scan(&format!("S{}.AX", i), 50.0 + i as f64)).collect();
        let predictions: Vec<Prediction> = (0..5)
            .map(|i| prediction(&format!("S{}.AX", i), 0.4, 0.5))
            .collect();

        let opportunities = ranker.rank(&scans, &predictions, &snapshot());
        assert_eq!(opportunities.len(), 2);
        assert_eq!(opportunities[0].symbol, "S4.AX");
    }

    #[test]
    fn explanation_names_dominant_component() {
        let ranker = OpportunityRanker::default();
        let opportunities = ranker.rank(
            &[scan("CBA.AX", 80.0)],
            &[prediction("CBA.AX", 0.5, 0.7)],
            &snapshot(),
        );
        let explanation = &opportunities[0].explanation;
        assert!(explanation.contains("trend"), "{}", explanation);
        assert!(explanation.contains("NORMAL"), "{}", explanation);
    }
}
