//! Composite scoring and ranking.
//!
//! Metrics are min-max normalised within each symbol's cohort so strategies
//! compete on relative merit per symbol, then all candidates are ranked
//! globally by the weighted composite.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use tw_types::{BacktestMetrics, Parameters, RankedResult};

/// Weights of the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub total_return: f64,
    pub sharpe: f64,
    pub drawdown: f64,
    pub win_rate: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            total_return: 0.30,
            sharpe: 0.30,
            drawdown: 0.20,
            win_rate: 0.20,
        }
    }
}

/// One backtested (symbol, strategy) pair awaiting ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub strategy_id: Uuid,
    pub strategy_name: String,
    pub symbol: String,
    pub parameters: Parameters,
    pub metrics: BacktestMetrics,
}

/// Min-max normalise `value` within `[min, max]`. A degenerate cohort
/// (all values equal) normalises to 0.5 so the dimension is neutral.
fn norm(value: f64, min: f64, max: f64) -> f64 {
    if (max - min).abs() < f64::EPSILON {
        0.5
    } else {
        (value - min) / (max - min)
    }
}

struct CohortRange {
    ret: (f64, f64),
    sharpe: (f64, f64),
    drawdown: (f64, f64),
    win_rate: (f64, f64),
}

fn cohort_range(cohort: &[&Candidate]) -> CohortRange {
    let mut ret = (f64::MAX, f64::MIN);
    let mut sharpe = (f64::MAX, f64::MIN);
    let mut drawdown = (f64::MAX, f64::MIN);
    let mut win_rate = (f64::MAX, f64::MIN);

    for c in cohort {
        let m = &c.metrics;
        ret = (ret.0.min(m.total_return_pct), ret.1.max(m.total_return_pct));
        sharpe = (sharpe.0.min(m.sharpe_ratio), sharpe.1.max(m.sharpe_ratio));
        let dd = m.max_drawdown_pct.abs();
        drawdown = (drawdown.0.min(dd), drawdown.1.max(dd));
        win_rate = (win_rate.0.min(m.win_rate), win_rate.1.max(m.win_rate));
    }

    CohortRange {
        ret,
        sharpe,
        drawdown,
        win_rate,
    }
}

/// Rank candidates: normalise within each symbol cohort, apply the
/// composite weights, sort descending, assign 1-based ranks.
pub fn rank(candidates: Vec<Candidate>, weights: ScoreWeights) -> Vec<RankedResult> {
    let mut cohorts: HashMap<String, Vec<&Candidate>> = HashMap::new();
    for candidate in &candidates {
        cohorts
            .entry(candidate.symbol.clone())
            .or_default()
            .push(candidate);
    }
    let ranges: HashMap<String, CohortRange> = cohorts
        .iter()
        .map(|(symbol, cohort)| (symbol.clone(), cohort_range(cohort)))
        .collect();

    let mut scored: Vec<(f64, &Candidate)> = candidates
        .iter()
        .map(|candidate| {
            let range = &ranges[&candidate.symbol];
            let m = &candidate.metrics;
            let score = weights.total_return
                * norm(m.total_return_pct, range.ret.0, range.ret.1)
                + weights.sharpe * norm(m.sharpe_ratio, range.sharpe.0, range.sharpe.1)
                + weights.drawdown
                    * (1.0
                        - norm(
                            m.max_drawdown_pct.abs(),
                            range.drawdown.0,
                            range.drawdown.1,
                        ))
                + weights.win_rate * norm(m.win_rate, range.win_rate.0, range.win_rate.1);
            (score, candidate)
        })
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    scored
        .into_iter()
        .enumerate()
        .map(|(i, (score, candidate))| RankedResult {
            rank: i + 1,
            strategy_id: candidate.strategy_id,
            strategy_name: candidate.strategy_name.clone(),
            symbol: candidate.symbol.clone(),
            parameters: candidate.parameters.clone(),
            metrics: candidate.metrics.clone(),
            composite_score: score,
        })
        .collect()
}
