use crate::models::{Candle, Recommendation};
use anyhow::Result;
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Everything a scorer may look at for one symbol on one simulated day.
/// Every candle is dated on or before `as_of`.
#[derive(Debug, Clone)]
pub struct PointInTimeData {
    pub symbol: String,
    pub as_of: NaiveDate,
    pub candles: Vec<Candle>,
}

impl PointInTimeData {
    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreOutcome {
    pub composite_score: f64,
    pub confidence: f64,
    pub recommendation: Recommendation,
    pub agent_scores: BTreeMap<String, f64>,
    pub market_regime: Option<String>,
    pub error: Option<String>,
}

impl ScoreOutcome {
    /// Reason the outcome cannot be used as a signal, if any.
    pub fn rejection_reason(&self) -> Option<String> {
        if let Some(error) = &self.error {
            return Some(error.clone());
        }
        if !self.composite_score.is_finite() {
            return Some(format!("non-finite composite score {}", self.composite_score));
        }
        if self.composite_score == 0.0 {
            return Some("degenerate zero composite score".to_string());
        }
        None
    }
}

/// Produces a recommendation from point-in-time data. Implementations must be
/// shareable across worker threads and must not consult anything dated after
/// `data.as_of`.
pub trait Scorer: Send + Sync {
    fn score(&self, symbol: &str, data: &PointInTimeData) -> Result<ScoreOutcome>;
}
