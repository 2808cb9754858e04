use anyhow::anyhow;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// One OHLCV row indexed by trading date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub ticker: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    StrongBuy,
    Buy,
    WeakBuy,
    Hold,
    WeakSell,
    Sell,
    StrongSell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationFamily {
    Buy,
    Sell,
    Neutral,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::StrongBuy => "STRONG_BUY",
            Recommendation::Buy => "BUY",
            Recommendation::WeakBuy => "WEAK_BUY",
            Recommendation::Hold => "HOLD",
            Recommendation::WeakSell => "WEAK_SELL",
            Recommendation::Sell => "SELL",
            Recommendation::StrongSell => "STRONG_SELL",
        }
    }

    pub fn family(&self) -> RecommendationFamily {
        match self {
            Recommendation::StrongBuy | Recommendation::Buy | Recommendation::WeakBuy => {
                RecommendationFamily::Buy
            }
            Recommendation::WeakSell | Recommendation::Sell | Recommendation::StrongSell => {
                RecommendationFamily::Sell
            }
            Recommendation::Hold => RecommendationFamily::Neutral,
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Recommendation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s
            .trim()
            .to_ascii_uppercase()
            .replace(|c: char| c == ' ' || c == '-', "_");
        match normalized.as_str() {
            "STRONG_BUY" => Ok(Recommendation::StrongBuy),
            "BUY" => Ok(Recommendation::Buy),
            "WEAK_BUY" => Ok(Recommendation::WeakBuy),
            "HOLD" | "NEUTRAL" => Ok(Recommendation::Hold),
            "WEAK_SELL" => Ok(Recommendation::WeakSell),
            "SELL" => Ok(Recommendation::Sell),
            "STRONG_SELL" => Ok(Recommendation::StrongSell),
            other => Err(anyhow!("Unknown recommendation '{}'", other)),
        }
    }
}

/// Rebalance cadence. Each step is a fixed number of calendar days, not a
/// trading-calendar boundary, so monthly and quarterly grids drift against
/// real month ends over long runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
}

impl Frequency {
    pub fn step_days(self) -> i64 {
        match self {
            Frequency::Daily => 1,
            Frequency::Weekly => 7,
            Frequency::Monthly => 30,
            Frequency::Quarterly => 90,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Quarterly => "quarterly",
        }
    }
}

impl FromStr for Frequency {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            "quarterly" => Ok(Frequency::Quarterly),
            other => Err(anyhow!("Unknown rebalance frequency '{}'", other)),
        }
    }
}

/// A scored recommendation and its realized outcome for one symbol on one
/// rebalance date. Created once by the orchestrator and never mutated.
///
/// Return maps are keyed by horizon in trading days and are sparse: a horizon
/// without enough future trading days is absent rather than zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSignal {
    pub symbol: String,
    pub requested_date: NaiveDate,
    pub entry_date: NaiveDate,
    pub recommendation: Recommendation,
    pub composite_score: f64,
    pub confidence: f64,
    pub entry_price: f64,
    pub forward_returns: BTreeMap<usize, f64>,
    pub benchmark_returns: BTreeMap<usize, f64>,
    pub alpha: BTreeMap<usize, f64>,
    pub agent_scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub market_regime: Option<String>,
}

impl BacktestSignal {
    pub fn family(&self) -> RecommendationFamily {
        self.recommendation.family()
    }

    pub fn forward_return(&self, horizon: usize) -> Option<f64> {
        self.forward_returns.get(&horizon).copied()
    }

    pub fn alpha_for(&self, horizon: usize) -> Option<f64> {
        self.alpha.get(&horizon).copied()
    }
}

/// Builds the alpha map for every horizon present in both return maps.
pub fn compute_alpha(
    forward_returns: &BTreeMap<usize, f64>,
    benchmark_returns: &BTreeMap<usize, f64>,
) -> BTreeMap<usize, f64> {
    forward_returns
        .iter()
        .filter_map(|(horizon, forward)| {
            benchmark_returns
                .get(horizon)
                .map(|benchmark| (*horizon, forward - benchmark))
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestRequest {
    pub symbols: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub frequency: Frequency,
    /// Trading-day horizons. Empty means the configured default horizons.
    pub horizons: Vec<usize>,
    pub parallel: bool,
}
