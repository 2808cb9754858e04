use crate::error::{EngineError, EngineResult};
use crate::models::{BacktestSignal, RecommendationFamily};
use crate::statistics::{mean, mean_over_std};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HorizonStatistics {
    pub horizon: usize,
    /// Percent of BUY-family signals with alpha > 0, over signals with alpha.
    pub hit_rate: f64,
    pub hit_rate_observations: usize,
    /// Percent of SELL-family signals with alpha < 0.
    pub sell_hit_rate: f64,
    pub sell_hit_rate_observations: usize,
    pub avg_return: Option<f64>,
    pub avg_alpha: Option<f64>,
    pub buy_avg_return: Option<f64>,
    pub buy_avg_alpha: Option<f64>,
    pub sell_avg_return: Option<f64>,
    pub sell_avg_alpha: Option<f64>,
    /// Mean / stdev of BUY-family returns. Not annualized.
    pub sharpe_like: f64,
    /// Peak-to-trough of the running sum of BUY-family returns, in
    /// percentage points.
    pub max_drawdown_approx: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationBreakdown {
    pub count: usize,
    pub avg_return: Option<f64>,
    pub avg_alpha: Option<f64>,
    pub positive_alpha_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentBreakdown {
    pub observations: usize,
    pub mean_score: Option<f64>,
    pub top_half_alpha: Option<f64>,
    pub bottom_half_alpha: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeBreakdown {
    pub count: usize,
    pub avg_alpha: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSummary {
    pub total_signals: usize,
    pub buy_signals: usize,
    pub sell_signals: usize,
    pub neutral_signals: usize,
    pub primary_horizon: usize,
    pub horizons: Vec<HorizonStatistics>,
    pub win_loss_ratio: f64,
    pub max_drawdown_approx: f64,
    pub by_recommendation: BTreeMap<String, RecommendationBreakdown>,
    pub by_agent: BTreeMap<String, AgentBreakdown>,
    pub by_regime: BTreeMap<String, RegimeBreakdown>,
    pub generated_at: DateTime<Utc>,
}

impl BacktestSummary {
    pub fn horizon(&self, horizon: usize) -> Option<&HorizonStatistics> {
        self.horizons.iter().find(|stats| stats.horizon == horizon)
    }
}

pub struct SummaryStatisticsEngine;

impl SummaryStatisticsEngine {
    /// Aggregates a signal list. Every horizon that appears in any signal's
    /// return maps is reported, plus `primary_horizon`.
    pub fn summarize(
        signals: &[BacktestSignal],
        primary_horizon: usize,
    ) -> EngineResult<BacktestSummary> {
        if signals.is_empty() {
            return Err(EngineError::EmptySignalSet);
        }

        let buys: Vec<&BacktestSignal> = Self::family(signals, RecommendationFamily::Buy);
        let sells: Vec<&BacktestSignal> = Self::family(signals, RecommendationFamily::Sell);
        let neutral_signals = signals.len() - buys.len() - sells.len();

        let mut horizon_set: BTreeSet<usize> = signals
            .iter()
            .flat_map(|s| s.forward_returns.keys().chain(s.alpha.keys()).copied())
            .collect();
        horizon_set.insert(primary_horizon);

        let horizons: Vec<HorizonStatistics> = horizon_set
            .into_iter()
            .map(|horizon| Self::horizon_statistics(signals, &buys, &sells, horizon))
            .collect();

        let primary_buy_returns = Self::chronological_returns(&buys, primary_horizon);
        let win_loss_ratio = Self::win_loss_ratio(&primary_buy_returns);
        let max_drawdown_approx = Self::cumulative_sum_drawdown(&primary_buy_returns);

        Ok(BacktestSummary {
            total_signals: signals.len(),
            buy_signals: buys.len(),
            sell_signals: sells.len(),
            neutral_signals,
            primary_horizon,
            horizons,
            win_loss_ratio,
            max_drawdown_approx,
            by_recommendation: Self::by_recommendation(signals, primary_horizon),
            by_agent: Self::by_agent(signals, primary_horizon),
            by_regime: Self::by_regime(signals, primary_horizon),
            generated_at: Utc::now(),
        })
    }

    fn family(signals: &[BacktestSignal], family: RecommendationFamily) -> Vec<&BacktestSignal> {
        signals.iter().filter(|s| s.family() == family).collect()
    }

    fn horizon_statistics(
        all: &[BacktestSignal],
        buys: &[&BacktestSignal],
        sells: &[&BacktestSignal],
        horizon: usize,
    ) -> HorizonStatistics {
        let all_returns: Vec<f64> = all.iter().filter_map(|s| s.forward_return(horizon)).collect();
        let all_alpha: Vec<f64> = all.iter().filter_map(|s| s.alpha_for(horizon)).collect();
        let buy_returns = Self::returns(buys, horizon);
        let buy_alpha = Self::alphas(buys, horizon);
        let sell_returns = Self::returns(sells, horizon);
        let sell_alpha = Self::alphas(sells, horizon);

        let (hit_rate, hit_rate_observations) = Self::rate(&buy_alpha, |a| a > 0.0);
        let (sell_hit_rate, sell_hit_rate_observations) = Self::rate(&sell_alpha, |a| a < 0.0);

        HorizonStatistics {
            horizon,
            hit_rate,
            hit_rate_observations,
            sell_hit_rate,
            sell_hit_rate_observations,
            avg_return: mean(&all_returns),
            avg_alpha: mean(&all_alpha),
            buy_avg_return: mean(&buy_returns),
            buy_avg_alpha: mean(&buy_alpha),
            sell_avg_return: mean(&sell_returns),
            sell_avg_alpha: mean(&sell_alpha),
            sharpe_like: mean_over_std(&buy_returns),
            max_drawdown_approx: Self::cumulative_sum_drawdown(&Self::chronological_returns(
                buys, horizon,
            )),
        }
    }

    fn returns(signals: &[&BacktestSignal], horizon: usize) -> Vec<f64> {
        signals.iter().filter_map(|s| s.forward_return(horizon)).collect()
    }

    fn alphas(signals: &[&BacktestSignal], horizon: usize) -> Vec<f64> {
        signals.iter().filter_map(|s| s.alpha_for(horizon)).collect()
    }

    /// Returns in (entry date, symbol) order, the sequence the drawdown
    /// approximation walks.
    fn chronological_returns(signals: &[&BacktestSignal], horizon: usize) -> Vec<f64> {
        let mut ordered: Vec<&&BacktestSignal> = signals.iter().collect();
        ordered.sort_by(|a, b| {
            a.entry_date
                .cmp(&b.entry_date)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        ordered
            .into_iter()
            .filter_map(|s| s.forward_return(horizon))
            .collect()
    }

    fn rate(values: &[f64], predicate: impl Fn(f64) -> bool) -> (f64, usize) {
        if values.is_empty() {
            return (0.0, 0);
        }
        let hits = values.iter().filter(|v| predicate(**v)).count();
        (hits as f64 / values.len() as f64 * 100.0, values.len())
    }

    /// mean(gains) / |mean(losses)|; 0 without losses.
    pub fn win_loss_ratio(returns: &[f64]) -> f64 {
        let gains: Vec<f64> = returns.iter().copied().filter(|r| *r > 0.0).collect();
        let losses: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
        match (mean(&gains), mean(&losses)) {
            (Some(gain), Some(loss)) if loss.abs() > f64::EPSILON => gain / loss.abs(),
            _ => 0.0,
        }
    }

    /// Largest peak-to-trough fall of the running (non-compounded) sum of
    /// `returns`, starting from a zero baseline.
    pub fn cumulative_sum_drawdown(returns: &[f64]) -> f64 {
        let mut cumulative = 0.0;
        let mut peak = 0.0_f64;
        let mut max_drawdown = 0.0_f64;
        for value in returns {
            cumulative += value;
            peak = peak.max(cumulative);
            max_drawdown = max_drawdown.max(peak - cumulative);
        }
        max_drawdown
    }

    fn by_recommendation(
        signals: &[BacktestSignal],
        horizon: usize,
    ) -> BTreeMap<String, RecommendationBreakdown> {
        let mut grouped: BTreeMap<String, Vec<&BacktestSignal>> = BTreeMap::new();
        for signal in signals {
            grouped
                .entry(signal.recommendation.as_str().to_string())
                .or_default()
                .push(signal);
        }

        grouped
            .into_iter()
            .map(|(label, group)| {
                let alpha = Self::alphas(&group, horizon);
                let (positive_rate, observations) = Self::rate(&alpha, |a| a > 0.0);
                let breakdown = RecommendationBreakdown {
                    count: group.len(),
                    avg_return: mean(&Self::returns(&group, horizon)),
                    avg_alpha: mean(&alpha),
                    positive_alpha_rate: (observations > 0).then_some(positive_rate),
                };
                (label, breakdown)
            })
            .collect()
    }

    fn by_agent(signals: &[BacktestSignal], horizon: usize) -> BTreeMap<String, AgentBreakdown> {
        let agents: BTreeSet<&String> = signals.iter().flat_map(|s| s.agent_scores.keys()).collect();

        agents
            .into_iter()
            .map(|agent| {
                let scores: Vec<f64> = signals
                    .iter()
                    .filter_map(|s| s.agent_scores.get(agent).copied())
                    .filter(|v| v.is_finite())
                    .collect();

                let mut paired: Vec<(f64, f64)> = signals
                    .iter()
                    .filter_map(|s| {
                        let score = s.agent_scores.get(agent).copied()?;
                        let alpha = s.alpha_for(horizon)?;
                        (score.is_finite() && alpha.is_finite()).then_some((score, alpha))
                    })
                    .collect();
                paired.sort_by(|a, b| b.0.total_cmp(&a.0));

                let half = paired.len() / 2;
                let (top_half_alpha, bottom_half_alpha) = if half == 0 {
                    (None, None)
                } else {
                    let top: Vec<f64> = paired[..half].iter().map(|p| p.1).collect();
                    let bottom: Vec<f64> = paired[paired.len() - half..].iter().map(|p| p.1).collect();
                    (mean(&top), mean(&bottom))
                };

                let breakdown = AgentBreakdown {
                    observations: scores.len(),
                    mean_score: mean(&scores),
                    top_half_alpha,
                    bottom_half_alpha,
                };
                (agent.clone(), breakdown)
            })
            .collect()
    }

    fn by_regime(signals: &[BacktestSignal], horizon: usize) -> BTreeMap<String, RegimeBreakdown> {
        let mut grouped: BTreeMap<String, Vec<&BacktestSignal>> = BTreeMap::new();
        for signal in signals {
            let regime = signal
                .market_regime
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            grouped.entry(regime).or_default().push(signal);
        }
        grouped
            .into_iter()
            .map(|(regime, group)| {
                let breakdown = RegimeBreakdown {
                    count: group.len(),
                    avg_alpha: mean(&Self::alphas(&group, horizon)),
                };
                (regime, breakdown)
            })
            .collect()
    }
}
