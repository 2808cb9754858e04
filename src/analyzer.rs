use crate::config::BacktestSettings;
use crate::models::BacktestSignal;
use crate::statistics::{mean_over_std, pearson};
use crate::weight_optimizer::{
    cap_and_normalize, optimizer_for, CorrelationProportional, WeightOptimizer, WeightProblem,
    MAX_AGENT_WEIGHT,
};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const MIN_OBSERVATIONS: usize = 10;
const STRONG_CORRELATION: f64 = 0.4;
const MODERATE_CORRELATION: f64 = 0.2;
const RECOMMENDATION_DELTA: f64 = 0.03;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictivePower {
    Strong,
    Moderate,
    Weak,
}

impl PredictivePower {
    pub fn classify(correlation: f64) -> Self {
        let magnitude = correlation.abs();
        if magnitude > STRONG_CORRELATION {
            PredictivePower::Strong
        } else if magnitude > MODERATE_CORRELATION {
            PredictivePower::Moderate
        } else {
            PredictivePower::Weak
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCorrelation {
    pub agent: String,
    pub correlation: f64,
    pub observations: usize,
    pub predictive_power: PredictivePower,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimalWeights {
    pub weights: BTreeMap<String, f64>,
    /// Correlation of the weighted composite with alpha under the optimal
    /// weights minus the same under the current weights.
    pub expected_improvement: f64,
    pub methodology: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceAnalysis {
    pub horizon: usize,
    pub observations: usize,
    pub agent_correlations: Vec<AgentCorrelation>,
    pub current_weights: BTreeMap<String, f64>,
    pub optimal_weights: Option<OptimalWeights>,
    /// Mean / stdev of the weighted score series, not of returns.
    pub current_sharpe_like: f64,
    pub optimal_sharpe_like: f64,
    pub sharpe_like_improvement: f64,
    pub recommendations: Vec<String>,
}

impl PerformanceAnalysis {
    fn empty(horizon: usize, observations: usize) -> Self {
        Self {
            horizon,
            observations,
            agent_correlations: Vec::new(),
            current_weights: BTreeMap::new(),
            optimal_weights: None,
            current_sharpe_like: 0.0,
            optimal_sharpe_like: 0.0,
            sharpe_like_improvement: 0.0,
            recommendations: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.agent_correlations.is_empty()
    }
}

/// Per-agent attribution against realized alpha and the weight search on top
/// of it. The configured optimizer is tried first; any failure falls back to
/// [`CorrelationProportional`].
pub struct PerformanceAnalyzer {
    optimizer: Box<dyn WeightOptimizer>,
    horizon: usize,
}

impl PerformanceAnalyzer {
    pub fn new(optimizer: Box<dyn WeightOptimizer>, horizon: usize) -> Self {
        Self { optimizer, horizon }
    }

    pub fn from_settings(settings: &BacktestSettings) -> Self {
        Self::new(optimizer_for(settings.optimizer), settings.primary_horizon)
    }

    pub fn analyze(
        &self,
        signals: &[BacktestSignal],
        current_weights: &BTreeMap<String, f64>,
    ) -> PerformanceAnalysis {
        let sample: Vec<(&BacktestSignal, f64)> = signals
            .iter()
            .filter_map(|s| {
                s.alpha_for(self.horizon)
                    .filter(|a| a.is_finite())
                    .map(|alpha| (s, alpha))
            })
            .collect();
        if sample.len() < MIN_OBSERVATIONS {
            info!(
                "Only {} signals with {}-day alpha; at least {} are needed for analysis",
                sample.len(),
                self.horizon,
                MIN_OBSERVATIONS
            );
            return PerformanceAnalysis::empty(self.horizon, sample.len());
        }

        let agents: Vec<String> = sample
            .iter()
            .flat_map(|(s, _)| s.agent_scores.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let agent_correlations: Vec<AgentCorrelation> = agents
            .iter()
            .map(|agent| Self::correlate(agent, &sample))
            .collect();

        let mut analysis = PerformanceAnalysis::empty(self.horizon, sample.len());
        analysis.current_weights = Self::resolve_current_weights(&agents, current_weights);
        analysis.recommendations = Self::predictor_flags(&agent_correlations);
        analysis.agent_correlations = agent_correlations;

        if agents.len() < 2 {
            info!("Weight optimization needs at least two agents; found {}", agents.len());
            return analysis;
        }

        let problem = WeightProblem {
            normalized_scores: Self::normalized_scores(&agents, &sample),
            alpha: sample.iter().map(|(_, alpha)| *alpha).collect(),
            correlations: analysis
                .agent_correlations
                .iter()
                .map(|c| c.correlation)
                .collect(),
            initial_weights: agents
                .iter()
                .map(|agent| analysis.current_weights.get(agent).copied().unwrap_or(0.0))
                .collect(),
            agents,
        };

        let (weights, methodology) = match self.optimizer.optimize(&problem) {
            Ok(weights) => (weights, self.optimizer.name().to_string()),
            Err(error) => {
                warn!(
                    "{} failed ({}); falling back to correlation-proportional weights",
                    self.optimizer.name(),
                    error
                );
                let fallback = CorrelationProportional;
                let weights = fallback
                    .optimize(&problem)
                    .unwrap_or_else(|_| cap_and_normalize(&problem.correlations, MAX_AGENT_WEIGHT));
                (weights, format!("{}_fallback", fallback.name()))
            }
        };

        let current: Vec<f64> = problem.initial_weights.clone();
        let current_corr = problem.objective(&current).unwrap_or(0.0);
        let optimal_corr = problem.objective(&weights).unwrap_or(0.0);
        analysis.current_sharpe_like = mean_over_std(&problem.composite(&current));
        analysis.optimal_sharpe_like = mean_over_std(&problem.composite(&weights));
        analysis.sharpe_like_improvement =
            analysis.optimal_sharpe_like - analysis.current_sharpe_like;

        let optimal: BTreeMap<String, f64> = problem
            .agents
            .iter()
            .cloned()
            .zip(weights.iter().copied())
            .collect();
        let mut recommendations =
            Self::weight_recommendations(&analysis.current_weights, &optimal, &analysis.agent_correlations);
        recommendations.append(&mut analysis.recommendations);
        analysis.recommendations = recommendations;

        info!(
            "Weight analysis over {} signals via {}: correlation {:.4} -> {:.4}",
            analysis.observations, methodology, current_corr, optimal_corr
        );
        analysis.optimal_weights = Some(OptimalWeights {
            weights: optimal,
            expected_improvement: optimal_corr - current_corr,
            methodology,
        });
        analysis
    }

    fn correlate(agent: &str, sample: &[(&BacktestSignal, f64)]) -> AgentCorrelation {
        let (scores, alphas): (Vec<f64>, Vec<f64>) = sample
            .iter()
            .filter_map(|(s, alpha)| {
                s.agent_scores
                    .get(agent)
                    .copied()
                    .filter(|v| v.is_finite())
                    .map(|score| (score, *alpha))
            })
            .unzip();
        let correlation = pearson(&scores, &alphas).unwrap_or(0.0);
        AgentCorrelation {
            agent: agent.to_string(),
            correlation,
            observations: scores.len(),
            predictive_power: PredictivePower::classify(correlation),
        }
    }

    /// Current weights restricted to the observed agents and normalized to
    /// sum 1. Equal weights when none are given.
    fn resolve_current_weights(
        agents: &[String],
        provided: &BTreeMap<String, f64>,
    ) -> BTreeMap<String, f64> {
        if agents.is_empty() {
            return BTreeMap::new();
        }
        let raw: Vec<f64> = agents
            .iter()
            .map(|agent| {
                provided
                    .get(agent)
                    .copied()
                    .filter(|v| v.is_finite() && *v > 0.0)
                    .unwrap_or(0.0)
            })
            .collect();
        let total: f64 = raw.iter().sum();
        let weights: Vec<f64> = if total > f64::EPSILON {
            raw.iter().map(|v| v / total).collect()
        } else {
            vec![1.0 / agents.len() as f64; agents.len()]
        };
        agents.iter().cloned().zip(weights).collect()
    }

    /// Min-max normalized per agent over the sample. A constant or missing
    /// score maps to 0.5.
    fn normalized_scores(agents: &[String], sample: &[(&BacktestSignal, f64)]) -> Vec<Vec<f64>> {
        let bounds: Vec<Option<(f64, f64)>> = agents
            .iter()
            .map(|agent| {
                sample
                    .iter()
                    .filter_map(|(s, _)| s.agent_scores.get(agent).copied())
                    .filter(|v| v.is_finite())
                    .fold(None, |acc: Option<(f64, f64)>, v| match acc {
                        None => Some((v, v)),
                        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
                    })
            })
            .collect();

        sample
            .iter()
            .map(|(signal, _)| {
                agents
                    .iter()
                    .zip(&bounds)
                    .map(|(agent, bound)| {
                        let value = signal.agent_scores.get(agent).copied().filter(|v| v.is_finite());
                        match (value, bound) {
                            (Some(v), Some((lo, hi))) if hi - lo > f64::EPSILON => (v - lo) / (hi - lo),
                            _ => 0.5,
                        }
                    })
                    .collect()
            })
            .collect()
    }

    fn weight_recommendations(
        current: &BTreeMap<String, f64>,
        optimal: &BTreeMap<String, f64>,
        correlations: &[AgentCorrelation],
    ) -> Vec<String> {
        let mut recommendations = Vec::new();
        for (agent, target) in optimal {
            let existing = current.get(agent).copied().unwrap_or(0.0);
            let delta = target - existing;
            if delta.abs() <= RECOMMENDATION_DELTA {
                continue;
            }
            let correlation = correlations
                .iter()
                .find(|c| &c.agent == agent)
                .map(|c| c.correlation)
                .unwrap_or(0.0);
            recommendations.push(format!(
                "{} {} weight from {:.1}% to {:.1}% (correlation {:.2})",
                if delta > 0.0 { "Increase" } else { "Decrease" },
                agent,
                existing * 100.0,
                target * 100.0,
                correlation
            ));
        }
        recommendations
    }

    fn predictor_flags(correlations: &[AgentCorrelation]) -> Vec<String> {
        correlations
            .iter()
            .filter_map(|c| match c.predictive_power {
                PredictivePower::Strong => Some(format!(
                    "{} is a strong predictor of alpha (r = {:.2})",
                    c.agent, c.correlation
                )),
                PredictivePower::Weak => Some(format!(
                    "{} is a weak predictor of alpha (r = {:.2}); consider reducing its influence",
                    c.agent, c.correlation
                )),
                PredictivePower::Moderate => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EngineError, EngineResult};
    use crate::models::Recommendation;
    use crate::weight_optimizer::ConstrainedOptimizer;
    use chrono::{Duration, NaiveDate};

    struct AlwaysFails;

    impl WeightOptimizer for AlwaysFails {
        fn name(&self) -> &'static str {
            "always_fails"
        }

        fn optimize(&self, _problem: &WeightProblem) -> EngineResult<Vec<f64>> {
            Err(EngineError::OptimizationFailure("solver unavailable".to_string()))
        }
    }

    fn signals(count: usize) -> Vec<BacktestSignal> {
        (0..count)
            .map(|i| {
                let date = NaiveDate::from_ymd_opt(2021, 1, 4).unwrap() + Duration::days(7 * i as i64);
                let alpha = i as f64 - count as f64 / 2.0;
                BacktestSignal {
                    symbol: "AAA".to_string(),
                    requested_date: date,
                    entry_date: date,
                    recommendation: Recommendation::Buy,
                    composite_score: 60.0,
                    confidence: 0.5,
                    entry_price: 100.0,
                    forward_returns: BTreeMap::from([(60, alpha + 1.0)]),
                    benchmark_returns: BTreeMap::from([(60, 1.0)]),
                    alpha: BTreeMap::from([(60, alpha)]),
                    agent_scores: BTreeMap::from([
                        ("momentum".to_string(), 40.0 + 2.0 * i as f64),
                        ("value".to_string(), if i % 2 == 0 { 70.0 } else { 30.0 }),
                        ("sentiment".to_string(), 50.0 + (i % 3) as f64),
                    ]),
                    market_regime: None,
                }
            })
            .collect()
    }

    /// Returns the same weights whatever the problem.
    struct FixedWeights(Vec<f64>);

    impl WeightOptimizer for FixedWeights {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn optimize(&self, _problem: &WeightProblem) -> EngineResult<Vec<f64>> {
            Ok(self.0.clone())
        }
    }

    /// Agent `a` ramps from 0 to 9; agent `b` never moves.
    fn two_agent_signals() -> Vec<BacktestSignal> {
        signals(10)
            .into_iter()
            .enumerate()
            .map(|(i, mut signal)| {
                signal.agent_scores = BTreeMap::from([
                    ("a".to_string(), i as f64),
                    ("b".to_string(), 50.0),
                ]);
                signal
            })
            .collect()
    }

    fn equal_weights() -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("momentum".to_string(), 1.0),
            ("value".to_string(), 1.0),
            ("sentiment".to_string(), 1.0),
        ])
    }

    #[test]
    fn classifies_predictive_power() {
        assert_eq!(PredictivePower::classify(0.55), PredictivePower::Strong);
        assert_eq!(PredictivePower::classify(-0.3), PredictivePower::Moderate);
        assert_eq!(PredictivePower::classify(0.1), PredictivePower::Weak);
    }

    #[test]
    fn too_few_observations_yield_empty_result() {
        let analyzer = PerformanceAnalyzer::new(Box::new(ConstrainedOptimizer::default()), 60);
        let analysis = analyzer.analyze(&signals(9), &equal_weights());
        assert!(analysis.is_empty());
        assert_eq!(analysis.observations, 9);
        assert!(analysis.optimal_weights.is_none());
    }

    #[test]
    fn optimal_weights_respect_constraints() {
        let analyzer = PerformanceAnalyzer::new(Box::new(ConstrainedOptimizer::default()), 60);
        let analysis = analyzer.analyze(&signals(30), &equal_weights());

        let momentum = analysis
            .agent_correlations
            .iter()
            .find(|c| c.agent == "momentum")
            .unwrap();
        assert_eq!(momentum.predictive_power, PredictivePower::Strong);

        let optimal = analysis.optimal_weights.expect("weights");
        assert_eq!(optimal.methodology, "constrained_pattern_search");
        let total: f64 = optimal.weights.values().sum();
        assert!((total - 1.0).abs() < 1e-6);
        assert!(optimal.weights.values().all(|w| *w >= 0.0 && *w <= 0.6 + 1e-9));
        assert!(optimal.expected_improvement >= 0.0);
        assert!(analysis
            .recommendations
            .iter()
            .any(|r| r.starts_with("Increase momentum")));
    }

    #[test]
    fn solver_failure_falls_back_to_proportional() {
        let analyzer = PerformanceAnalyzer::new(Box::new(AlwaysFails), 60);
        let analysis = analyzer.analyze(&signals(30), &BTreeMap::new());

        let optimal = analysis.optimal_weights.expect("weights");
        assert_eq!(optimal.methodology, "correlation_proportional_fallback");
        let total: f64 = optimal.weights.values().sum();
        assert!((total - 1.0).abs() < 1e-6);
        assert!((optimal.weights["momentum"] - 0.6).abs() < 1e-9);
    }

    #[test]
    fn sharpe_like_compares_current_and_optimal_composites() {
        let analyzer = PerformanceAnalyzer::new(Box::new(FixedWeights(vec![0.5, 0.5])), 60);
        let current = BTreeMap::from([("b".to_string(), 1.0)]);
        let analysis = analyzer.analyze(&two_agent_signals(), &current);

        // The current composite is all `b`, a constant 0.5.
        assert_eq!(analysis.current_sharpe_like, 0.0);

        let composite: Vec<f64> = (0..10).map(|i| 0.5 * i as f64 / 9.0 + 0.25).collect();
        let mean = composite.iter().sum::<f64>() / 10.0;
        let variance = composite.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / 9.0;
        let expected = mean / variance.sqrt();
        assert!((analysis.optimal_sharpe_like - expected).abs() < 1e-9);
        assert!(
            (analysis.sharpe_like_improvement
                - (analysis.optimal_sharpe_like - analysis.current_sharpe_like))
                .abs()
                < 1e-12
        );
        assert_eq!(analysis.optimal_weights.expect("weights").methodology, "fixed");
    }

    #[test]
    fn small_weight_changes_produce_no_recommendation() {
        let current = BTreeMap::from([("a".to_string(), 1.0), ("b".to_string(), 1.0)]);

        let nudged = PerformanceAnalyzer::new(Box::new(FixedWeights(vec![0.52, 0.48])), 60)
            .analyze(&two_agent_signals(), &current);
        assert!(nudged.optimal_weights.is_some());
        assert!(!nudged
            .recommendations
            .iter()
            .any(|r| r.starts_with("Increase") || r.starts_with("Decrease")));

        let moved = PerformanceAnalyzer::new(Box::new(FixedWeights(vec![0.55, 0.45])), 60)
            .analyze(&two_agent_signals(), &current);
        assert!(moved
            .recommendations
            .iter()
            .any(|r| r.starts_with("Increase a weight from 50.0% to 55.0%")));
        assert!(moved
            .recommendations
            .iter()
            .any(|r| r.starts_with("Decrease b weight from 50.0% to 45.0%")));
    }
}
