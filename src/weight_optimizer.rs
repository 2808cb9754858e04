use crate::config::OptimizerChoice;
use crate::error::{EngineError, EngineResult};
use crate::statistics::pearson;
use log::debug;
use rayon::prelude::*;

/// Upper bound for any single agent weight.
pub const MAX_AGENT_WEIGHT: f64 = 0.6;

const INITIAL_STEP: f64 = 0.1;
const MIN_STEP: f64 = 1e-4;
const MIN_IMPROVEMENT: f64 = 1e-9;
const MAX_ITERATIONS: usize = 1_000;

/// Inputs of the weight search: per-sample normalized agent scores (one row per
/// signal, one column per agent) and the realized alpha of each sample.
#[derive(Debug, Clone)]
pub struct WeightProblem {
    pub agents: Vec<String>,
    pub normalized_scores: Vec<Vec<f64>>,
    pub alpha: Vec<f64>,
    pub correlations: Vec<f64>,
    pub initial_weights: Vec<f64>,
}

impl WeightProblem {
    pub fn composite(&self, weights: &[f64]) -> Vec<f64> {
        self.normalized_scores
            .iter()
            .map(|row| row.iter().zip(weights).map(|(score, weight)| score * weight).sum())
            .collect()
    }

    /// Correlation of the weighted composite with alpha, `None` when the
    /// composite has no variance.
    pub fn objective(&self, weights: &[f64]) -> Option<f64> {
        pearson(&self.composite(weights), &self.alpha)
    }
}

/// A weight search strategy. Implementations return one weight per agent in
/// `problem.agents` order, summing to 1 with each weight in
/// `[0, MAX_AGENT_WEIGHT]`.
pub trait WeightOptimizer: Send + Sync {
    fn name(&self) -> &'static str;
    fn optimize(&self, problem: &WeightProblem) -> EngineResult<Vec<f64>>;
}

pub fn optimizer_for(choice: OptimizerChoice) -> Box<dyn WeightOptimizer> {
    match choice {
        OptimizerChoice::Constrained => Box::new(ConstrainedOptimizer::default()),
        OptimizerChoice::Proportional => Box::new(CorrelationProportional),
    }
}

/// Clamps negatives to zero, normalizes to sum 1, then enforces `cap` by
/// pinning capped weights and spreading the remainder over the rest in
/// proportion to their raw values. All-zero input yields equal weights.
pub fn cap_and_normalize(raw: &[f64], cap: f64) -> Vec<f64> {
    let n = raw.len();
    if n == 0 {
        return Vec::new();
    }
    let cleaned: Vec<f64> = raw
        .iter()
        .map(|v| if v.is_finite() { v.max(0.0) } else { 0.0 })
        .collect();
    let cap = if cap * n as f64 >= 1.0 { cap } else { 1.0 };

    let mut capped = vec![false; n];
    let mut weights = vec![0.0; n];
    loop {
        let pinned = capped.iter().filter(|c| **c).count();
        let remaining = 1.0 - cap * pinned as f64;
        let free: Vec<usize> = (0..n).filter(|i| !capped[*i]).collect();
        if free.is_empty() {
            break;
        }
        let free_sum: f64 = free.iter().map(|i| cleaned[*i]).sum();

        for i in 0..n {
            weights[i] = if capped[i] {
                cap
            } else if free_sum > f64::EPSILON {
                cleaned[i] / free_sum * remaining
            } else {
                remaining / free.len() as f64
            };
        }

        let mut newly_capped = false;
        for i in free {
            if weights[i] > cap + 1e-12 {
                capped[i] = true;
                newly_capped = true;
            }
        }
        if !newly_capped {
            break;
        }
    }
    weights
}

/// Bounded pattern search over the capped simplex, seeded at the problem's
/// initial weights. Each iteration shifts `step` of weight from one agent to
/// another for every ordered pair, evaluates the batch in parallel and keeps
/// the best improvement; the step halves when nothing improves.
#[derive(Debug, Clone)]
pub struct ConstrainedOptimizer {
    pub initial_step: f64,
    pub min_step: f64,
    pub max_iterations: usize,
}

impl Default for ConstrainedOptimizer {
    fn default() -> Self {
        Self {
            initial_step: INITIAL_STEP,
            min_step: MIN_STEP,
            max_iterations: MAX_ITERATIONS,
        }
    }
}

impl ConstrainedOptimizer {
    fn neighbours(weights: &[f64], step: f64) -> Vec<Vec<f64>> {
        let mut candidates = Vec::new();
        for to in 0..weights.len() {
            for from in 0..weights.len() {
                if to == from {
                    continue;
                }
                let delta = step.min(weights[from]).min(MAX_AGENT_WEIGHT - weights[to]);
                if delta <= 1e-12 {
                    continue;
                }
                let mut candidate = weights.to_vec();
                candidate[to] += delta;
                candidate[from] -= delta;
                candidates.push(candidate);
            }
        }
        candidates
    }
}

impl WeightOptimizer for ConstrainedOptimizer {
    fn name(&self) -> &'static str {
        "constrained_pattern_search"
    }

    fn optimize(&self, problem: &WeightProblem) -> EngineResult<Vec<f64>> {
        if problem.agents.len() < 2 {
            return Err(EngineError::OptimizationFailure(
                "at least two agents are required".to_string(),
            ));
        }

        let mut weights = cap_and_normalize(&problem.initial_weights, MAX_AGENT_WEIGHT);
        let mut best = problem.objective(&weights).ok_or_else(|| {
            EngineError::OptimizationFailure(
                "objective undefined at the starting weights".to_string(),
            )
        })?;

        let mut step = self.initial_step;
        let mut iterations = 0usize;
        while step >= self.min_step {
            iterations += 1;
            if iterations > self.max_iterations {
                return Err(EngineError::OptimizationFailure(format!(
                    "no convergence after {} iterations (step {:.5})",
                    self.max_iterations, step
                )));
            }

            let candidates = Self::neighbours(&weights, step);
            let scored: Vec<(f64, Vec<f64>)> = candidates
                .into_par_iter()
                .map(|candidate| {
                    let score = problem.objective(&candidate).unwrap_or(f64::NEG_INFINITY);
                    (score, candidate)
                })
                .collect();

            let mut improved: Option<(f64, Vec<f64>)> = None;
            for (score, candidate) in scored {
                let threshold = improved.as_ref().map(|(s, _)| *s).unwrap_or(best + MIN_IMPROVEMENT);
                if score > threshold {
                    improved = Some((score, candidate));
                }
            }

            match improved {
                Some((score, candidate)) => {
                    best = score;
                    weights = candidate;
                }
                None => step *= 0.5,
            }
        }

        if !best.is_finite() {
            return Err(EngineError::OptimizationFailure(
                "objective is not finite".to_string(),
            ));
        }
        debug!(
            "Pattern search converged after {} iterations with correlation {:.4}",
            iterations, best
        );
        Ok(cap_and_normalize(&weights, MAX_AGENT_WEIGHT))
    }
}

/// Weights proportional to each agent's non-negative correlation with alpha.
/// Never fails; equal weights when no agent correlates positively.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrelationProportional;

impl WeightOptimizer for CorrelationProportional {
    fn name(&self) -> &'static str {
        "correlation_proportional"
    }

    fn optimize(&self, problem: &WeightProblem) -> EngineResult<Vec<f64>> {
        Ok(cap_and_normalize(&problem.correlations, MAX_AGENT_WEIGHT))
    }
}
