use crate::analyzer::{PerformanceAnalysis, PerformanceAnalyzer};
use crate::commands::{load_run, print_json};
use crate::config::{BacktestSettings, OptimizerChoice};
use crate::weight_optimizer::optimizer_for;
use anyhow::{anyhow, Result};
use log::info;
use std::collections::BTreeMap;
use std::path::Path;

pub fn run(
    settings: &BacktestSettings,
    run_file: &Path,
    current_weights: &[String],
    optimizer: Option<OptimizerChoice>,
    json: bool,
) -> Result<()> {
    let record = load_run(run_file)?;
    let weights = parse_weights(current_weights)?;
    let choice = optimizer.unwrap_or(settings.optimizer);
    info!(
        "Optimizing agent weights with the {} optimizer over the {}-day horizon",
        choice.label(),
        settings.primary_horizon
    );

    let analyzer = PerformanceAnalyzer::new(optimizer_for(choice), settings.primary_horizon);
    let analysis = analyzer.analyze(&record.signals, &weights);

    if json {
        return print_json(&analysis);
    }
    print_analysis(&analysis);
    Ok(())
}

/// Parses `agent=weight` pairs.
fn parse_weights(entries: &[String]) -> Result<BTreeMap<String, f64>> {
    let mut weights = BTreeMap::new();
    for entry in entries {
        let (agent, raw) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("Weight '{}' must look like agent=0.25", entry))?;
        let agent = agent.trim();
        if agent.is_empty() {
            return Err(anyhow!("Weight '{}' is missing an agent name", entry));
        }
        let value: f64 = raw
            .trim()
            .parse()
            .map_err(|_| anyhow!("Weight '{}' has a non-numeric value", entry))?;
        if !value.is_finite() || value < 0.0 {
            return Err(anyhow!("Weight '{}' must be a non-negative number", entry));
        }
        weights.insert(agent.to_string(), value);
    }
    Ok(weights)
}

fn print_analysis(analysis: &PerformanceAnalysis) {
    println!("\n=== AGENT WEIGHT ANALYSIS ===\n");
    if analysis.is_empty() {
        println!(
            "Not enough signals with {}-day alpha ({} found).",
            analysis.horizon, analysis.observations
        );
        return;
    }

    println!("Observations: {}", analysis.observations);
    println!("\nCorrelation with {}-day alpha:", analysis.horizon);
    for correlation in &analysis.agent_correlations {
        println!(
            "  {:<16} r = {:>7.4}  ({:?}, {} obs)",
            correlation.agent,
            correlation.correlation,
            correlation.predictive_power,
            correlation.observations
        );
    }

    if let Some(optimal) = &analysis.optimal_weights {
        println!("\nWeights ({}):", optimal.methodology);
        for (agent, weight) in &optimal.weights {
            let current = analysis.current_weights.get(agent).copied().unwrap_or(0.0);
            println!(
                "  {:<16} {:>6.1}% -> {:>6.1}%",
                agent,
                current * 100.0,
                weight * 100.0
            );
        }
        println!(
            "Expected correlation improvement: {:+.4}",
            optimal.expected_improvement
        );
        println!(
            "Sharpe-like score: {:.4} -> {:.4} ({:+.4})",
            analysis.current_sharpe_like,
            analysis.optimal_sharpe_like,
            analysis.sharpe_like_improvement
        );
    }

    if !analysis.recommendations.is_empty() {
        println!("\nRecommendations:");
        for recommendation in &analysis.recommendations {
            println!("  - {}", recommendation);
        }
    }
    println!();
}
