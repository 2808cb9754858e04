use crate::commands::{format_optional, load_run, print_json};
use crate::config::BacktestSettings;
use crate::summary::{BacktestSummary, SummaryStatisticsEngine};
use anyhow::Result;
use std::path::Path;

pub fn run(
    settings: &BacktestSettings,
    run_file: &Path,
    primary_horizon: Option<usize>,
    json: bool,
) -> Result<()> {
    let record = load_run(run_file)?;
    let horizon = primary_horizon.unwrap_or(settings.primary_horizon);
    let summary = SummaryStatisticsEngine::summarize(&record.signals, horizon)?;

    if json {
        return print_json(&summary);
    }
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &BacktestSummary) {
    println!("\n=== BACKTEST SUMMARY ===\n");
    println!(
        "Signals: {} (buy {}, sell {}, neutral {})",
        summary.total_signals, summary.buy_signals, summary.sell_signals, summary.neutral_signals
    );
    println!(
        "Win/Loss ({}d): {:.2}   Max drawdown approx: {:.2} pts",
        summary.primary_horizon, summary.win_loss_ratio, summary.max_drawdown_approx
    );
    println!();

    for stats in &summary.horizons {
        println!("Horizon {} trading days:", stats.horizon);
        println!(
            "  Hit rate: {:.2}% ({} obs)   Sell hit rate: {:.2}% ({} obs)",
            stats.hit_rate,
            stats.hit_rate_observations,
            stats.sell_hit_rate,
            stats.sell_hit_rate_observations
        );
        println!(
            "  Avg return: {}   Avg alpha: {}",
            format_optional(stats.avg_return, "%"),
            format_optional(stats.avg_alpha, "%")
        );
        println!(
            "  Buy avg return: {}   Buy avg alpha: {}",
            format_optional(stats.buy_avg_return, "%"),
            format_optional(stats.buy_avg_alpha, "%")
        );
        println!(
            "  Sharpe-like: {:.4}   Drawdown approx: {:.2} pts",
            stats.sharpe_like, stats.max_drawdown_approx
        );
    }

    if !summary.by_recommendation.is_empty() {
        println!("\nBy recommendation:");
        for (label, breakdown) in &summary.by_recommendation {
            println!(
                "  {:<12} {:>5} signals  return {}  alpha {}",
                label,
                breakdown.count,
                format_optional(breakdown.avg_return, "%"),
                format_optional(breakdown.avg_alpha, "%")
            );
        }
    }

    if !summary.by_agent.is_empty() {
        println!("\nBy agent (top half vs bottom half alpha):");
        for (agent, breakdown) in &summary.by_agent {
            println!(
                "  {:<16} {:>5} obs  mean score {}  top {}  bottom {}",
                agent,
                breakdown.observations,
                format_optional(breakdown.mean_score, ""),
                format_optional(breakdown.top_half_alpha, "%"),
                format_optional(breakdown.bottom_half_alpha, "%")
            );
        }
    }

    if !summary.by_regime.is_empty() {
        println!("\nBy market regime:");
        for (regime, breakdown) in &summary.by_regime {
            println!(
                "  {:<12} {:>5} signals  alpha {}",
                regime,
                breakdown.count,
                format_optional(breakdown.avg_alpha, "%")
            );
        }
    }
    println!();
}
