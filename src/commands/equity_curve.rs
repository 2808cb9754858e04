use crate::commands::{load_run, print_json};
use crate::config::BacktestSettings;
use crate::equity_curve::{EquityCurve, EquityCurveBuilder, RecoveryTime};
use anyhow::{anyhow, Result};
use std::path::Path;

pub fn run(
    settings: &BacktestSettings,
    run_file: &Path,
    initial_capital: Option<f64>,
    json: bool,
) -> Result<()> {
    let record = load_run(run_file)?;
    let capital = initial_capital.unwrap_or(settings.initial_capital);
    if !capital.is_finite() || capital <= 0.0 {
        return Err(anyhow!("Initial capital must be positive (value: {})", capital));
    }

    let curve = EquityCurveBuilder::new(capital, settings.primary_horizon).build(&record.signals);
    if json {
        return print_json(&curve);
    }
    print_curve(&curve);
    Ok(())
}

fn print_curve(curve: &EquityCurve) {
    println!("\n=== EQUITY CURVE ({}-day returns) ===\n", curve.horizon);
    for point in &curve.points {
        println!(
            "{}  {:>3} signals  avg {:>7.2}%  value ${:>14.2}  drawdown {:>7.2}%",
            point.date,
            point.signal_count,
            point.average_return,
            point.portfolio_value,
            point.drawdown_pct
        );
    }
    println!();
    println!(
        "Initial: ${:.2}  Final: ${:.2}  Total return: {:.2}%",
        curve.initial_capital, curve.final_value, curve.total_return_pct
    );
    match curve.max_drawdown_date {
        Some(date) => println!("Max drawdown: {:.2}% on {}", curve.max_drawdown_pct, date),
        None => println!("Max drawdown: none"),
    }
    let recovery = match curve.recovery {
        RecoveryTime::NoDrawdown => "no drawdown".to_string(),
        RecoveryTime::Recovered { periods } => format!(
            "{} rebalance period{}",
            periods,
            if periods == 1 { "" } else { "s" }
        ),
        RecoveryTime::NotYetRecovered => "not yet recovered".to_string(),
    };
    println!("Recovery: {}", recovery);
    println!();
}
