use anyhow::Result;
use backtest_engine::commands::{equity_curve, optimize_weights, summarize};
use backtest_engine::config::{BacktestSettings, OptimizerChoice};
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "backtest-engine")]
#[command(about = "Point-in-time recommendation backtesting and evaluation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print summary statistics for a stored run record
    Summarize {
        /// Run record JSON exported by a result store
        #[arg(value_name = "RUN_FILE")]
        run_file: PathBuf,
        /// Horizon (trading days) used for win/loss and drawdown; defaults to BACKTEST_PRIMARY_HORIZON
        #[arg(long)]
        primary_horizon: Option<usize>,
        /// Emit JSON instead of a text report
        #[arg(long)]
        json: bool,
    },
    /// Correlate agent scores with alpha and search for better agent weights
    OptimizeWeights {
        /// Run record JSON exported by a result store
        #[arg(value_name = "RUN_FILE")]
        run_file: PathBuf,
        /// Current agent weights as agent=weight, comma separated
        #[arg(long = "weight", value_delimiter = ',', num_args = 1..)]
        weights: Vec<String>,
        /// Weight optimizer (constrained or proportional); defaults to WEIGHT_OPTIMIZER
        #[arg(long, value_parser = parse_optimizer)]
        optimizer: Option<OptimizerChoice>,
        /// Emit JSON instead of a text report
        #[arg(long)]
        json: bool,
    },
    /// Build the compounded equal-weight equity curve for a stored run record
    EquityCurve {
        /// Run record JSON exported by a result store
        #[arg(value_name = "RUN_FILE")]
        run_file: PathBuf,
        /// Starting capital; defaults to EQUITY_INITIAL_CAPITAL
        #[arg(long)]
        initial_capital: Option<f64>,
        /// Emit JSON instead of a text report
        #[arg(long)]
        json: bool,
    },
}

fn parse_optimizer(raw: &str) -> std::result::Result<OptimizerChoice, String> {
    OptimizerChoice::parse(raw).map_err(|error| error.to_string())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = BacktestSettings::from_env()?;
    info!(
        "Benchmark {}, primary horizon {} trading days. Backtest results are not financial advice.",
        settings.benchmark_symbol, settings.primary_horizon
    );

    match cli.command {
        Commands::Summarize {
            run_file,
            primary_horizon,
            json,
        } => summarize::run(&settings, &run_file, primary_horizon, json)?,
        Commands::OptimizeWeights {
            run_file,
            weights,
            optimizer,
            json,
        } => optimize_weights::run(&settings, &run_file, &weights, optimizer, json)?,
        Commands::EquityCurve {
            run_file,
            initial_capital,
            json,
        } => equity_curve::run(&settings, &run_file, initial_capital, json)?,
    }

    Ok(())
}
