use crate::error::{EngineError, EngineResult};
use std::collections::HashMap;

pub const DEFAULT_WORKER_COUNT: usize = 4;
pub const DEFAULT_LOOKBACK_YEARS: u32 = 5;
pub const DEFAULT_BENCHMARK_SYMBOL: &str = "SPY";
pub const DEFAULT_BENCHMARK_GAP_WARN_DAYS: i64 = 5;
pub const DEFAULT_MAX_ENTRY_GAP_DAYS: i64 = 10;
pub const DEFAULT_HORIZONS: [usize; 3] = [20, 60, 120];
pub const DEFAULT_PRIMARY_HORIZON: usize = 60;
pub const DEFAULT_INITIAL_CAPITAL: f64 = 100_000.0;

const SETTING_KEYS: [&str; 9] = [
    "BACKTEST_WORKERS",
    "BACKTEST_LOOKBACK_YEARS",
    "BACKTEST_BENCHMARK_SYMBOL",
    "BACKTEST_BENCHMARK_GAP_WARN_DAYS",
    "BACKTEST_MAX_ENTRY_GAP_DAYS",
    "BACKTEST_HORIZONS",
    "BACKTEST_PRIMARY_HORIZON",
    "EQUITY_INITIAL_CAPITAL",
    "WEIGHT_OPTIMIZER",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerChoice {
    Constrained,
    Proportional,
}

impl OptimizerChoice {
    pub fn parse(raw: &str) -> EngineResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "constrained" | "slsqp" => Ok(Self::Constrained),
            "proportional" | "correlation_proportional" => Ok(Self::Proportional),
            other => Err(invalid(
                "WEIGHT_OPTIMIZER",
                format!("must be constrained or proportional (value: {})", other),
            )),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Constrained => "constrained",
            Self::Proportional => "proportional",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BacktestSettings {
    pub worker_count: usize,
    pub lookback_years: u32,
    pub benchmark_symbol: String,
    pub benchmark_gap_warn_days: i64,
    /// Largest calendar gap between a requested date and the trading day used
    /// as its entry before the point is skipped.
    pub max_entry_gap_days: i64,
    pub default_horizons: Vec<usize>,
    pub primary_horizon: usize,
    pub initial_capital: f64,
    pub optimizer: OptimizerChoice,
}

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            lookback_years: DEFAULT_LOOKBACK_YEARS,
            benchmark_symbol: DEFAULT_BENCHMARK_SYMBOL.to_string(),
            benchmark_gap_warn_days: DEFAULT_BENCHMARK_GAP_WARN_DAYS,
            max_entry_gap_days: DEFAULT_MAX_ENTRY_GAP_DAYS,
            default_horizons: DEFAULT_HORIZONS.to_vec(),
            primary_horizon: DEFAULT_PRIMARY_HORIZON,
            initial_capital: DEFAULT_INITIAL_CAPITAL,
            optimizer: OptimizerChoice::Constrained,
        }
    }
}

impl BacktestSettings {
    pub fn from_settings_map(settings: &HashMap<String, String>) -> EngineResult<Self> {
        let defaults = Self::default();

        let worker_count = match optional_setting(settings, "BACKTEST_WORKERS") {
            Some(raw) if raw.eq_ignore_ascii_case("auto") => num_cpus::get().max(1),
            Some(_) => optional_setting_usize(settings, "BACKTEST_WORKERS", 1)?
                .unwrap_or(defaults.worker_count),
            None => defaults.worker_count,
        };
        let lookback_years = optional_setting_usize(settings, "BACKTEST_LOOKBACK_YEARS", 1)?
            .map(|value| value as u32)
            .unwrap_or(defaults.lookback_years);
        let benchmark_symbol = optional_setting(settings, "BACKTEST_BENCHMARK_SYMBOL")
            .map(|value| value.to_ascii_uppercase())
            .unwrap_or(defaults.benchmark_symbol);
        let benchmark_gap_warn_days =
            optional_setting_usize(settings, "BACKTEST_BENCHMARK_GAP_WARN_DAYS", 0)?
                .map(|value| value as i64)
                .unwrap_or(defaults.benchmark_gap_warn_days);
        let max_entry_gap_days = optional_setting_usize(settings, "BACKTEST_MAX_ENTRY_GAP_DAYS", 0)?
            .map(|value| value as i64)
            .unwrap_or(defaults.max_entry_gap_days);
        let default_horizons = optional_setting_usize_list(settings, "BACKTEST_HORIZONS")?
            .unwrap_or(defaults.default_horizons);
        let primary_horizon = optional_setting_usize(settings, "BACKTEST_PRIMARY_HORIZON", 1)?
            .unwrap_or(defaults.primary_horizon);
        let initial_capital = optional_setting_f64(settings, "EQUITY_INITIAL_CAPITAL")?
            .unwrap_or(defaults.initial_capital);
        if initial_capital <= 0.0 {
            return Err(invalid(
                "EQUITY_INITIAL_CAPITAL",
                format!("must be > 0 (value: {})", initial_capital),
            ));
        }
        let optimizer = match optional_setting(settings, "WEIGHT_OPTIMIZER") {
            Some(raw) => OptimizerChoice::parse(&raw)?,
            None => defaults.optimizer,
        };

        Ok(Self {
            worker_count,
            lookback_years,
            benchmark_symbol,
            benchmark_gap_warn_days,
            max_entry_gap_days,
            default_horizons,
            primary_horizon,
            initial_capital,
            optimizer,
        })
    }

    /// Reads every known setting from the process environment.
    pub fn from_env() -> EngineResult<Self> {
        let settings: HashMap<String, String> = SETTING_KEYS
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|value| (key.to_string(), value)))
            .collect();
        Self::from_settings_map(&settings)
    }
}

fn invalid(key: &str, reason: String) -> EngineError {
    EngineError::InvalidSetting {
        key: key.to_string(),
        reason,
    }
}

fn optional_setting(settings: &HashMap<String, String>, key: &str) -> Option<String> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string())
}

fn optional_setting_f64(settings: &HashMap<String, String>, key: &str) -> EngineResult<Option<f64>> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(None);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| invalid(key, format!("must be a number (value: {})", raw)))?;
    if !value.is_finite() {
        return Err(invalid(key, format!("must be finite (value: {})", raw)));
    }
    Ok(Some(value))
}

fn optional_setting_usize(
    settings: &HashMap<String, String>,
    key: &str,
    min: usize,
) -> EngineResult<Option<usize>> {
    let Some(value) = optional_setting_f64(settings, key)? else {
        return Ok(None);
    };
    if value.fract() != 0.0 {
        return Err(invalid(key, format!("must be an integer (value: {})", value)));
    }
    if value < min as f64 {
        return Err(invalid(key, format!("must be >= {} (value: {})", min, value)));
    }
    Ok(Some(value as usize))
}

fn optional_setting_usize_list(
    settings: &HashMap<String, String>,
    key: &str,
) -> EngineResult<Option<Vec<usize>>> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(None);
    };
    let trimmed = raw.trim().trim_matches(|c| c == '[' || c == ']');
    let mut values = Vec::new();

    for part in trimmed.split(|c: char| c == ',' || c.is_whitespace()) {
        let entry = part.trim();
        if entry.is_empty() {
            continue;
        }
        let value = entry
            .parse::<usize>()
            .map_err(|_| invalid(key, format!("must be a list of integers (value: {})", raw)))?;
        if value == 0 {
            return Err(invalid(key, format!("horizons must be positive (value: {})", raw)));
        }
        values.push(value);
    }

    if values.is_empty() {
        return Err(invalid(
            key,
            format!("must contain at least one horizon (value: {})", raw),
        ));
    }

    values.sort_unstable();
    values.dedup();
    Ok(Some(values))
}
