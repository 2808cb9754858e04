use crate::config::BacktestSettings;
use crate::models::BacktestSignal;
use crate::statistics::mean;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub signal_count: usize,
    pub average_return: f64,
    pub portfolio_value: f64,
    pub peak_value: f64,
    /// Percent below the running peak; zero or negative.
    pub drawdown_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecoveryTime {
    NoDrawdown,
    Recovered { periods: usize },
    NotYetRecovered,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityCurve {
    pub initial_capital: f64,
    pub horizon: usize,
    pub points: Vec<EquityPoint>,
    pub final_value: f64,
    pub total_return_pct: f64,
    /// Magnitude of the deepest drawdown, in percent.
    pub max_drawdown_pct: f64,
    pub max_drawdown_date: Option<NaiveDate>,
    pub recovery: RecoveryTime,
}

/// Equal-weight portfolio compounded across rebalance dates.
pub struct EquityCurveBuilder {
    initial_capital: f64,
    horizon: usize,
}

impl EquityCurveBuilder {
    pub fn new(initial_capital: f64, horizon: usize) -> Self {
        Self {
            initial_capital,
            horizon,
        }
    }

    pub fn from_settings(settings: &BacktestSettings) -> Self {
        Self::new(settings.initial_capital, settings.primary_horizon)
    }

    /// Rebalance dates where no signal has a return for the horizon are left
    /// out. An empty input produces a flat curve with no points.
    pub fn build(&self, signals: &[BacktestSignal]) -> EquityCurve {
        let mut by_date: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
        for signal in signals {
            if let Some(value) = signal.forward_return(self.horizon) {
                by_date.entry(signal.requested_date).or_default().push(value);
            }
        }

        let mut value = self.initial_capital;
        let mut peak = self.initial_capital;
        let mut points = Vec::with_capacity(by_date.len());
        for (date, returns) in by_date {
            let Some(average_return) = mean(&returns) else {
                continue;
            };
            value *= 1.0 + average_return / 100.0;
            peak = peak.max(value);
            let drawdown_pct = if peak > 0.0 {
                (value - peak) / peak * 100.0
            } else {
                0.0
            };
            points.push(EquityPoint {
                date,
                signal_count: returns.len(),
                average_return,
                portfolio_value: value,
                peak_value: peak,
                drawdown_pct,
            });
        }

        let trough = points
            .iter()
            .enumerate()
            .filter(|(_, p)| p.drawdown_pct < 0.0)
            .fold(None, |best: Option<(usize, f64)>, (index, point)| match best {
                Some((_, deepest)) if deepest <= point.drawdown_pct => best,
                _ => Some((index, point.drawdown_pct)),
            });

        let (max_drawdown_pct, max_drawdown_date, recovery) = match trough {
            None => (0.0, None, RecoveryTime::NoDrawdown),
            Some((index, deepest)) => {
                let recovery = points[index + 1..]
                    .iter()
                    .position(|p| p.drawdown_pct >= 0.0)
                    .map(|offset| RecoveryTime::Recovered { periods: offset + 1 })
                    .unwrap_or(RecoveryTime::NotYetRecovered);
                (deepest.abs(), Some(points[index].date), recovery)
            }
        };

        let final_value = points.last().map(|p| p.portfolio_value).unwrap_or(self.initial_capital);
        let total_return_pct = if self.initial_capital > 0.0 {
            (final_value - self.initial_capital) / self.initial_capital * 100.0
        } else {
            0.0
        };

        EquityCurve {
            initial_capital: self.initial_capital,
            horizon: self.horizon,
            points,
            final_value,
            total_return_pct,
            max_drawdown_pct,
            max_drawdown_date,
            recovery,
        }
    }
}
