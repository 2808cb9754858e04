use crate::candle_utils::{
    calendar_gap_days, horizon_span_days, nearest_index, offset_date_saturating,
};
use crate::data_gate::HistoricalDataSource;
use crate::forward_returns::returns_from_index;
use crate::models::Candle;
use chrono::{Months, NaiveDate};
use log::{debug, info, warn};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignedDate {
    pub index: usize,
    pub date: NaiveDate,
    pub gap_days: i64,
}

/// Benchmark index series loaded once per run and shared read-only by every
/// worker.
#[derive(Debug, Clone)]
pub struct BenchmarkAligner {
    symbol: String,
    series: Vec<Candle>,
    gap_warn_days: i64,
}

impl BenchmarkAligner {
    /// Loads `[start - 1y, end + 2 * max_horizon days]` in a single fetch.
    /// A failed fetch leaves the aligner empty so every lookup returns no data.
    pub fn load(
        source: &dyn HistoricalDataSource,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        max_horizon: usize,
        gap_warn_days: i64,
    ) -> Self {
        let fetch_start = start.checked_sub_months(Months::new(12)).unwrap_or(start);
        let fetch_end = offset_date_saturating(end, horizon_span_days(max_horizon, 2, 0));

        let series = match source.get_history(symbol, fetch_start, fetch_end) {
            Ok(candles) => candles,
            Err(error) => {
                warn!(
                    "Benchmark {} unavailable for {} to {}: {}",
                    symbol, fetch_start, fetch_end, error
                );
                Vec::new()
            }
        };
        if series.is_empty() {
            warn!("No benchmark data for {}; alpha will be omitted", symbol);
        } else {
            info!(
                "Loaded {} benchmark rows for {} ({} to {})",
                series.len(),
                symbol,
                fetch_start,
                fetch_end
            );
        }

        Self::from_series(symbol, series, gap_warn_days)
    }

    pub fn from_series(symbol: &str, mut series: Vec<Candle>, gap_warn_days: i64) -> Self {
        series.sort_by_key(|c| c.date);
        Self {
            symbol: symbol.to_string(),
            series,
            gap_warn_days,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Resolves `date` to the nearest benchmark trading day in either
    /// direction. Large gaps are logged but still resolved.
    pub fn align(&self, date: NaiveDate) -> Option<AlignedDate> {
        let index = nearest_index(&self.series, date)?;
        let resolved = self.series[index].date;
        let gap_days = calendar_gap_days(resolved, date);

        if gap_days > self.gap_warn_days {
            warn!(
                "Benchmark {} has no trading day within {} days of {}; using {} ({} day gap)",
                self.symbol, self.gap_warn_days, date, resolved, gap_days
            );
        } else if gap_days > 0 {
            debug!(
                "Benchmark {} aligned {} to {} ({} day gap)",
                self.symbol, date, resolved, gap_days
            );
        }

        Some(AlignedDate {
            index,
            date: resolved,
            gap_days,
        })
    }

    pub fn benchmark_returns(&self, date: NaiveDate, horizons: &[usize]) -> BTreeMap<usize, f64> {
        let Some(aligned) = self.align(date) else {
            return BTreeMap::new();
        };
        returns_from_index(&self.series, aligned.index, horizons, &self.symbol)
    }
}
