use crate::candle_utils::group_candles_by_ticker;
use crate::models::Candle;
use anyhow::Result;
use chrono::{Months, NaiveDate};
use log::{debug, warn};
use std::collections::HashMap;

/// Raw historical price source. Used independently for point-in-time
/// lookbacks and for future windows, so implementations must not assume a
/// particular call order.
pub trait HistoricalDataSource: Send + Sync {
    /// Rows for `symbol` whose trading date lies in `[start, end]`, sorted by
    /// date. An empty vector means no data.
    fn get_history(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<Candle>>;
}

/// Serves candles already held in memory.
pub struct InMemoryDataSource {
    series: HashMap<String, Vec<Candle>>,
}

impl InMemoryDataSource {
    pub fn new(candles: Vec<Candle>) -> Self {
        Self {
            series: group_candles_by_ticker(candles),
        }
    }
}

impl HistoricalDataSource for InMemoryDataSource {
    fn get_history(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<Candle>> {
        Ok(self
            .series
            .get(symbol)
            .map(|candles| {
                candles
                    .iter()
                    .filter(|c| c.date >= start && c.date <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Hands out history truncated at a simulated "today".
///
/// The `max(date) <= as_of` guarantee is enforced here regardless of what the
/// upstream source returns.
pub struct PointInTimeDataGate<'a> {
    source: &'a dyn HistoricalDataSource,
    lookback_years: u32,
}

impl<'a> PointInTimeDataGate<'a> {
    pub fn new(source: &'a dyn HistoricalDataSource, lookback_years: u32) -> Self {
        Self {
            source,
            lookback_years,
        }
    }

    pub fn lookback_start(&self, as_of: NaiveDate) -> NaiveDate {
        as_of
            .checked_sub_months(Months::new(self.lookback_years.saturating_mul(12)))
            .unwrap_or(NaiveDate::MIN)
    }

    /// Returns `None` when the source fails or nothing survives truncation.
    /// Callers must treat `None` as unscoreable, never as zero-valued data.
    pub fn history(&self, symbol: &str, as_of: NaiveDate) -> Option<Vec<Candle>> {
        let start = self.lookback_start(as_of);
        let mut candles = match self.source.get_history(symbol, start, as_of) {
            Ok(candles) => candles,
            Err(error) => {
                warn!(
                    "History fetch failed for {} as of {}: {}",
                    symbol, as_of, error
                );
                return None;
            }
        };

        let fetched = candles.len();
        candles.retain(|c| c.date <= as_of);
        let leaked = fetched - candles.len();
        if leaked > 0 {
            warn!(
                "Dropped {} row{} dated after {} from {} history",
                leaked,
                if leaked == 1 { "" } else { "s" },
                as_of,
                symbol
            );
        }

        if candles.is_empty() {
            debug!("No point-in-time history for {} as of {}", symbol, as_of);
            return None;
        }

        candles.sort_by_key(|c| c.date);
        Some(candles)
    }
}
