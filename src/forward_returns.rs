use crate::candle_utils::{first_index_on_or_after, is_sorted_by_date};
use crate::models::Candle;
use chrono::NaiveDate;
use log::{debug, warn};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Percentage return from `entry` to `exit`, or `None` when the entry price
/// cannot anchor a return.
pub fn percent_return(entry_price: f64, exit_price: f64) -> Option<f64> {
    if !entry_price.is_finite() || !exit_price.is_finite() || entry_price <= 0.0 {
        return None;
    }
    Some((exit_price - entry_price) / entry_price * 100.0)
}

/// Trading-day offset returns starting at `series[entry_index]`.
///
/// The exit for horizon `N` is exactly `N` rows after the entry row. Horizons
/// without enough rows are left out of the map; an exit that is not strictly
/// after the entry date is treated as corrupted data and dropped.
pub(crate) fn returns_from_index(
    series: &[Candle],
    entry_index: usize,
    horizons: &[usize],
    label: &str,
) -> BTreeMap<usize, f64> {
    let mut returns = BTreeMap::new();
    let Some(entry) = series.get(entry_index) else {
        return returns;
    };
    let trading_days = &series[entry_index..];

    for &horizon in horizons {
        if horizon == 0 || trading_days.len() <= horizon {
            continue;
        }
        let exit = &trading_days[horizon];
        if exit.date <= entry.date {
            warn!(
                "Dropping {}-day horizon for {}: exit date {} is not after entry date {}",
                horizon, label, exit.date, entry.date
            );
            continue;
        }
        if let Some(value) = percent_return(entry.close, exit.close) {
            returns.insert(horizon, value);
        }
    }

    returns
}

pub struct ForwardReturnCalculator;

impl ForwardReturnCalculator {
    /// Forward returns over a window fetched separately from the scoring
    /// history. The window must start at or after `entry_date`; if the entry
    /// date itself is missing, the first later trading day is used instead.
    pub fn forward_returns(
        future_window: &[Candle],
        entry_date: NaiveDate,
        horizons: &[usize],
    ) -> BTreeMap<usize, f64> {
        let window: Cow<[Candle]> = if is_sorted_by_date(future_window) {
            Cow::Borrowed(future_window)
        } else {
            let mut sorted = future_window.to_vec();
            sorted.sort_by_key(|c| c.date);
            Cow::Owned(sorted)
        };

        let Some(entry_index) = first_index_on_or_after(&window, entry_date) else {
            debug!("Future window has no trading days on or after {}", entry_date);
            return BTreeMap::new();
        };

        let entry = &window[entry_index];
        if entry.date != entry_date {
            debug!(
                "Entry date {} missing from future window of {}; relocated forward to {}",
                entry_date, entry.ticker, entry.date
            );
        }

        returns_from_index(&window, entry_index, horizons, &entry.ticker)
    }
}
