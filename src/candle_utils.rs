use crate::models::Candle;
use chrono::{Duration, NaiveDate};
use std::collections::HashMap;

/// Groups owned candles keyed by ticker, each series sorted by date.
pub fn group_candles_by_ticker(candles: Vec<Candle>) -> HashMap<String, Vec<Candle>> {
    let mut grouped: HashMap<String, Vec<Candle>> = HashMap::new();
    for candle in candles {
        grouped.entry(candle.ticker.clone()).or_default().push(candle);
    }

    grouped.retain(|_, values| !values.is_empty());
    for values in grouped.values_mut() {
        values.sort_by_key(|c| c.date);
    }

    grouped
}

/// Normalizes a ticker string by trimming whitespace and uppercasing.
pub fn normalize_ticker_symbol(value: &str) -> Option<String> {
    let normalized = value.trim().to_uppercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

pub fn is_sorted_by_date(candles: &[Candle]) -> bool {
    candles.windows(2).all(|pair| pair[0].date <= pair[1].date)
}

/// Index of the first candle dated on or after `date`. Never resolves backwards.
/// Expects `candles` sorted by date.
pub fn first_index_on_or_after(candles: &[Candle], date: NaiveDate) -> Option<usize> {
    let index = candles.partition_point(|c| c.date < date);
    (index < candles.len()).then_some(index)
}

/// Index of the candle closest to `date` in either direction. On an equal
/// distance the earlier candle wins. Expects `candles` sorted by date.
pub fn nearest_index(candles: &[Candle], date: NaiveDate) -> Option<usize> {
    if candles.is_empty() {
        return None;
    }

    let after = candles.partition_point(|c| c.date < date);
    if after < candles.len() && candles[after].date == date {
        return Some(after);
    }
    if after == 0 {
        return Some(0);
    }
    if after == candles.len() {
        return Some(candles.len() - 1);
    }

    let before = after - 1;
    let gap_before = calendar_gap_days(candles[before].date, date);
    let gap_after = calendar_gap_days(candles[after].date, date);
    if gap_after < gap_before {
        Some(after)
    } else {
        Some(before)
    }
}

pub fn calendar_gap_days(a: NaiveDate, b: NaiveDate) -> i64 {
    (a - b).num_days().abs()
}

/// Calendar days spanned by `multiplier * horizon + padding`, saturating
/// instead of wrapping for absurd horizons.
pub fn horizon_span_days(horizon: usize, multiplier: i64, padding: i64) -> i64 {
    i64::try_from(horizon)
        .unwrap_or(i64::MAX)
        .saturating_mul(multiplier)
        .saturating_add(padding)
}

/// `date` moved by `days`, clamped to the representable date range.
pub fn offset_date_saturating(date: NaiveDate, days: i64) -> NaiveDate {
    Duration::try_days(days)
        .and_then(|delta| date.checked_add_signed(delta))
        .unwrap_or(if days < 0 { NaiveDate::MIN } else { NaiveDate::MAX })
}
