pub mod equity_curve;
pub mod optimize_weights;
pub mod summarize;

use crate::store::RunRecord;
use anyhow::Result;
use log::info;
use serde::Serialize;
use std::path::Path;

pub(crate) fn load_run(path: &Path) -> Result<RunRecord> {
    let record = RunRecord::load_json(path)?;
    info!(
        "Loaded run {} ({}) with {} signals for {} symbol{} ({} to {}, {})",
        record.name,
        record.id,
        record.signals.len(),
        record.symbols.len(),
        if record.symbols.len() == 1 { "" } else { "s" },
        record.date_range.start,
        record.date_range.end,
        record.frequency.as_str()
    );
    Ok(record)
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub(crate) fn format_optional(value: Option<f64>, suffix: &str) -> String {
    match value {
        Some(v) => format!("{:.2}{}", v, suffix),
        None => "n/a".to_string(),
    }
}
