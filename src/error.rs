use chrono::NaiveDate;
use thiserror::Error;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Failure taxonomy for the backtesting engine.
///
/// Point-level variants are recovered inside the run (the point is skipped);
/// `EmptySignalSet` is the only run-level hard failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("No point-in-time data for {symbol} as of {date}")]
    DataUnavailable { symbol: String, date: NaiveDate },

    #[error("Scoring failed for {symbol} as of {date}: {reason}")]
    ScoringFailure {
        symbol: String,
        date: NaiveDate,
        reason: String,
    },

    #[error("Trading day alignment failed: {reason}")]
    AlignmentFailure { reason: String },

    #[error("Weight optimization failed: {0}")]
    OptimizationFailure(String),

    #[error("Summary statistics are undefined over an empty signal set")]
    EmptySignalSet,

    #[error("Invalid backtest request: {0}")]
    InvalidRequest(String),

    #[error("Setting {key} is invalid: {reason}")]
    InvalidSetting { key: String, reason: String },
}
