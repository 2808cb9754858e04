use crate::benchmark::BenchmarkAligner;
use crate::candle_utils::{
    calendar_gap_days, horizon_span_days, nearest_index, normalize_ticker_symbol,
    offset_date_saturating,
};
use crate::config::BacktestSettings;
use crate::data_gate::{HistoricalDataSource, PointInTimeDataGate};
use crate::error::{EngineError, EngineResult};
use crate::forward_returns::ForwardReturnCalculator;
use crate::models::{compute_alpha, BacktestRequest, BacktestSignal, Candle, Frequency};
use crate::run_status::RunStatus;
use crate::scorer::{PointInTimeData, Scorer};
use chrono::{Duration, NaiveDate};
use crossbeam_channel::{bounded, Receiver, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::thread;
use std::time::Instant;

/// Calendar padding added on top of `2 * max_horizon` when fetching the future
/// window, so long holiday stretches still leave enough trading days.
const FUTURE_WINDOW_PADDING_DAYS: i64 = 14;

#[derive(Debug, Clone)]
struct PointTask {
    symbol: String,
    requested_date: NaiveDate,
}

enum PointOutcome {
    Signal(Box<BacktestSignal>),
    Skipped(EngineError),
}

/// Signals produced by one run plus the bookkeeping needed to tell a complete
/// run from a partial one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BacktestRun {
    pub signals: Vec<BacktestSignal>,
    pub planned_tasks: usize,
    pub completed_tasks: usize,
    pub skipped_no_data: usize,
    pub skipped_scoring: usize,
    pub skipped_alignment: usize,
    pub cancelled: bool,
}

impl BacktestRun {
    pub fn skipped(&self) -> usize {
        self.skipped_no_data + self.skipped_scoring + self.skipped_alignment
    }

    fn record(&mut self, outcome: PointOutcome) {
        self.completed_tasks += 1;
        match outcome {
            PointOutcome::Signal(signal) => self.signals.push(*signal),
            PointOutcome::Skipped(error) => {
                debug!("Skipped point: {}", error);
                match error {
                    EngineError::ScoringFailure { .. } => self.skipped_scoring += 1,
                    EngineError::AlignmentFailure { .. } => self.skipped_alignment += 1,
                    _ => self.skipped_no_data += 1,
                }
            }
        }
    }
}

/// Fixed calendar-step rebalance grid from `start` to `end` inclusive.
pub fn build_date_grid(start: NaiveDate, end: NaiveDate, frequency: Frequency) -> Vec<NaiveDate> {
    let step = Duration::days(frequency.step_days());
    let mut dates = Vec::new();
    let mut current = start;
    while current <= end {
        dates.push(current);
        match current.checked_add_signed(step) {
            Some(next) => current = next,
            None => break,
        }
    }
    dates
}

/// Validated copy of a request: normalised unique symbols and sorted unique
/// horizons. A request without horizons takes `default_horizons`.
pub fn validate_request(
    request: &BacktestRequest,
    default_horizons: &[usize],
) -> EngineResult<BacktestRequest> {
    let mut seen = HashSet::new();
    let symbols: Vec<String> = request
        .symbols
        .iter()
        .filter_map(|raw| normalize_ticker_symbol(raw))
        .filter(|symbol| seen.insert(symbol.clone()))
        .collect();
    if symbols.is_empty() {
        return Err(EngineError::InvalidRequest(
            "at least one symbol is required".to_string(),
        ));
    }
    if request.start_date > request.end_date {
        return Err(EngineError::InvalidRequest(format!(
            "start date {} is after end date {}",
            request.start_date, request.end_date
        )));
    }
    let mut horizons = if request.horizons.is_empty() {
        default_horizons.to_vec()
    } else {
        request.horizons.clone()
    };
    if horizons.is_empty() {
        return Err(EngineError::InvalidRequest(
            "at least one horizon is required".to_string(),
        ));
    }
    if horizons.contains(&0) {
        return Err(EngineError::InvalidRequest(
            "horizons must be positive trading-day counts".to_string(),
        ));
    }

    horizons.sort_unstable();
    horizons.dedup();

    Ok(BacktestRequest {
        symbols,
        start_date: request.start_date,
        end_date: request.end_date,
        frequency: request.frequency,
        horizons,
        parallel: request.parallel,
    })
}

pub struct BacktestOrchestrator<'a> {
    source: &'a dyn HistoricalDataSource,
    scorer: &'a dyn Scorer,
    settings: BacktestSettings,
    status: RunStatus,
}

impl<'a> BacktestOrchestrator<'a> {
    pub fn new(
        source: &'a dyn HistoricalDataSource,
        scorer: &'a dyn Scorer,
        settings: BacktestSettings,
        status: RunStatus,
    ) -> Self {
        Self {
            source,
            scorer,
            settings,
            status,
        }
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    /// Runs the (symbol x date) grid. Individual points that cannot be scored
    /// are counted and skipped; only an invalid request fails the run.
    pub fn run(&self, request: &BacktestRequest) -> EngineResult<BacktestRun> {
        let request = validate_request(request, &self.settings.default_horizons)?;
        let dates = build_date_grid(request.start_date, request.end_date, request.frequency);
        let max_horizon = request.horizons.iter().copied().max().unwrap_or(0);

        let tasks: Vec<PointTask> = dates
            .iter()
            .flat_map(|date| {
                request.symbols.iter().map(move |symbol| PointTask {
                    symbol: symbol.clone(),
                    requested_date: *date,
                })
            })
            .collect();
        let total = tasks.len();

        info!(
            "Backtesting {} symbol{} over {} {} rebalance date{} ({} to {}), horizons {:?}",
            request.symbols.len(),
            if request.symbols.len() == 1 { "" } else { "s" },
            dates.len(),
            request.frequency.as_str(),
            if dates.len() == 1 { "" } else { "s" },
            request.start_date,
            request.end_date,
            request.horizons
        );

        self.status.set_phase(format!(
            "Loading benchmark {}",
            self.settings.benchmark_symbol
        ));
        let benchmark = BenchmarkAligner::load(
            self.source,
            &self.settings.benchmark_symbol,
            request.start_date,
            request.end_date,
            max_horizon,
            self.settings.benchmark_gap_warn_days,
        );

        let started = Instant::now();
        let mut run = BacktestRun {
            planned_tasks: total,
            ..Default::default()
        };
        self.status.set_progress(total, 0, 0, 0);

        let progress = new_progress_bar(total);
        if request.parallel && total > 1 {
            self.run_parallel(tasks, &request.horizons, &benchmark, &mut run, &progress);
        } else {
            self.run_sequential(tasks, &request.horizons, &benchmark, &mut run, &progress);
        }
        run.cancelled = self.status.is_cancelled();

        run.signals.sort_by(|a, b| {
            a.requested_date
                .cmp(&b.requested_date)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });

        if run.cancelled {
            progress.abandon_with_message("Backtest cancelled");
            warn!(
                "Backtest cancelled after {}/{} points; returning {} signals",
                run.completed_tasks,
                total,
                run.signals.len()
            );
            self.status.set_phase("Cancelled");
        } else {
            progress.finish_with_message("Backtest completed");
            self.status.set_phase("Completed");
        }
        info!(
            "Backtest produced {} signals from {} points in {:.1}s (skipped: {} no data, {} scoring, {} alignment)",
            run.signals.len(),
            run.completed_tasks,
            started.elapsed().as_secs_f64(),
            run.skipped_no_data,
            run.skipped_scoring,
            run.skipped_alignment
        );

        Ok(run)
    }

    fn run_sequential(
        &self,
        tasks: Vec<PointTask>,
        horizons: &[usize],
        benchmark: &BenchmarkAligner,
        run: &mut BacktestRun,
        progress: &ProgressBar,
    ) {
        self.status.set_phase("Scoring points sequentially");
        for task in tasks {
            if self.status.is_cancelled() {
                break;
            }
            let outcome = self.evaluate_point(&task, horizons, benchmark);
            run.record(outcome);
            self.report_progress(run, progress);
        }
    }

    fn run_parallel(
        &self,
        tasks: Vec<PointTask>,
        horizons: &[usize],
        benchmark: &BenchmarkAligner,
        run: &mut BacktestRun,
        progress: &ProgressBar,
    ) {
        let total = tasks.len();
        let num_workers = self.settings.worker_count.clamp(1, total.max(1));
        info!("Using {} worker threads for backtest points", num_workers);
        self.status.set_phase(format!(
            "Scoring {} points across {} workers",
            total, num_workers
        ));

        let (task_tx, task_rx): (Sender<PointTask>, Receiver<PointTask>) = bounded(num_workers);
        let (result_tx, result_rx): (Sender<PointOutcome>, Receiver<PointOutcome>) =
            bounded(total);

        thread::scope(|scope| {
            for _ in 0..num_workers {
                let rx = task_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    while let Ok(task) = rx.recv() {
                        let outcome = self.evaluate_point(&task, horizons, benchmark);
                        if result_tx.send(outcome).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(task_rx);
            drop(result_tx);

            let status = &self.status;
            scope.spawn(move || {
                for task in tasks {
                    if status.is_cancelled() {
                        debug!("Cancellation requested; stopping dispatch");
                        break;
                    }
                    if task_tx.send(task).is_err() {
                        break;
                    }
                }
            });

            for outcome in result_rx.iter() {
                run.record(outcome);
                self.report_progress(run, progress);
            }
        });
    }

    fn report_progress(&self, run: &BacktestRun, progress: &ProgressBar) {
        progress.set_position(run.completed_tasks as u64);
        self.status.set_progress(
            run.planned_tasks,
            run.completed_tasks,
            run.skipped(),
            run.signals.len(),
        );
    }

    fn evaluate_point(
        &self,
        task: &PointTask,
        horizons: &[usize],
        benchmark: &BenchmarkAligner,
    ) -> PointOutcome {
        match self.build_signal(task, horizons, benchmark) {
            Ok(signal) => PointOutcome::Signal(Box::new(signal)),
            Err(error) => PointOutcome::Skipped(error),
        }
    }

    fn build_signal(
        &self,
        task: &PointTask,
        horizons: &[usize],
        benchmark: &BenchmarkAligner,
    ) -> EngineResult<BacktestSignal> {
        let symbol = task.symbol.as_str();
        let requested_date = task.requested_date;
        let unavailable = || EngineError::DataUnavailable {
            symbol: symbol.to_string(),
            date: requested_date,
        };

        let gate = PointInTimeDataGate::new(self.source, self.settings.lookback_years);
        let mut history = gate.history(symbol, requested_date).ok_or_else(unavailable)?;

        let entry_index = nearest_index(&history, requested_date).ok_or_else(unavailable)?;
        let entry = &history[entry_index];
        let entry_date = entry.date;
        let entry_price = entry.close;
        if !entry_price.is_finite() || entry_price <= 0.0 {
            return Err(unavailable());
        }
        let gap_days = calendar_gap_days(entry_date, requested_date);
        if gap_days > self.settings.max_entry_gap_days {
            return Err(EngineError::AlignmentFailure {
                reason: format!(
                    "latest {} trading day before {} is {} ({} day gap)",
                    symbol, requested_date, entry_date, gap_days
                ),
            });
        }

        history.truncate(entry_index + 1);
        let data = PointInTimeData {
            symbol: symbol.to_string(),
            as_of: entry_date,
            candles: history,
        };
        let scoring_failure = |reason: String| EngineError::ScoringFailure {
            symbol: symbol.to_string(),
            date: entry_date,
            reason,
        };
        let outcome = self
            .scorer
            .score(symbol, &data)
            .map_err(|error| scoring_failure(error.to_string()))?;
        if let Some(reason) = outcome.rejection_reason() {
            return Err(scoring_failure(reason));
        }

        let future_window = self.future_window(symbol, entry_date, horizons);
        let forward_returns =
            ForwardReturnCalculator::forward_returns(&future_window, entry_date, horizons);
        let benchmark_returns = benchmark.benchmark_returns(entry_date, horizons);
        let alpha = compute_alpha(&forward_returns, &benchmark_returns);

        Ok(BacktestSignal {
            symbol: symbol.to_string(),
            requested_date,
            entry_date,
            recommendation: outcome.recommendation,
            composite_score: outcome.composite_score,
            confidence: outcome.confidence,
            entry_price,
            forward_returns,
            benchmark_returns,
            alpha,
            agent_scores: outcome.agent_scores,
            market_regime: outcome.market_regime,
        })
    }

    /// Second, independent fetch starting at the entry date. Never reuses the
    /// point-in-time history handed to the scorer.
    fn future_window(&self, symbol: &str, entry_date: NaiveDate, horizons: &[usize]) -> Vec<Candle> {
        let max_horizon = horizons.iter().copied().max().unwrap_or(0);
        let end = offset_date_saturating(
            entry_date,
            horizon_span_days(max_horizon, 2, FUTURE_WINDOW_PADDING_DAYS),
        );
        match self.source.get_history(symbol, entry_date, end) {
            Ok(mut window) => {
                window.retain(|c| c.date >= entry_date);
                window
            }
            Err(error) => {
                warn!(
                    "Future window fetch failed for {} from {}: {}",
                    symbol, entry_date, error
                );
                Vec::new()
            }
        }
    }
}

fn new_progress_bar(total: usize) -> ProgressBar {
    let pb = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}
