use anyhow::{anyhow, Result};
use backtest_engine::analyzer::PerformanceAnalyzer;
use backtest_engine::config::BacktestSettings;
use backtest_engine::data_gate::{HistoricalDataSource, PointInTimeDataGate};
use backtest_engine::equity_curve::EquityCurveBuilder;
use backtest_engine::error::EngineError;
use backtest_engine::models::{BacktestRequest, Candle, Frequency, Recommendation};
use backtest_engine::orchestrator::{BacktestOrchestrator, BacktestRun};
use backtest_engine::run_status::RunStatus;
use backtest_engine::scorer::{PointInTimeData, ScoreOutcome, Scorer};
use backtest_engine::store::{InMemoryResultStore, ResultStore, RunRecord};
use backtest_engine::summary::SummaryStatisticsEngine;
use backtest_engine::weight_optimizer::ConstrainedOptimizer;
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;

fn ensure_test_env() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn weekdays(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let mut current = start;
    while current <= end {
        if !matches!(current.weekday(), Weekday::Sat | Weekday::Sun) {
            dates.push(current);
        }
        current += Duration::days(1);
    }
    dates
}

fn drift_series(symbol: &str, dates: &[NaiveDate], daily_pct: f64) -> Vec<Candle> {
    dates
        .iter()
        .enumerate()
        .map(|(index, date)| {
            let close = 100.0 * (1.0 + daily_pct / 100.0).powi(index as i32);
            Candle {
                ticker: symbol.to_string(),
                date: *date,
                open: close,
                high: close,
                low: close,
                close,
                volume: 1_000_000,
            }
        })
        .collect()
}

/// In-memory weekday market with optional leaked rows past `end` and symbols
/// whose fetches always fail.
struct SyntheticSource {
    series: HashMap<String, Vec<Candle>>,
    leak_days: i64,
    failing: HashSet<String>,
}

impl SyntheticSource {
    fn new() -> Self {
        Self {
            series: HashMap::new(),
            leak_days: 0,
            failing: HashSet::new(),
        }
    }

    fn with_series(mut self, symbol: &str, candles: Vec<Candle>) -> Self {
        self.series.insert(symbol.to_string(), candles);
        self
    }

    fn leaking(mut self, days: i64) -> Self {
        self.leak_days = days;
        self
    }

    fn failing_for(mut self, symbol: &str) -> Self {
        self.failing.insert(symbol.to_string());
        self
    }

    fn has_row(&self, symbol: &str, date: NaiveDate) -> bool {
        self.series
            .get(symbol)
            .map(|rows| rows.iter().any(|c| c.date == date))
            .unwrap_or(false)
    }
}

impl HistoricalDataSource for SyntheticSource {
    fn get_history(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<Candle>> {
        if self.failing.contains(symbol) {
            return Err(anyhow!("feed unavailable for {}", symbol));
        }
        let visible_end = end + Duration::days(self.leak_days);
        Ok(self
            .series
            .get(symbol)
            .map(|rows| {
                rows.iter()
                    .filter(|c| c.date >= start && c.date <= visible_end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// BUY/80 for everything, while recording any candle dated after `as_of`.
#[derive(Default)]
struct AlwaysBuy {
    calls: AtomicUsize,
    lookahead_violations: AtomicUsize,
}

impl Scorer for AlwaysBuy {
    fn score(&self, _symbol: &str, data: &PointInTimeData) -> Result<ScoreOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if data.candles.iter().any(|c| c.date > data.as_of) {
            self.lookahead_violations.fetch_add(1, Ordering::SeqCst);
        }
        Ok(ScoreOutcome {
            composite_score: 80.0,
            confidence: 0.8,
            recommendation: Recommendation::Buy,
            agent_scores: BTreeMap::from([("fixed".to_string(), 80.0)]),
            market_regime: Some("bull".to_string()),
            error: None,
        })
    }
}

/// Trailing-momentum scorer: BUY on a positive 20-day trailing return, SELL on
/// a negative one. Fails for "ERR" and returns a zero score for "ZERO".
struct MomentumScorer;

impl Scorer for MomentumScorer {
    fn score(&self, symbol: &str, data: &PointInTimeData) -> Result<ScoreOutcome> {
        if symbol == "ERR" {
            return Err(anyhow!("agent timeout"));
        }
        let closes = data.closes();
        let latest = *closes.last().ok_or_else(|| anyhow!("no closes"))?;
        let base = closes[closes.len().saturating_sub(21)];
        let momentum = (latest - base) / base * 100.0;
        let recommendation = if momentum > 0.5 {
            Recommendation::Buy
        } else if momentum < -0.5 {
            Recommendation::Sell
        } else {
            Recommendation::Hold
        };
        let composite_score = if symbol == "ZERO" { 0.0 } else { 50.0 + momentum };
        let noise = if data.as_of.day() % 2 == 0 { 70.0 } else { 30.0 };
        Ok(ScoreOutcome {
            composite_score,
            confidence: 0.6,
            recommendation,
            agent_scores: BTreeMap::from([
                ("momentum".to_string(), 50.0 + momentum),
                ("calendar".to_string(), noise),
            ]),
            market_regime: None,
            error: None,
        })
    }
}

fn market() -> SyntheticSource {
    let dates = weekdays(ymd(2018, 1, 1), ymd(2022, 12, 30));
    SyntheticSource::new()
        .with_series("UP", drift_series("UP", &dates, 1.0))
        .with_series("DOWN", drift_series("DOWN", &dates, -0.3))
        .with_series("FLAT", drift_series("FLAT", &dates, 0.0))
        .with_series("SPY", drift_series("SPY", &dates, 0.0))
}

fn request(symbols: &[&str], start: NaiveDate, end: NaiveDate, parallel: bool) -> BacktestRequest {
    BacktestRequest {
        symbols: symbols.iter().map(|s| s.to_string()).collect(),
        start_date: start,
        end_date: end,
        frequency: Frequency::Monthly,
        horizons: vec![20, 60, 120],
        parallel,
    }
}

fn run_backtest(
    source: &SyntheticSource,
    scorer: &dyn Scorer,
    request: &BacktestRequest,
    status: RunStatus,
) -> BacktestRun {
    let orchestrator = BacktestOrchestrator::new(source, scorer, BacktestSettings::default(), status);
    orchestrator.run(request).expect("valid request")
}

#[test]
fn up_drift_against_flat_benchmark_hits_every_time() {
    ensure_test_env();
    let source = market();
    let scorer = AlwaysBuy::default();
    let run = run_backtest(
        &source,
        &scorer,
        &request(&["UP"], ymd(2020, 1, 1), ymd(2020, 12, 31), true),
        RunStatus::new(),
    );

    assert!(!run.cancelled);
    assert_eq!(run.signals.len(), run.planned_tasks);
    let summary = SummaryStatisticsEngine::summarize(&run.signals, 60).unwrap();
    let primary = summary.horizon(60).unwrap();
    assert!((primary.hit_rate - 100.0).abs() < 1e-9);
    assert_eq!(primary.hit_rate_observations, run.signals.len());
    assert!(primary.buy_avg_alpha.unwrap() > 0.0);
    assert!(run.signals.iter().all(|s| s.alpha_for(60).unwrap() > 0.0));
}

#[test]
fn exit_is_exactly_horizon_trading_days_after_entry() {
    ensure_test_env();
    let source = market();
    let scorer = AlwaysBuy::default();
    let run = run_backtest(
        &source,
        &scorer,
        &request(&["UP", "FLAT"], ymd(2019, 6, 1), ymd(2020, 6, 1), true),
        RunStatus::new(),
    );

    assert!(!run.signals.is_empty());
    for signal in run.signals.iter().filter(|s| s.symbol == "UP") {
        for horizon in [20usize, 60, 120] {
            let expected = (1.01_f64.powi(horizon as i32) - 1.0) * 100.0;
            let actual = signal.forward_return(horizon).expect("horizon populated");
            assert!(
                (actual - expected).abs() < 1e-6 * expected.abs(),
                "{} horizon {}: {} vs {}",
                signal.entry_date,
                horizon,
                actual,
                expected
            );
            assert!(signal.benchmark_returns[&horizon].abs() < 1e-9);
        }
    }
    for signal in run.signals.iter().filter(|s| s.symbol == "FLAT") {
        assert!(signal.alpha.values().all(|a| a.abs() < 1e-9));
    }
}

#[test]
fn entry_dates_never_follow_requested_dates() {
    ensure_test_env();
    let source = market();
    let scorer = AlwaysBuy::default();
    let mut weekend_request = request(&["UP", "DOWN"], ymd(2020, 1, 4), ymd(2020, 6, 27), true);
    weekend_request.frequency = Frequency::Weekly;
    let run = run_backtest(&source, &scorer, &weekend_request, RunStatus::new());

    assert_eq!(run.signals.len(), run.planned_tasks);
    for signal in &run.signals {
        assert_eq!(signal.requested_date.weekday(), Weekday::Sat);
        assert!(signal.entry_date <= signal.requested_date);
        assert_eq!(signal.entry_date, signal.requested_date - Duration::days(1));
        assert!(source.has_row(&signal.symbol, signal.entry_date));
    }
}

#[test]
fn gate_never_returns_rows_after_as_of_even_when_source_leaks() {
    ensure_test_env();
    let source = market().leaking(45);
    let gate = PointInTimeDataGate::new(&source, 5);

    let mut as_of = ymd(2019, 1, 1);
    let mut step = 1;
    while as_of < ymd(2022, 6, 1) {
        let history = gate.history("UP", as_of).expect("history");
        assert!(history.iter().all(|c| c.date <= as_of), "leak at {}", as_of);
        as_of += Duration::days(step);
        step = step % 11 + 3;
    }
}

#[test]
fn scorer_only_sees_point_in_time_data() {
    ensure_test_env();
    let source = market().leaking(60);
    let scorer = AlwaysBuy::default();
    let run = run_backtest(
        &source,
        &scorer,
        &request(&["UP", "DOWN", "FLAT"], ymd(2019, 1, 1), ymd(2021, 1, 1), true),
        RunStatus::new(),
    );

    assert!(scorer.calls.load(Ordering::SeqCst) > 0);
    assert_eq!(scorer.lookahead_violations.load(Ordering::SeqCst), 0);
    assert_eq!(run.signals.len(), run.planned_tasks);
}

#[test]
fn identical_inputs_produce_identical_signals() {
    ensure_test_env();
    let source = market();
    let scorer = MomentumScorer;
    let symbols = ["UP", "DOWN", "FLAT"];

    let first = run_backtest(
        &source,
        &scorer,
        &request(&symbols, ymd(2019, 1, 1), ymd(2020, 12, 31), true),
        RunStatus::new(),
    );
    let second = run_backtest(
        &source,
        &scorer,
        &request(&symbols, ymd(2019, 1, 1), ymd(2020, 12, 31), true),
        RunStatus::new(),
    );
    let sequential = run_backtest(
        &source,
        &scorer,
        &request(&symbols, ymd(2019, 1, 1), ymd(2020, 12, 31), false),
        RunStatus::new(),
    );

    assert!(!first.signals.is_empty());
    assert_eq!(first.signals, second.signals);
    assert_eq!(first.signals, sequential.signals);
}

#[test]
fn short_future_window_omits_long_horizons() {
    ensure_test_env();
    let dates = weekdays(ymd(2018, 1, 1), ymd(2020, 12, 31));
    let long_benchmark = weekdays(ymd(2018, 1, 1), ymd(2022, 12, 30));
    let source = SyntheticSource::new()
        .with_series("UP", drift_series("UP", &dates, 1.0))
        .with_series("SPY", drift_series("SPY", &long_benchmark, 0.0));
    let scorer = AlwaysBuy::default();
    let mut single = request(&["UP"], ymd(2020, 11, 2), ymd(2020, 11, 2), false);
    single.horizons = vec![20, 120];
    let run = run_backtest(&source, &scorer, &single, RunStatus::new());

    assert_eq!(run.signals.len(), 1);
    let signal = &run.signals[0];
    assert!(signal.forward_returns.contains_key(&20));
    assert!(!signal.forward_returns.contains_key(&120));
    assert!(!signal.alpha.contains_key(&120));
    assert!(signal.benchmark_returns.contains_key(&120));
}

#[test]
fn benchmark_gap_is_bridged_not_fatal() {
    ensure_test_env();
    let dates = weekdays(ymd(2018, 1, 1), ymd(2022, 12, 30));
    let benchmark_dates: Vec<NaiveDate> = dates
        .iter()
        .copied()
        .filter(|d| !(*d >= ymd(2020, 3, 2) && *d <= ymd(2020, 3, 3)))
        .collect();
    let source = SyntheticSource::new()
        .with_series("UP", drift_series("UP", &dates, 1.0))
        .with_series("SPY", drift_series("SPY", &benchmark_dates, 0.0));
    let scorer = AlwaysBuy::default();
    let run = run_backtest(
        &source,
        &scorer,
        &request(&["UP"], ymd(2020, 3, 2), ymd(2020, 3, 2), false),
        RunStatus::new(),
    );

    assert_eq!(run.signals.len(), 1);
    assert!(run.signals[0].alpha.contains_key(&60));
}

#[test]
fn failing_points_are_skipped_without_aborting() {
    ensure_test_env();
    let dates = weekdays(ymd(2018, 1, 1), ymd(2022, 12, 30));
    let source = market()
        .with_series("ERR", drift_series("ERR", &dates, 0.2))
        .with_series("ZERO", drift_series("ZERO", &dates, 0.2))
        .with_series("BAD", drift_series("BAD", &dates, 0.2))
        .failing_for("BAD");
    let scorer = MomentumScorer;
    let run = run_backtest(
        &source,
        &scorer,
        &request(
            &["UP", "ERR", "ZERO", "BAD", "MISSING"],
            ymd(2020, 1, 1),
            ymd(2020, 6, 30),
            true,
        ),
        RunStatus::new(),
    );

    let dates_in_grid = run.planned_tasks / 5;
    assert_eq!(run.completed_tasks, run.planned_tasks);
    assert!(run.signals.iter().all(|s| s.symbol == "UP"));
    assert_eq!(run.signals.len(), dates_in_grid);
    assert_eq!(run.skipped_scoring, 2 * dates_in_grid);
    assert_eq!(run.skipped_no_data, 2 * dates_in_grid);
}

#[test]
fn cancellation_returns_a_partial_summarizable_run() {
    ensure_test_env();

    struct CancelAfter {
        status: RunStatus,
        after: usize,
        calls: AtomicUsize,
    }

    impl Scorer for CancelAfter {
        fn score(&self, symbol: &str, data: &PointInTimeData) -> Result<ScoreOutcome> {
            let calls = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if calls >= self.after {
                self.status.cancel();
            }
            AlwaysBuy::default().score(symbol, data)
        }
    }

    let source = market();
    let status = RunStatus::new();
    let scorer = CancelAfter {
        status: status.clone(),
        after: 3,
        calls: AtomicUsize::new(0),
    };
    let run = run_backtest(
        &source,
        &scorer,
        &request(&["UP", "DOWN"], ymd(2019, 1, 1), ymd(2020, 12, 31), false),
        status.clone(),
    );

    assert!(run.cancelled);
    assert!(status.snapshot().cancelled);
    assert_eq!(run.signals.len(), 3);
    assert!(run.planned_tasks > run.completed_tasks);
    assert!(SummaryStatisticsEngine::summarize(&run.signals, 60).is_ok());
}

#[test]
fn cancelled_before_dispatch_yields_empty_run() {
    ensure_test_env();
    let source = market();
    let scorer = AlwaysBuy::default();
    let status = RunStatus::new();
    status.cancel();
    let run = run_backtest(
        &source,
        &scorer,
        &request(&["UP", "DOWN"], ymd(2019, 1, 1), ymd(2020, 12, 31), true),
        status,
    );

    assert!(run.cancelled);
    assert!(run.signals.is_empty());
    assert_eq!(scorer.calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        SummaryStatisticsEngine::summarize(&run.signals, 60),
        Err(EngineError::EmptySignalSet)
    );
    let analysis = PerformanceAnalyzer::new(Box::new(ConstrainedOptimizer::default()), 60)
        .analyze(&run.signals, &BTreeMap::new());
    assert!(analysis.is_empty());
    let curve = EquityCurveBuilder::new(100_000.0, 60).build(&run.signals);
    assert!(curve.points.is_empty());
}

#[test]
fn invalid_requests_fail_before_any_scoring() {
    ensure_test_env();
    let source = market();
    let scorer = AlwaysBuy::default();
    let orchestrator =
        BacktestOrchestrator::new(&source, &scorer, BacktestSettings::default(), RunStatus::new());

    let reversed = request(&["UP"], ymd(2021, 1, 1), ymd(2020, 1, 1), true);
    assert!(matches!(
        orchestrator.run(&reversed),
        Err(EngineError::InvalidRequest(_))
    ));
    assert_eq!(scorer.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn downstream_consumers_hold_their_invariants() {
    ensure_test_env();
    let source = market();
    let scorer = MomentumScorer;
    let req = request(&["UP", "DOWN", "FLAT"], ymd(2019, 1, 1), ymd(2021, 6, 30), true);
    let run = run_backtest(&source, &scorer, &req, RunStatus::new());

    let summary = SummaryStatisticsEngine::summarize(&run.signals, 60).unwrap();
    assert_eq!(
        summary.buy_signals + summary.sell_signals + summary.neutral_signals,
        summary.total_signals
    );
    assert!(summary.win_loss_ratio >= 0.0);
    for stats in &summary.horizons {
        assert!((0.0..=100.0).contains(&stats.hit_rate));
        assert!((0.0..=100.0).contains(&stats.sell_hit_rate));
    }

    let current = BTreeMap::from([("momentum".to_string(), 0.5), ("calendar".to_string(), 0.5)]);
    let analysis =
        PerformanceAnalyzer::from_settings(&BacktestSettings::default()).analyze(&run.signals, &current);
    let optimal = analysis.optimal_weights.expect("enough observations");
    let total: f64 = optimal.weights.values().sum();
    assert!((total - 1.0).abs() < 1e-6);
    assert!(optimal.weights.values().all(|w| *w >= 0.0 && *w <= 0.6 + 1e-9));

    let curve = EquityCurveBuilder::from_settings(&BacktestSettings::default()).build(&run.signals);
    assert!(!curve.points.is_empty());
    assert!(curve.max_drawdown_pct >= 0.0);

    let store = InMemoryResultStore::new();
    let id = store
        .save(RunRecord::new("momentum", &req, run.signals.clone(), Some(summary)))
        .unwrap();
    let stored = store.get(&id).unwrap().expect("stored");
    assert_eq!(stored.signals, run.signals);
    assert_eq!(store.list_recent(10).unwrap().len(), 1);
}
