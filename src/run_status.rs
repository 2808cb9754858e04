use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Shared progress and cancellation handle for a backtest run. Clones observe
/// the same run.
#[derive(Clone, Default)]
pub struct RunStatus {
    inner: Arc<Mutex<RunStatusData>>,
    cancelled: Arc<AtomicBool>,
}

#[derive(Default)]
struct RunStatusData {
    phase: String,
    total_tasks: usize,
    completed_tasks: usize,
    skipped_tasks: usize,
    signals_emitted: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunStatusSnapshot {
    pub phase: String,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub skipped_tasks: usize,
    pub signals_emitted: usize,
    pub cancelled: bool,
}

impl RunStatus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RunStatusData {
                phase: "Initializing".to_string(),
                ..Default::default()
            })),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_phase<S: Into<String>>(&self, phase: S) {
        if let Ok(mut data) = self.inner.lock() {
            data.phase = phase.into();
        }
    }

    pub fn set_progress(
        &self,
        total_tasks: usize,
        completed_tasks: usize,
        skipped_tasks: usize,
        signals_emitted: usize,
    ) {
        if let Ok(mut data) = self.inner.lock() {
            data.total_tasks = total_tasks;
            data.completed_tasks = completed_tasks;
            data.skipped_tasks = skipped_tasks;
            data.signals_emitted = signals_emitted;
        }
    }

    /// Stops dispatch of further tasks. Tasks already handed to a worker still
    /// finish and are kept.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> RunStatusSnapshot {
        let cancelled = self.is_cancelled();
        if let Ok(data) = self.inner.lock() {
            RunStatusSnapshot {
                phase: data.phase.clone(),
                total_tasks: data.total_tasks,
                completed_tasks: data.completed_tasks,
                skipped_tasks: data.skipped_tasks,
                signals_emitted: data.signals_emitted,
                cancelled,
            }
        } else {
            RunStatusSnapshot {
                phase: "Status unavailable".to_string(),
                total_tasks: 0,
                completed_tasks: 0,
                skipped_tasks: 0,
                signals_emitted: 0,
                cancelled,
            }
        }
    }
}
