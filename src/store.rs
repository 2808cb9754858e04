use crate::models::{BacktestRequest, BacktestSignal, Frequency};
use crate::summary::BacktestSummary;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Immutable record of one backtest run, as handed to a [`ResultStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub date_range: DateRange,
    pub symbols: Vec<String>,
    pub frequency: Frequency,
    pub horizons: Vec<usize>,
    #[serde(default)]
    pub summary: Option<BacktestSummary>,
    pub signals: Vec<BacktestSignal>,
}

impl RunRecord {
    pub fn new(
        name: &str,
        request: &BacktestRequest,
        signals: Vec<BacktestSignal>,
        summary: Option<BacktestSummary>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
            date_range: DateRange {
                start: request.start_date,
                end: request.end_date,
            },
            symbols: request.symbols.clone(),
            frequency: request.frequency,
            horizons: request.horizons.clone(),
            summary,
            signals,
        }
    }

    pub fn load_json(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read run record {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse run record {}", path.display()))
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        let encoded = serde_json::to_string_pretty(self)?;
        fs::write(path, encoded)
            .with_context(|| format!("Failed to write run record {}", path.display()))
    }
}

/// Persistence boundary for run records. The engine never persists on its own.
pub trait ResultStore: Send + Sync {
    /// Stores the record and returns its id.
    fn save(&self, record: RunRecord) -> Result<String>;
    fn get(&self, id: &str) -> Result<Option<RunRecord>>;
    /// Most recent runs first, at most `limit`.
    fn list_recent(&self, limit: usize) -> Result<Vec<RunRecord>>;
}

#[derive(Default)]
pub struct InMemoryResultStore {
    records: Mutex<Vec<RunRecord>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultStore for InMemoryResultStore {
    fn save(&self, record: RunRecord) -> Result<String> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| anyhow!("Result store lock poisoned"))?;
        if records.iter().any(|existing| existing.id == record.id) {
            return Err(anyhow!("Run {} is already stored", record.id));
        }
        let id = record.id.clone();
        records.push(record);
        Ok(id)
    }

    fn get(&self, id: &str) -> Result<Option<RunRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|_| anyhow!("Result store lock poisoned"))?;
        Ok(records.iter().find(|record| record.id == id).cloned())
    }

    fn list_recent(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|_| anyhow!("Result store lock poisoned"))?;
        let mut ordered: Vec<(usize, &RunRecord)> = records.iter().enumerate().collect();
        ordered.sort_by(|a, b| {
            b.1.created_at
                .cmp(&a.1.created_at)
                .then_with(|| b.0.cmp(&a.0))
        });
        Ok(ordered
            .into_iter()
            .take(limit)
            .map(|(_, record)| record.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> BacktestRequest {
        BacktestRequest {
            symbols: vec!["AAA".to_string()],
            start_date: NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2021, 6, 30).unwrap(),
            frequency: Frequency::Monthly,
            horizons: vec![20, 60],
            parallel: false,
        }
    }

    #[test]
    fn save_get_and_list_recent() {
        let store = InMemoryResultStore::new();
        let first = store
            .save(RunRecord::new("first", &request(), Vec::new(), None))
            .unwrap();
        let second = store
            .save(RunRecord::new("second", &request(), Vec::new(), None))
            .unwrap();
        assert_ne!(first, second);

        let loaded = store.get(&first).unwrap().expect("stored run");
        assert_eq!(loaded.name, "first");
        assert!(store.get("missing").unwrap().is_none());

        let recent = store.list_recent(1).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].name, "second");
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let store = InMemoryResultStore::new();
        let record = RunRecord::new("dup", &request(), Vec::new(), None);
        store.save(record.clone()).unwrap();
        assert!(store.save(record).is_err());
    }

    #[test]
    fn json_files_round_trip() {
        let record = RunRecord::new("file", &request(), Vec::new(), None);
        let path = std::env::temp_dir().join(format!("run-record-{}.json", record.id));
        record.save_json(&path).unwrap();
        let loaded = RunRecord::load_json(&path).unwrap();
        let _ = fs::remove_file(&path);
        assert_eq!(loaded, record);
    }
}
