//! In-memory stores for tests and dry runs.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use pipeline::{
    CostReport, CostReportStore, PartitionKey, PartitionedStore, RunId, Stage, StageRecords,
    StorageError,
};

/// Partitions and cost reports held in memory with the same overwrite
/// semantics as the file-backed stores.
#[derive(Debug, Default)]
pub struct MemoryStore {
    partitions: Mutex<BTreeMap<(Stage, NaiveDate), BTreeMap<RunId, StageRecords>>>,
    reports: Mutex<BTreeMap<(NaiveDate, RunId), CostReport>>,
    failing: Mutex<BTreeSet<Stage>>,
    failing_reports: Mutex<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later write to `stage` fail with an I/O error.
    pub fn fail_writes_to(&self, stage: Stage) {
        self.failing.lock().insert(stage);
    }

    /// Makes every later cost report save fail with an I/O error.
    pub fn fail_report_saves(&self) {
        *self.failing_reports.lock() = true;
    }

    /// Number of partition writes currently stored for `(stage, date)`.
    pub fn partition_count(&self, stage: Stage, date: NaiveDate) -> usize {
        self.partitions
            .lock()
            .get(&(stage, date))
            .map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl PartitionedStore for MemoryStore {
    async fn write(&self, key: &PartitionKey, records: &StageRecords) -> Result<(), StorageError> {
        if records.stage() != key.stage {
            return Err(StorageError::StageMismatch {
                expected: key.stage,
                actual: records.stage(),
            });
        }
        if self.failing.lock().contains(&key.stage) {
            return Err(StorageError::io(
                format!("memory://{}/{}", key.stage, key.date),
                "write rejected",
            ));
        }
        self.partitions
            .lock()
            .entry((key.stage, key.date))
            .or_default()
            .insert(key.run_id.clone(), records.clone());
        Ok(())
    }

    async fn read(&self, stage: Stage, date: NaiveDate) -> Result<StageRecords, StorageError> {
        let partitions = self.partitions.lock();
        let mut records = StageRecords::empty(stage);
        if let Some(runs) = partitions.get(&(stage, date)) {
            for batch in runs.values() {
                records.extend(batch.clone())?;
            }
        }
        Ok(records)
    }

    async fn read_run(&self, key: &PartitionKey) -> Result<StageRecords, StorageError> {
        Ok(self
            .partitions
            .lock()
            .get(&(key.stage, key.date))
            .and_then(|runs| runs.get(&key.run_id))
            .cloned()
            .unwrap_or_else(|| StageRecords::empty(key.stage)))
    }

    async fn runs(&self, stage: Stage, date: NaiveDate) -> Result<Vec<RunId>, StorageError> {
        Ok(self
            .partitions
            .lock()
            .get(&(stage, date))
            .map(|runs| runs.keys().cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl CostReportStore for MemoryStore {
    async fn save(&self, report: &CostReport) -> Result<(), StorageError> {
        if *self.failing_reports.lock() {
            return Err(StorageError::io(
                format!("memory://costs/{}", report.date),
                "save rejected",
            ));
        }
        self.reports
            .lock()
            .insert((report.date, report.run_id.clone()), report.clone());
        Ok(())
    }

    async fn load_day(&self, date: NaiveDate) -> Result<Vec<CostReport>, StorageError> {
        Ok(self
            .reports
            .lock()
            .iter()
            .filter(|((d, _), _)| *d == date)
            .map(|(_, report)| report.clone())
            .collect())
    }
}
