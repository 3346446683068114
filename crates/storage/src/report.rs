//! JSON cost report store.
//!
//! One pretty-printed file per run: `<root>/costs/date=YYYY-MM-DD/run=<run_id>.json`.
//! Saves replace the file atomically via a temporary file and rename.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use pipeline::{CostReport, CostReportStore, RunId, StorageError};
use tokio::fs;
use tracing::debug;

/// [`CostReportStore`] writing JSON files under a root directory.
#[derive(Debug, Clone)]
pub struct JsonReportStore {
    root: PathBuf,
}

impl JsonReportStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn day_dir(&self, date: NaiveDate) -> PathBuf {
        self.root
            .join("costs")
            .join(format!("date={}", date.format("%Y-%m-%d")))
    }

    pub fn report_path(&self, date: NaiveDate, run_id: &RunId) -> PathBuf {
        self.day_dir(date).join(format!("run={run_id}.json"))
    }
}

fn is_report(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("run=") && n.ends_with(".json"))
}

#[async_trait]
impl CostReportStore for JsonReportStore {
    async fn save(&self, report: &CostReport) -> Result<(), StorageError> {
        let dir = self.day_dir(report.date);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::io(dir.display(), e))?;

        let path = self.report_path(report.date, &report.run_id);
        let tmp = dir.join(format!(".run={}.json.tmp", report.run_id));
        let bytes = serde_json::to_vec_pretty(report).map_err(StorageError::encoding)?;
        fs::write(&tmp, bytes)
            .await
            .map_err(|e| StorageError::io(tmp.display(), e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| StorageError::io(path.display(), e))?;
        debug!(path = %path.display(), "cost report saved");
        Ok(())
    }

    async fn load_day(&self, date: NaiveDate) -> Result<Vec<CostReport>, StorageError> {
        let dir = self.day_dir(date);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(dir.display(), e)),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(dir.display(), e))?
        {
            let path = entry.path();
            if is_report(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut reports = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = fs::read(&path)
                .await
                .map_err(|e| StorageError::io(path.display(), e))?;
            let report: CostReport =
                serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;
            reports.push(report);
        }
        reports.sort_by(|a, b| a.run_id.cmp(&b.run_id));
        Ok(reports)
    }
}
