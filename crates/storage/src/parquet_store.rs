//! Local Parquet partition store.
//!
//! Layout, one Snappy-compressed file per run:
//!
//! ```text
//! <root>/<stage>/date=YYYY-MM-DD/run=<run_id>.parquet
//! ```
//!
//! A write goes to a hidden temporary file in the partition directory, is
//! synced, then renamed over the final name. Readers only open
//! `run=*.parquet` files, so they see either the previous complete file or
//! the new one.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use pipeline::{PartitionKey, PartitionedStore, RunId, Stage, StageRecords, StorageError};
use tracing::{debug, warn};

use crate::batch::{from_batch, to_batch};

const RUN_PREFIX: &str = "run=";
const EXTENSION: &str = ".parquet";

/// [`PartitionedStore`] over a local directory tree of Parquet files.
#[derive(Debug, Clone)]
pub struct ParquetStore {
    root: PathBuf,
}

impl ParquetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every run's file for `(stage, date)`.
    pub fn partition_dir(&self, stage: Stage, date: NaiveDate) -> PathBuf {
        let mut dir = self.root.clone();
        dir.extend(stage.as_str().split('/'));
        dir.push(format!("date={}", date.format("%Y-%m-%d")));
        dir
    }

    /// Final file path for `key`.
    pub fn partition_path(&self, key: &PartitionKey) -> PathBuf {
        self.partition_dir(key.stage, key.date)
            .join(format!("{RUN_PREFIX}{}{EXTENSION}", key.run_id))
    }
}

fn run_id_of(path: &Path) -> Option<RunId> {
    let name = path.file_name()?.to_str()?;
    let id = name.strip_prefix(RUN_PREFIX)?.strip_suffix(EXTENSION)?;
    RunId::new(id)
}

/// Complete run files in `dir`, sorted by run id. A missing directory has none.
fn list_runs(dir: &Path) -> Result<Vec<(RunId, PathBuf)>, StorageError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StorageError::io(dir.display(), e)),
    };
    let mut runs = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| StorageError::io(dir.display(), e))?.path();
        if let Some(run_id) = run_id_of(&path) {
            runs.push((run_id, path));
        }
    }
    runs.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(runs)
}

fn write_file(path: &Path, records: &StageRecords) -> Result<(), StorageError> {
    let dir = path
        .parent()
        .ok_or_else(|| StorageError::io(path.display(), "partition path has no parent"))?;
    fs::create_dir_all(dir).map_err(|e| StorageError::io(dir.display(), e))?;

    let batch = to_batch(records)?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| StorageError::io(path.display(), "invalid partition file name"))?;
    let tmp = dir.join(format!(".{file_name}.tmp"));

    let result = (|| {
        let file = File::create(&tmp).map_err(|e| StorageError::io(tmp.display(), e))?;
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))
            .map_err(StorageError::encoding)?;
        writer.write(&batch).map_err(StorageError::encoding)?;
        let file = writer.into_inner().map_err(StorageError::encoding)?;
        file.sync_all().map_err(|e| StorageError::io(tmp.display(), e))?;
        fs::rename(&tmp, path).map_err(|e| StorageError::io(path.display(), e))
    })();

    if result.is_err() {
        if let Err(e) = fs::remove_file(&tmp) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %tmp.display(), error = %e, "temporary partition file left behind");
            }
        }
    }
    result
}

fn read_file(stage: Stage, path: &Path) -> Result<StageRecords, StorageError> {
    let origin = path.display().to_string();
    let corrupt = |e: &dyn std::fmt::Display| StorageError::Corrupt {
        path: origin.clone(),
        message: e.to_string(),
    };
    let file = File::open(path).map_err(|e| StorageError::io(&origin, e))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| corrupt(&e))?
        .build()
        .map_err(|e| corrupt(&e))?;
    let mut records = StageRecords::empty(stage);
    for batch in reader {
        let batch = batch.map_err(|e| corrupt(&e))?;
        records.extend(from_batch(stage, &batch, &origin)?)?;
    }
    Ok(records)
}

/// Runs blocking file work off the async runtime.
async fn blocking<T, F>(what: String, work: F) -> Result<T, StorageError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| StorageError::io(what, e))?
}

#[async_trait]
impl PartitionedStore for ParquetStore {
    async fn write(&self, key: &PartitionKey, records: &StageRecords) -> Result<(), StorageError> {
        if records.stage() != key.stage {
            return Err(StorageError::StageMismatch {
                expected: key.stage,
                actual: records.stage(),
            });
        }
        let path = self.partition_path(key);
        let owned = records.clone();
        let target = path.clone();
        blocking(path.display().to_string(), move || write_file(&target, &owned)).await?;
        debug!(path = %path.display(), records = records.len(), "partition written");
        Ok(())
    }

    async fn read(&self, stage: Stage, date: NaiveDate) -> Result<StageRecords, StorageError> {
        let dir = self.partition_dir(stage, date);
        blocking(dir.display().to_string(), move || {
            let mut records = StageRecords::empty(stage);
            for (_, path) in list_runs(&dir)? {
                records.extend(read_file(stage, &path)?)?;
            }
            Ok(records)
        })
        .await
    }

    async fn read_run(&self, key: &PartitionKey) -> Result<StageRecords, StorageError> {
        let stage = key.stage;
        let path = self.partition_path(key);
        blocking(path.display().to_string(), move || {
            if !path.is_file() {
                return Ok(StageRecords::empty(stage));
            }
            read_file(stage, &path)
        })
        .await
    }

    async fn runs(&self, stage: Stage, date: NaiveDate) -> Result<Vec<RunId>, StorageError> {
        let dir = self.partition_dir(stage, date);
        blocking(dir.display().to_string(), move || {
            Ok(list_runs(&dir)?.into_iter().map(|(id, _)| id).collect())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    #[test]
    fn partition_paths_are_hive_style() {
        let store = ParquetStore::new("/data");
        let key = PartitionKey::new(Stage::RawNews, date(), RunId::new("r1").unwrap());
        assert_eq!(
            store.partition_path(&key),
            PathBuf::from("/data/raw/news/date=2026-10-16/run=r1.parquet")
        );
    }

    #[test]
    fn temporary_and_foreign_files_are_not_runs() {
        assert!(run_id_of(Path::new(".run=r1.parquet.tmp")).is_none());
        assert!(run_id_of(Path::new("notes.txt")).is_none());
        assert_eq!(
            run_id_of(Path::new("run=r1.parquet")),
            RunId::new("r1")
        );
    }
}
