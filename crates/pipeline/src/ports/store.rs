//! Partitioned Store and cost report ports.
//!
//! A partition is identified by `(stage, date, run_id)`. Writes replace the
//! whole partition atomically: writing the same key twice leaves exactly the
//! second batch, and a reader never sees a half-written batch. Reads return
//! every run's records for a `(stage, date)` pair.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    Candidate, CandidateId, ChainFailure, ChainStep, CostReport, DailyAnalysisRecord, GateResult,
    MarketSnapshot, ProcessedRecord, RunId, Timestamp, TokenCost, TokenCount,
};

// ---------------------------------------------------------------------------
// Stages and keys
// ---------------------------------------------------------------------------

/// A persisted processing stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Normalized candidates.
    RawNews,
    /// Market indicator rows.
    RawMarket,
    /// Gate results, admitted or not.
    Gates,
    /// Fully processed records.
    ProcessedNews,
    /// Chain failures.
    ChainFailures,
    /// Day-level synthesis written at the end of a run.
    DailyAnalysis,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Self::RawNews,
        Self::RawMarket,
        Self::Gates,
        Self::ProcessedNews,
        Self::ChainFailures,
        Self::DailyAnalysis,
    ];

    /// Stage path, used as the partition directory prefix.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RawNews => "raw/news",
            Self::RawMarket => "raw/market",
            Self::Gates => "gates",
            Self::ProcessedNews => "processed/news",
            Self::ChainFailures => "processed/failures",
            Self::DailyAnalysis => "analysis/daily",
        }
    }

    /// Parses a stage path.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().trim_matches('/');
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one partition write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    pub stage: Stage,
    pub date: NaiveDate,
    pub run_id: RunId,
}

impl PartitionKey {
    pub fn new(stage: Stage, date: NaiveDate, run_id: RunId) -> Self {
        Self {
            stage,
            date,
            run_id,
        }
    }
}

impl std::fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/date={}/run={}",
            self.stage,
            self.date.format("%Y-%m-%d"),
            self.run_id
        )
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One market indicator value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketIndicatorRecord {
    pub taken_at: Timestamp,
    pub indicator: String,
    /// `None` when the indicator was unavailable.
    pub value: Option<f64>,
}

impl MarketIndicatorRecord {
    /// One row per indicator, unavailable ones included.
    pub fn from_snapshot(snapshot: &MarketSnapshot) -> Vec<Self> {
        snapshot
            .indicators()
            .into_iter()
            .map(|(indicator, value)| Self {
                taken_at: snapshot.taken_at,
                indicator: indicator.to_string(),
                value,
            })
            .collect()
    }
}

impl MarketSnapshot {
    /// Rebuilds a snapshot from stored indicator rows. Indicators without a
    /// row are unavailable; `taken_at` comes from the first row, or `fallback`
    /// when there are none.
    pub fn from_records(rows: &[MarketIndicatorRecord], fallback: Timestamp) -> Self {
        let mut snapshot = Self::unavailable(rows.first().map_or(fallback, |r| r.taken_at));
        for row in rows {
            let slot = match row.indicator.as_str() {
                "exchange_rate" => &mut snapshot.exchange_rate,
                "commodity_price" => &mut snapshot.commodity_price,
                "dollar_index" => &mut snapshot.dollar_index,
                "volatility_index" => &mut snapshot.volatility_index,
                _ => continue,
            };
            *slot = row.value;
        }
        snapshot
    }
}

/// Durable record of a chain failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainFailureRecord {
    pub candidate_id: CandidateId,
    pub title: String,
    pub step: ChainStep,
    /// Short failure kind, e.g. `"schema_violation"`.
    pub kind: String,
    pub message: String,
    /// Provider calls made by the failing step.
    pub attempts: u32,
    /// Tokens billed across the whole chain, failing step included.
    pub prompt_tokens: TokenCount,
    pub completion_tokens: TokenCount,
    pub cost: TokenCost,
    pub failed_at: Timestamp,
}

impl ChainFailureRecord {
    pub fn from_failure(failure: &ChainFailure, title: &str, failed_at: Timestamp) -> Self {
        let total = failure.total_usage();
        Self {
            candidate_id: failure.candidate_id().clone(),
            title: title.to_string(),
            step: failure.step,
            kind: failure.cause.kind().to_string(),
            message: failure.cause.to_string(),
            attempts: failure.step_usage.attempts,
            prompt_tokens: total.prompt_tokens,
            completion_tokens: total.completion_tokens,
            cost: total.cost,
            failed_at,
        }
    }
}

/// A batch of records for exactly one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageRecords {
    RawNews(Vec<Candidate>),
    RawMarket(Vec<MarketIndicatorRecord>),
    Gates(Vec<GateResult>),
    ProcessedNews(Vec<ProcessedRecord>),
    ChainFailures(Vec<ChainFailureRecord>),
    DailyAnalysis(Vec<DailyAnalysisRecord>),
}

impl StageRecords {
    /// An empty batch for `stage`.
    pub fn empty(stage: Stage) -> Self {
        match stage {
            Stage::RawNews => Self::RawNews(Vec::new()),
            Stage::RawMarket => Self::RawMarket(Vec::new()),
            Stage::Gates => Self::Gates(Vec::new()),
            Stage::ProcessedNews => Self::ProcessedNews(Vec::new()),
            Stage::ChainFailures => Self::ChainFailures(Vec::new()),
            Stage::DailyAnalysis => Self::DailyAnalysis(Vec::new()),
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            Self::RawNews(_) => Stage::RawNews,
            Self::RawMarket(_) => Stage::RawMarket,
            Self::Gates(_) => Stage::Gates,
            Self::ProcessedNews(_) => Stage::ProcessedNews,
            Self::ChainFailures(_) => Stage::ChainFailures,
            Self::DailyAnalysis(_) => Stage::DailyAnalysis,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::RawNews(r) => r.len(),
            Self::RawMarket(r) => r.len(),
            Self::Gates(r) => r.len(),
            Self::ProcessedNews(r) => r.len(),
            Self::ChainFailures(r) => r.len(),
            Self::DailyAnalysis(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The candidates of a raw news batch.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::StageMismatch`] for any other stage.
    pub fn into_raw_news(self) -> Result<Vec<Candidate>, StorageError> {
        match self {
            Self::RawNews(rows) => Ok(rows),
            other => Err(other.mismatch(Stage::RawNews)),
        }
    }

    /// # Errors
    ///
    /// Returns [`StorageError::StageMismatch`] for any other stage.
    pub fn into_raw_market(self) -> Result<Vec<MarketIndicatorRecord>, StorageError> {
        match self {
            Self::RawMarket(rows) => Ok(rows),
            other => Err(other.mismatch(Stage::RawMarket)),
        }
    }

    /// # Errors
    ///
    /// Returns [`StorageError::StageMismatch`] for any other stage.
    pub fn into_gates(self) -> Result<Vec<GateResult>, StorageError> {
        match self {
            Self::Gates(rows) => Ok(rows),
            other => Err(other.mismatch(Stage::Gates)),
        }
    }

    /// # Errors
    ///
    /// Returns [`StorageError::StageMismatch`] for any other stage.
    pub fn into_processed(self) -> Result<Vec<ProcessedRecord>, StorageError> {
        match self {
            Self::ProcessedNews(rows) => Ok(rows),
            other => Err(other.mismatch(Stage::ProcessedNews)),
        }
    }

    fn mismatch(&self, expected: Stage) -> StorageError {
        StorageError::StageMismatch {
            expected,
            actual: self.stage(),
        }
    }

    /// Appends `other` to `self`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::StageMismatch`] if the batches belong to
    /// different stages.
    pub fn extend(&mut self, other: StageRecords) -> Result<(), StorageError> {
        match (self, other) {
            (Self::RawNews(a), Self::RawNews(b)) => a.extend(b),
            (Self::RawMarket(a), Self::RawMarket(b)) => a.extend(b),
            (Self::Gates(a), Self::Gates(b)) => a.extend(b),
            (Self::ProcessedNews(a), Self::ProcessedNews(b)) => a.extend(b),
            (Self::ChainFailures(a), Self::ChainFailures(b)) => a.extend(b),
            (Self::DailyAnalysis(a), Self::DailyAnalysis(b)) => a.extend(b),
            (this, other) => {
                return Err(StorageError::StageMismatch {
                    expected: this.stage(),
                    actual: other.stage(),
                })
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Storage failures. Fatal to a run when they prevent recording results.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum StorageError {
    /// Filesystem or object-store operation failed.
    #[error("I/O error at '{path}': {message}")]
    Io { path: String, message: String },

    /// Records could not be converted to or from the storage format.
    #[error("encoding error: {message}")]
    Encoding { message: String },

    /// A batch was written under, or merged with, another stage's key.
    #[error("stage mismatch: expected {expected}, got {actual}")]
    StageMismatch { expected: Stage, actual: Stage },

    /// A stored partition could not be decoded.
    #[error("corrupt partition '{path}': {message}")]
    Corrupt { path: String, message: String },
}

impl StorageError {
    pub fn io(path: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        Self::Io {
            path: path.to_string(),
            message: err.to_string(),
        }
    }

    pub fn encoding(err: impl std::fmt::Display) -> Self {
        Self::Encoding {
            message: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Date-partitioned, run-scoped record storage.
#[async_trait]
pub trait PartitionedStore: Send + Sync {
    /// Replaces the partition `key` with `records`, atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::StageMismatch`] if `records` belong to another
    /// stage than `key.stage`, or any storage failure.
    async fn write(&self, key: &PartitionKey, records: &StageRecords) -> Result<(), StorageError>;

    /// Every run's records for `(stage, date)`, ordered by run id.
    ///
    /// A date with no partitions yields an empty batch.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if a partition cannot be read or decoded.
    async fn read(&self, stage: Stage, date: NaiveDate) -> Result<StageRecords, StorageError>;

    /// The records of the single partition `key`; empty if it was never written.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the partition cannot be read or decoded.
    async fn read_run(&self, key: &PartitionKey) -> Result<StageRecords, StorageError>;

    /// Run ids with a partition for `(stage, date)`, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the partition directory cannot be listed.
    async fn runs(&self, stage: Stage, date: NaiveDate) -> Result<Vec<RunId>, StorageError>;
}

/// Storage for end-of-run cost reports, one per `(date, run_id)`.
#[async_trait]
pub trait CostReportStore: Send + Sync {
    /// Saves `report`, replacing any earlier report of the same run and date.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the report cannot be written.
    async fn save(&self, report: &CostReport) -> Result<(), StorageError>;

    /// Every stored report for `date`, ordered by run id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if a report cannot be read or decoded.
    async fn load_day(&self, date: NaiveDate) -> Result<Vec<CostReport>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_paths_round_trip() {
        for stage in Stage::ALL {
            assert_eq!(Stage::parse(stage.as_str()), Some(stage));
        }
        assert_eq!(Stage::parse("/processed/news/"), Some(Stage::ProcessedNews));
        assert_eq!(Stage::parse("processed"), None);
    }

    #[test]
    fn extend_rejects_mixed_stages() {
        let mut a = StageRecords::empty(Stage::Gates);
        let err = a.extend(StageRecords::empty(Stage::RawNews)).unwrap_err();
        assert_eq!(
            err,
            StorageError::StageMismatch {
                expected: Stage::Gates,
                actual: Stage::RawNews
            }
        );
    }

    #[test]
    fn market_rows_keep_unavailable_indicators() {
        let snapshot = MarketSnapshot {
            exchange_rate: Some(4100.0),
            ..MarketSnapshot::unavailable(Timestamp::now())
        };
        let rows = MarketIndicatorRecord::from_snapshot(&snapshot);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].indicator, "exchange_rate");
        assert_eq!(rows[0].value, Some(4100.0));
        assert!(rows[1..].iter().all(|r| r.value.is_none()));
    }

    #[test]
    fn snapshots_rebuild_from_their_rows() {
        let snapshot = MarketSnapshot {
            exchange_rate: Some(4100.0),
            volatility_index: Some(18.5),
            ..MarketSnapshot::unavailable(Timestamp::now())
        };
        let rows = MarketIndicatorRecord::from_snapshot(&snapshot);
        assert_eq!(MarketSnapshot::from_records(&rows, Timestamp::now()), snapshot);

        let fallback = Timestamp::now();
        assert_eq!(
            MarketSnapshot::from_records(&[], fallback),
            MarketSnapshot::unavailable(fallback)
        );
    }

    #[test]
    fn typed_accessors_check_the_stage() {
        assert!(StageRecords::empty(Stage::Gates).into_gates().unwrap().is_empty());
        assert_eq!(
            StageRecords::empty(Stage::Gates).into_raw_news().unwrap_err(),
            StorageError::StageMismatch {
                expected: Stage::RawNews,
                actual: Stage::Gates
            }
        );
    }

    #[test]
    fn partition_keys_display_as_their_path() {
        let key = PartitionKey::new(
            Stage::RawNews,
            NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(),
            RunId::new("evening").unwrap(),
        );
        assert_eq!(key.to_string(), "raw/news/date=2026-10-16/run=evening");
    }
}
