//! Conversion between [`StageRecords`] and Arrow record batches.
//!
//! Every stage's batch has a few flat summary columns for ad-hoc querying
//! followed by a `record` column holding the full record as JSON. Reads
//! decode only `record`, so nested fields survive unchanged.

use std::sync::Arc;

use arrow_array::{Array, ArrayRef, BooleanArray, Float64Array, RecordBatch, StringArray, UInt64Array};
use arrow_schema::{DataType, Field, Schema};
use pipeline::{Stage, StageRecords, StorageError};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Name of the column holding each full record.
pub const RECORD_COLUMN: &str = "record";

type Column = (Field, ArrayRef);

fn text<S: AsRef<str>>(name: &str, values: impl IntoIterator<Item = Option<S>>) -> Column {
    (
        Field::new(name, DataType::Utf8, true),
        Arc::new(StringArray::from_iter(values)),
    )
}

fn count(name: &str, values: impl IntoIterator<Item = u64>) -> Column {
    (
        Field::new(name, DataType::UInt64, false),
        Arc::new(UInt64Array::from_iter_values(values)),
    )
}

fn flag(name: &str, values: impl IntoIterator<Item = bool>) -> Column {
    (
        Field::new(name, DataType::Boolean, false),
        Arc::new(BooleanArray::from_iter(values.into_iter().map(Some))),
    )
}

fn number(name: &str, values: impl IntoIterator<Item = Option<f64>>) -> Column {
    (
        Field::new(name, DataType::Float64, true),
        Arc::new(Float64Array::from_iter(values)),
    )
}

fn record_column<T: Serialize>(rows: &[T]) -> Result<Column, StorageError> {
    let encoded = rows
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<Vec<_>, _>>()
        .map_err(StorageError::encoding)?;
    Ok((
        Field::new(RECORD_COLUMN, DataType::Utf8, false),
        Arc::new(StringArray::from(encoded)),
    ))
}

fn some<T>(values: impl IntoIterator<Item = T>) -> impl Iterator<Item = Option<T>> {
    values.into_iter().map(Some)
}

/// Builds the batch written for `stage_records`.
///
/// # Errors
///
/// Returns [`StorageError::Encoding`] if a record cannot be serialized.
pub fn to_batch(stage_records: &StageRecords) -> Result<RecordBatch, StorageError> {
    let columns: Vec<Column> = match stage_records {
        StageRecords::RawNews(rows) => vec![
            text("candidate_id", some(rows.iter().map(|c| c.id.as_str()))),
            text("title", some(rows.iter().map(|c| c.title.as_str()))),
            text("source", some(rows.iter().map(|c| c.source.as_str()))),
            text("published_at", some(rows.iter().map(|c| c.published_at.to_string()))),
            count("content_length", rows.iter().map(|c| c.content_length as u64)),
            record_column(rows)?,
        ],
        StageRecords::RawMarket(rows) => vec![
            text("taken_at", some(rows.iter().map(|r| r.taken_at.to_string()))),
            text("indicator", some(rows.iter().map(|r| r.indicator.as_str()))),
            number("value", rows.iter().map(|r| r.value)),
            record_column(rows)?,
        ],
        StageRecords::Gates(rows) => vec![
            text("candidate_id", some(rows.iter().map(|g| g.candidate_id.as_str()))),
            flag("admitted", rows.iter().map(|g| g.admitted)),
            text(
                "rejected_by",
                rows.iter().map(|g| g.rejection().map(|v| v.gate_name.as_str())),
            ),
            count("gates_run", rows.iter().map(|g| g.verdicts.len() as u64)),
            record_column(rows)?,
        ],
        StageRecords::ProcessedNews(rows) => vec![
            text("candidate_id", some(rows.iter().map(|r| r.candidate.id.as_str()))),
            text("title", some(rows.iter().map(|r| r.candidate.title.as_str()))),
            count("rank_score", rows.iter().map(|r| u64::from(r.ranking.score.as_u8()))),
            text("impact_direction", some(rows.iter().map(|r| r.impact.direction.as_str()))),
            text("trader_action", some(rows.iter().map(|r| r.ranking.trader_action.as_str()))),
            text(
                "total_cost_usd",
                some(rows.iter().map(|r| r.total_cost.as_decimal().to_string())),
            ),
            record_column(rows)?,
        ],
        StageRecords::ChainFailures(rows) => vec![
            text("candidate_id", some(rows.iter().map(|f| f.candidate_id.as_str()))),
            text("step", some(rows.iter().map(|f| f.step.as_str()))),
            text("kind", some(rows.iter().map(|f| f.kind.as_str()))),
            count("attempts", rows.iter().map(|f| u64::from(f.attempts))),
            text("cost_usd", some(rows.iter().map(|f| f.cost.as_decimal().to_string()))),
            record_column(rows)?,
        ],
        StageRecords::DailyAnalysis(rows) => vec![
            text("run_id", some(rows.iter().map(|d| d.run_id.as_str()))),
            count("articles_analyzed", rows.iter().map(|d| d.articles_analyzed as u64)),
            text(
                "headline_candidate_id",
                some(rows.iter().map(|d| d.analysis.most_important.candidate_id.as_str())),
            ),
            text(
                "outlook_direction",
                some(rows.iter().map(|d| d.analysis.outlook.direction.as_str())),
            ),
            text("cost_usd", some(rows.iter().map(|d| d.cost.as_decimal().to_string()))),
            record_column(rows)?,
        ],
    };

    let (fields, arrays): (Vec<Field>, Vec<ArrayRef>) = columns.into_iter().unzip();
    RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays).map_err(StorageError::encoding)
}

fn decode<T: DeserializeOwned>(batch: &RecordBatch, origin: &str) -> Result<Vec<T>, StorageError> {
    let corrupt = |message: String| StorageError::Corrupt {
        path: origin.to_string(),
        message,
    };
    let column = batch
        .column_by_name(RECORD_COLUMN)
        .ok_or_else(|| corrupt(format!("missing '{RECORD_COLUMN}' column")))?;
    let values = column
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| corrupt(format!("'{RECORD_COLUMN}' is not a string column")))?;
    (0..values.len())
        .map(|i| {
            if values.is_null(i) {
                return Err(corrupt(format!("null record at row {i}")));
            }
            serde_json::from_str(values.value(i)).map_err(|e| corrupt(format!("row {i}: {e}")))
        })
        .collect()
}

/// Decodes a batch read back from `origin` into `stage` records.
///
/// # Errors
///
/// Returns [`StorageError::Corrupt`] if the `record` column is missing or a
/// row does not decode as a `stage` record.
pub fn from_batch(
    stage: Stage,
    batch: &RecordBatch,
    origin: &str,
) -> Result<StageRecords, StorageError> {
    Ok(match stage {
        Stage::RawNews => StageRecords::RawNews(decode(batch, origin)?),
        Stage::RawMarket => StageRecords::RawMarket(decode(batch, origin)?),
        Stage::Gates => StageRecords::Gates(decode(batch, origin)?),
        Stage::ProcessedNews => StageRecords::ProcessedNews(decode(batch, origin)?),
        Stage::ChainFailures => StageRecords::ChainFailures(decode(batch, origin)?),
        Stage::DailyAnalysis => StageRecords::DailyAnalysis(decode(batch, origin)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline::{MarketIndicatorRecord, MarketSnapshot, Timestamp};

    #[test]
    fn market_rows_keep_unavailable_values_as_nulls() {
        let snapshot = MarketSnapshot {
            exchange_rate: Some(4012.25),
            ..MarketSnapshot::unavailable(Timestamp::now())
        };
        let records = StageRecords::RawMarket(MarketIndicatorRecord::from_snapshot(&snapshot));
        let batch = to_batch(&records).unwrap();

        assert_eq!(batch.num_rows(), 4);
        let values = batch
            .column_by_name("value")
            .unwrap()
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(values.null_count(), 3);
        assert_eq!(from_batch(Stage::RawMarket, &batch, "mem").unwrap(), records);
    }

    #[test]
    fn empty_batches_have_the_stage_schema() {
        for stage in Stage::ALL {
            let batch = to_batch(&StageRecords::empty(stage)).unwrap();
            assert_eq!(batch.num_rows(), 0);
            assert!(batch.column_by_name(RECORD_COLUMN).is_some(), "{stage}");
        }
    }

    #[test]
    fn reading_as_the_wrong_stage_is_corruption() {
        let snapshot = MarketSnapshot::unavailable(Timestamp::now());
        let batch = to_batch(&StageRecords::RawMarket(MarketIndicatorRecord::from_snapshot(
            &snapshot,
        )))
        .unwrap();
        let err = from_batch(Stage::Gates, &batch, "mem").unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { .. }));
    }
}
