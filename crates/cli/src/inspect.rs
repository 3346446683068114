//! Handler for the `inspect` command. Prints JSON on stdout.

use chrono::NaiveDate;
use pipeline::{CostReportStore, PartitionedStore, Stage};
use serde_json::json;
use storage::{JsonReportStore, ParquetStore};

use crate::config::AppConfig;
use crate::InspectCommand;

pub async fn execute(config: &AppConfig, command: InspectCommand) -> anyhow::Result<()> {
    let output = match command {
        InspectCommand::Partition { stage, date } => {
            partition(&ParquetStore::new(&config.storage.root), stage, date).await?
        }
        InspectCommand::Costs { date } => {
            costs(&JsonReportStore::new(&config.storage.root), date).await?
        }
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn partition(
    store: &dyn PartitionedStore,
    stage: Stage,
    date: NaiveDate,
) -> anyhow::Result<serde_json::Value> {
    let runs = store.runs(stage, date).await?;
    let records = store.read(stage, date).await?;
    Ok(json!({
        "stage": stage.as_str(),
        "date": date,
        "runs": runs,
        "records": records.len(),
    }))
}

async fn costs(store: &dyn CostReportStore, date: NaiveDate) -> anyhow::Result<serde_json::Value> {
    let reports = store.load_day(date).await?;
    let runs: Vec<_> = reports
        .iter()
        .map(|r| {
            json!({
                "run_id": r.run_id,
                "articles": r.total_articles,
                "prompt_tokens": r.total_prompt_tokens,
                "completion_tokens": r.total_completion_tokens,
                "cost_usd": r.total_cost_usd,
                "threshold_exceeded": r.threshold_exceeded.is_some(),
            })
        })
        .collect();
    let day_total: pipeline::TokenCost = reports.iter().map(|r| r.total_cost_usd).sum();
    Ok(json!({
        "date": date,
        "runs": runs,
        "day_total_usd": day_total,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline::{PartitionKey, RunId, StageRecords};

    #[tokio::test]
    async fn partition_counts_cover_every_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path());
        let date = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        for run in ["a", "b"] {
            let key = PartitionKey::new(Stage::ProcessedNews, date, RunId::new(run).unwrap());
            store
                .write(&key, &StageRecords::empty(Stage::ProcessedNews))
                .await
                .unwrap();
        }

        let output = partition(&store, Stage::ProcessedNews, date).await.unwrap();

        assert_eq!(output["stage"], "processed/news");
        assert_eq!(output["runs"], json!(["a", "b"]));
        assert_eq!(output["records"], 0);
    }

    #[tokio::test]
    async fn days_without_reports_total_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonReportStore::new(dir.path());
        let date = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();

        let output = costs(&store, date).await.unwrap();

        assert_eq!(output["runs"], json!([]));
        assert_eq!(output["date"], "2026-10-16");
    }
}
