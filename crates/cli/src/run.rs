//! Handler for the `run` command.

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use llm::{AnthropicProvider, MockProvider};
use nodes::{DailyAnalysisStatus, PipelineOrchestrator, RunRequest, RunSummary};
use pipeline::{InferenceProvider, RunId};
use sources::{JsonFileArticleSource, JsonFileMarketSource};
use storage::{JsonReportStore, ParquetStore};
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{AppConfig, ProviderConfig, ProviderKind};
use crate::{telemetry, RunArgs};

pub async fn execute(mut config: AppConfig, args: RunArgs) -> anyhow::Result<()> {
    if args.mock_llm {
        config.provider.kind = ProviderKind::Mock;
    }
    let telemetry = telemetry::init(&config.logging, &config.telemetry)?;

    let result = run(&config, &args).await;
    match &result {
        Ok(summary) => report(summary),
        Err(e) => error!(error = format!("{e:#}"), "run failed"),
    }
    telemetry.shutdown();
    result.map(|_| ())
}

async fn run(config: &AppConfig, args: &RunArgs) -> anyhow::Result<RunSummary> {
    let mut request = RunRequest::new(args.date.unwrap_or_else(|| Utc::now().date_naive()));
    if let Some(id) = &args.run_id {
        request.run_id = RunId::new(id.as_str())
            .with_context(|| format!("invalid run id {id:?}"))?;
    }
    request.max_articles = args.max_articles;

    let orchestrator = orchestrator(config)?;
    info!(
        run_id = %request.run_id,
        date = %request.date,
        provider = ?config.provider.kind,
        storage = %config.storage.root.display(),
        "newsgate starting"
    );

    let (cancel, interrupt) = cancel_on_interrupt();
    let outcome = orchestrator.run(request, cancel).await;
    interrupt.abort();
    Ok(outcome?)
}

/// Wires the configured provider, file sources and stores.
pub(crate) fn orchestrator(config: &AppConfig) -> anyhow::Result<PipelineOrchestrator> {
    Ok(PipelineOrchestrator::new(
        config.pipeline.clone(),
        provider(&config.provider)?,
        Arc::new(JsonFileArticleSource::new(&config.sources.articles_path)),
        Arc::new(JsonFileMarketSource::new(&config.sources.market_path)),
        Arc::new(ParquetStore::new(&config.storage.root)),
        Arc::new(JsonReportStore::new(&config.storage.root)),
    )?)
}

/// A cancellation signal raised by Ctrl-C. Abort the handle once the work is done.
pub(crate) fn cancel_on_interrupt() -> (watch::Receiver<bool>, JoinHandle<()>) {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let interrupt = tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            let _ = cancel_tx.send(true);
        }
    });
    (cancel_rx, interrupt)
}

fn provider(config: &ProviderConfig) -> anyhow::Result<Arc<dyn InferenceProvider>> {
    Ok(match config.kind {
        ProviderKind::Mock => Arc::new(MockProvider::new()),
        ProviderKind::Anthropic => Arc::new(
            AnthropicProvider::from_env(&config.api_key_env, config.anthropic_settings())
                .context("configuring the Anthropic provider")?,
        ),
    })
}

/// Logs the outcome and prints the summary as JSON on stdout.
pub(crate) fn report(summary: &RunSummary) {
    info!(
        run_id = %summary.run_id,
        seen = summary.candidates_seen,
        malformed = summary.malformed,
        admitted = summary.admitted,
        rejected = summary.rejected(),
        processed = summary.processed,
        failed = summary.failed(),
        not_started = summary.not_started,
        aborted = summary.aborted,
        cancelled = summary.cancelled,
        cost = %summary.cost_report.total_cost_usd,
        "run finished"
    );
    if let Some(exceeded) = &summary.cost_report.threshold_exceeded {
        warn!(
            daily_total = %exceeded.daily_total,
            ceiling = %exceeded.ceiling,
            "daily cost ceiling exceeded"
        );
    }
    if let DailyAnalysisStatus::Failed { kind, message } = &summary.daily_analysis {
        warn!(kind = %kind, error = %message, "daily analysis failed");
    }
    match serde_json::to_string_pretty(summary) {
        Ok(json) => println!("{json}"),
        Err(e) => error!(error = %e, "summary could not be rendered"),
    }
}
