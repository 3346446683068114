//! End-to-end runs of the orchestrator over in-memory collaborators.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use llm::MockProvider;
use nodes::{DailyAnalysisStatus, PipelineOrchestrator, ReplayRequest, RunRequest};
use pipeline::{
    ArticleSource, ChainStep, CostAccountant, CostCeiling, CostReportStore, InferenceProvider,
    InferenceRequest, InferenceResponse, MarketSnapshot, MarketSnapshotSource, PartitionKey,
    PartitionedStore, PipelineConfig, PipelineError, ProviderError, RawArticle, RunId,
    SourceError, Stage, StageRecords, Timestamp, TokenCost, TokenCount, TokenPrice,
};
use rust_decimal::Decimal;
use serde_json::json;
use storage::MemoryStore;
use tokio::sync::watch;

const SPANISH_ARTICLE: &str = "La junta directiva del Banco de la República decidió este \
    viernes mantener sin cambios la tasa de interés de política monetaria, en una decisión \
    dividida que sorprendió a buena parte de los analistas del mercado. Según el comunicado \
    oficial, la inflación continúa por encima de la meta y la tasa de cambio ha mostrado una \
    volatilidad elevada durante las últimas semanas, en parte por la caída del precio del \
    petróleo y por la incertidumbre sobre la reforma tributaria que se discute en el \
    Congreso. El gerente del emisor explicó que la autoridad monetaria seguirá atenta a los \
    datos de empleo y de crecimiento.";

const ENGLISH_ARTICLE: &str = "The weather was pleasant on Saturday and the local football \
    team won their match in the last minutes, which made the fans celebrate in the streets \
    for hours after the game. Meanwhile the city council said that it would open a new park \
    near the river next spring.";

struct StaticArticles(Option<Vec<RawArticle>>);

#[async_trait]
impl ArticleSource for StaticArticles {
    async fn fetch(&self, limit: usize) -> Result<Vec<RawArticle>, SourceError> {
        match &self.0 {
            Some(articles) => Ok(articles.iter().take(limit).cloned().collect()),
            None => Err(SourceError::Unavailable {
                message: "scraper output missing".into(),
            }),
        }
    }
}

struct StaticMarket(Option<MarketSnapshot>);

#[async_trait]
impl MarketSnapshotSource for StaticMarket {
    async fn snapshot(&self) -> Result<MarketSnapshot, SourceError> {
        self.0.clone().ok_or_else(|| SourceError::Unavailable {
            message: "market feed down".into(),
        })
    }
}

fn date() -> NaiveDate {
    Utc::now().date_naive()
}

fn raw(title: &str, body: &str) -> RawArticle {
    RawArticle {
        title: title.into(),
        body: body.into(),
        timestamp: (Utc::now() - chrono::Duration::hours(2)).to_rfc3339(),
        source: "portafolio".into(),
        url: format!("https://example.com/{}", title.len()),
    }
}

fn mixed_articles() -> Vec<RawArticle> {
    vec![
        raw("Banco de la República mantiene la tasa de interés", SPANISH_ARTICLE),
        raw("Weekend roundup", ENGLISH_ARTICLE),
        RawArticle {
            title: "   ".into(),
            body: "Sin título".into(),
            timestamp: "ayer".into(),
            source: String::new(),
            url: String::new(),
        },
    ]
}

fn market() -> MarketSnapshot {
    MarketSnapshot {
        exchange_rate: Some(4105.0),
        commodity_price: Some(80.1),
        dollar_index: Some(104.3),
        volatility_index: Some(15.2),
        ..MarketSnapshot::unavailable(Timestamp::now())
    }
}

fn fast_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.chain.initial_backoff_ms = 1;
    config.chain.max_backoff_ms = 5;
    config
}

struct Harness {
    store: Arc<MemoryStore>,
    orchestrator: PipelineOrchestrator,
}

fn harness(
    config: PipelineConfig,
    provider: Arc<dyn InferenceProvider>,
    articles: Option<Vec<RawArticle>>,
    snapshot: Option<MarketSnapshot>,
) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = PipelineOrchestrator::new(
        config,
        provider,
        Arc::new(StaticArticles(articles)),
        Arc::new(StaticMarket(snapshot)),
        store.clone(),
        store.clone(),
    )
    .unwrap();
    Harness { store, orchestrator }
}

/// A receiver whose sender is gone; it never signals cancellation.
fn live() -> watch::Receiver<bool> {
    watch::channel(false).1
}

fn request(run_id: &str) -> RunRequest {
    RunRequest {
        run_id: RunId::new(run_id).unwrap(),
        date: date(),
        max_articles: None,
    }
}

#[tokio::test]
async fn mixed_batch_flows_through_every_stage() {
    let h = harness(
        fast_config(),
        Arc::new(MockProvider::new()),
        Some(mixed_articles()),
        Some(market()),
    );

    let summary = h.orchestrator.run(request("mixed"), live()).await.unwrap();

    assert_eq!(summary.candidates_seen, 3);
    assert_eq!(summary.malformed, 1);
    assert_eq!(summary.admitted, 1);
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.rejected_by_gate.get("content_quality"), Some(&1));
    assert_eq!(summary.failed(), 0);
    assert!(!summary.cancelled);
    assert!(summary.cost_report.threshold_exceeded.is_none());

    let raw_news = h.store.read(Stage::RawNews, date()).await.unwrap();
    assert_eq!(raw_news.len(), 2);
    let gates = h.store.read(Stage::Gates, date()).await.unwrap();
    assert_eq!(gates.len(), 2);
    let StageRecords::ProcessedNews(processed) =
        h.store.read(Stage::ProcessedNews, date()).await.unwrap()
    else {
        panic!("wrong stage");
    };
    assert_eq!(processed.len(), 1);
    assert!((1..=5).contains(&processed[0].ranking.score.as_u8()));
    assert!(h.store.read(Stage::ChainFailures, date()).await.unwrap().is_empty());

    let reports = h.store.load_day(date()).await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].run_id, summary.run_id);
}

#[tokio::test]
async fn losing_both_sources_ends_the_run() {
    let h = harness(fast_config(), Arc::new(MockProvider::new()), None, None);

    let err = h.orchestrator.run(request("dark"), live()).await.unwrap_err();

    assert!(matches!(err, PipelineError::SourcesUnavailable { .. }));
    assert_eq!(h.store.partition_count(Stage::RawNews, date()), 0);
}

#[tokio::test]
async fn a_missing_article_source_still_records_the_market() {
    let h = harness(fast_config(), Arc::new(MockProvider::new()), None, Some(market()));

    let summary = h.orchestrator.run(request("no-news"), live()).await.unwrap();

    assert_eq!(summary.candidates_seen, 0);
    assert!(summary.article_source_error.is_some());
    assert_eq!(h.store.read(Stage::RawMarket, date()).await.unwrap().len(), 4);
    assert_eq!(h.store.partition_count(Stage::ProcessedNews, date()), 1);
}

#[tokio::test]
async fn a_missing_market_source_marks_every_indicator_unavailable() {
    let h = harness(
        fast_config(),
        Arc::new(MockProvider::new()),
        Some(mixed_articles()),
        None,
    );

    let summary = h.orchestrator.run(request("no-market"), live()).await.unwrap();

    assert!(summary.market_source_error.is_some());
    assert_eq!(summary.processed, 1);
    let StageRecords::RawMarket(rows) = h.store.read(Stage::RawMarket, date()).await.unwrap()
    else {
        panic!("wrong stage");
    };
    assert_eq!(rows.len(), 4);
    assert!(rows.iter().all(|r| r.value.is_none()));
}

#[tokio::test]
async fn rerunning_a_run_id_replaces_its_partitions() {
    let h = harness(
        fast_config(),
        Arc::new(MockProvider::new()),
        Some(mixed_articles()),
        Some(market()),
    );

    h.orchestrator.run(request("again"), live()).await.unwrap();
    let second = h.orchestrator.run(request("again"), live()).await.unwrap();

    for stage in Stage::ALL {
        assert_eq!(h.store.partition_count(stage, date()), 1, "{stage}");
    }
    assert_eq!(h.store.read(Stage::ProcessedNews, date()).await.unwrap().len(), 1);
    assert_eq!(h.store.load_day(date()).await.unwrap().len(), 1);
    assert_eq!(second.cost_report.daily_total_usd, second.cost_report.total_cost_usd);
}

#[tokio::test]
async fn storage_failures_end_the_run() {
    let h = harness(
        fast_config(),
        Arc::new(MockProvider::new()),
        Some(mixed_articles()),
        Some(market()),
    );
    h.store.fail_writes_to(Stage::ProcessedNews);

    let err = h.orchestrator.run(request("disk-full"), live()).await.unwrap_err();

    assert!(matches!(err, PipelineError::Storage(_)));
    assert_eq!(h.store.partition_count(Stage::Gates, date()), 1);
    assert!(h.store.load_day(date()).await.unwrap().is_empty());
}

#[tokio::test]
async fn report_save_failures_end_the_run() {
    let h = harness(
        fast_config(),
        Arc::new(MockProvider::new()),
        Some(mixed_articles()),
        Some(market()),
    );
    h.store.fail_report_saves();

    let err = h.orchestrator.run(request("no-report"), live()).await.unwrap_err();

    assert!(matches!(err, PipelineError::Storage(_)));
}

#[tokio::test]
async fn earlier_runs_count_toward_the_daily_ceiling() {
    let mut config = fast_config();
    config.cost.daily_ceiling_usd = Decimal::new(1, 0);
    let h = harness(
        config,
        Arc::new(MockProvider::new()),
        Some(mixed_articles()),
        Some(market()),
    );

    let earlier = CostAccountant::new(
        TokenPrice::new(Decimal::new(3, 0), Decimal::new(15, 0)).unwrap(),
        CostCeiling::new(Decimal::new(1, 0)).unwrap(),
    );
    let id = pipeline::normalize(&raw("Costos", SPANISH_ARTICLE)).unwrap().id;
    earlier.record(
        &id,
        ChainStep::Summarization,
        TokenCount::new(2_000_000),
        TokenCount::new(0),
    );
    h.store
        .save(&earlier.report(date(), &RunId::new("morning").unwrap(), TokenCost::zero()))
        .await
        .unwrap();

    let summary = h.orchestrator.run(request("evening"), live()).await.unwrap();

    let exceeded = summary.cost_report.threshold_exceeded.unwrap();
    assert_eq!(exceeded.daily_total.as_decimal(), Decimal::new(6, 0));
    assert_eq!(h.store.load_day(date()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn cancelled_runs_write_what_they_have() {
    let h = harness(
        fast_config(),
        Arc::new(MockProvider::new()),
        Some(mixed_articles()),
        Some(market()),
    );
    let (_tx, rx) = watch::channel(true);

    let summary = h.orchestrator.run(request("stop"), rx).await.unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.not_started, 2);
    assert_eq!(summary.processed, 0);
    assert_eq!(h.store.partition_count(Stage::Gates, date()), 1);
    assert_eq!(h.store.partition_count(Stage::ProcessedNews, date()), 1);
    assert_eq!(h.store.load_day(date()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn out_of_range_rankings_are_recorded_as_failures() {
    let provider = MockProvider::new().with_payload(ChainStep::Ranking, json!({"score": 9}));
    let h = harness(
        fast_config(),
        Arc::new(provider),
        Some(mixed_articles()),
        Some(market()),
    );

    let summary = h.orchestrator.run(request("nine"), live()).await.unwrap();

    assert_eq!(summary.processed, 0);
    assert_eq!(summary.chain_failures.get(&ChainStep::Ranking), Some(&1));
    let StageRecords::ChainFailures(failures) =
        h.store.read(Stage::ChainFailures, date()).await.unwrap()
    else {
        panic!("wrong stage");
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, "score_out_of_range");
    assert_eq!(failures[0].title, "Banco de la República mantiene la tasa de interés");
}

#[tokio::test]
async fn max_articles_caps_the_fetch() {
    let h = harness(
        fast_config(),
        Arc::new(MockProvider::new()),
        Some(mixed_articles()),
        Some(market()),
    );
    let mut req = request("capped");
    req.max_articles = Some(1);

    let summary = h.orchestrator.run(req, live()).await.unwrap();

    assert_eq!(summary.candidates_seen, 1);
    assert_eq!(summary.processed, 1);
}

#[tokio::test]
async fn later_runs_of_the_day_reject_earlier_admissions() {
    let h = harness(
        fast_config(),
        Arc::new(MockProvider::new()),
        Some(mixed_articles()),
        Some(market()),
    );

    let morning = h.orchestrator.run(request("morning"), live()).await.unwrap();
    let evening = h.orchestrator.run(request("evening"), live()).await.unwrap();

    assert_eq!(morning.admitted, 1);
    assert_eq!(morning.earlier_admissions, 0);
    assert_eq!(evening.earlier_admissions, 1);
    assert_eq!(evening.admitted, 0);
    assert_eq!(evening.rejected_by_gate.get("duplicate_detection"), Some(&1));
    assert_eq!(evening.processed, 0);
    assert_eq!(h.store.partition_count(Stage::ProcessedNews, date()), 2);
    assert_eq!(h.store.read(Stage::ProcessedNews, date()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn rejected_items_of_earlier_runs_are_evaluated_again() {
    let h = harness(
        fast_config(),
        Arc::new(MockProvider::new()),
        Some(mixed_articles()),
        Some(market()),
    );

    h.orchestrator.run(request("morning"), live()).await.unwrap();
    let evening = h.orchestrator.run(request("evening"), live()).await.unwrap();

    // The English article fails content quality again rather than duplicate detection.
    assert_eq!(evening.rejected_by_gate.get("content_quality"), Some(&1));
    assert_eq!(evening.rejected(), 2);
}

#[tokio::test]
async fn daily_analysis_covers_the_processed_records_of_the_date() {
    let h = harness(
        fast_config(),
        Arc::new(MockProvider::new()),
        Some(mixed_articles()),
        Some(market()),
    );

    let summary = h.orchestrator.run(request("daily"), live()).await.unwrap();

    assert!(matches!(
        summary.daily_analysis,
        DailyAnalysisStatus::Completed { articles: 1, .. }
    ));
    let StageRecords::DailyAnalysis(rows) =
        h.store.read(Stage::DailyAnalysis, date()).await.unwrap()
    else {
        panic!("wrong stage");
    };
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].run_id, summary.run_id);
    assert_eq!(rows[0].articles_analyzed, 1);
    assert_eq!(rows[0].top_candidates.len(), 1);
    assert_eq!(rows[0].ranking_distribution[&1], 1);
    assert!(!rows[0].analysis.trader_recommendations.is_empty());
}

/// Delegates to the mock and bills a fixed token count per call.
struct BillingProvider(MockProvider);

#[async_trait]
impl InferenceProvider for BillingProvider {
    fn name(&self) -> &str {
        "billing"
    }

    async fn invoke(&self, request: InferenceRequest) -> Result<InferenceResponse, ProviderError> {
        let mut response = self.0.invoke(request).await?;
        response.prompt_tokens = TokenCount::new(1_000);
        response.completion_tokens = TokenCount::new(100);
        Ok(response)
    }
}

#[tokio::test]
async fn daily_analysis_is_billed_but_is_not_an_article() {
    let h = harness(
        fast_config(),
        Arc::new(BillingProvider(MockProvider::new())),
        Some(mixed_articles()),
        Some(market()),
    );

    let summary = h.orchestrator.run(request("billed"), live()).await.unwrap();

    // 1000 prompt tokens at $3/M plus 100 completion tokens at $15/M.
    let per_call = Decimal::new(45, 4);
    let report = &summary.cost_report;
    assert_eq!(report.total_articles, 1);
    assert_eq!(report.cost_breakdown.len(), 1);
    assert_eq!(report.avg_cost_per_article.as_decimal(), per_call * Decimal::from(4));
    assert_eq!(report.total_cost_usd.as_decimal(), per_call * Decimal::from(5));
    let daily = report
        .step_breakdown
        .iter()
        .find(|s| s.step == ChainStep::DailyAnalysis)
        .unwrap();
    assert_eq!(daily.calls, 1);
    assert_eq!(daily.usd_cost.as_decimal(), per_call);
    let DailyAnalysisStatus::Completed { cost_usd, .. } = summary.daily_analysis else {
        panic!("daily analysis did not complete");
    };
    assert_eq!(cost_usd.as_decimal(), per_call);
}

#[tokio::test]
async fn disabled_daily_analysis_writes_an_empty_partition() {
    let mut config = fast_config();
    config.daily.enabled = false;
    let h = harness(
        config,
        Arc::new(MockProvider::new()),
        Some(mixed_articles()),
        Some(market()),
    );

    let summary = h.orchestrator.run(request("quiet"), live()).await.unwrap();

    assert!(matches!(summary.daily_analysis, DailyAnalysisStatus::Skipped { .. }));
    assert_eq!(h.store.partition_count(Stage::DailyAnalysis, date()), 1);
    assert!(h.store.read(Stage::DailyAnalysis, date()).await.unwrap().is_empty());
}

#[tokio::test]
async fn a_failed_daily_analysis_does_not_fail_the_run() {
    let provider = MockProvider::new()
        .with_payload(ChainStep::DailyAnalysis, json!({"daily_context": "sin formato"}));
    let h = harness(
        fast_config(),
        Arc::new(provider),
        Some(mixed_articles()),
        Some(market()),
    );

    let summary = h.orchestrator.run(request("garbled"), live()).await.unwrap();

    assert_eq!(summary.processed, 1);
    let DailyAnalysisStatus::Failed { kind, .. } = &summary.daily_analysis else {
        panic!("expected a failed daily analysis");
    };
    assert_eq!(kind, "schema_violation");
    assert!(h.store.read(Stage::DailyAnalysis, date()).await.unwrap().is_empty());
}

/// Panics on the ranking step.
struct PanickingProvider(MockProvider);

#[async_trait]
impl InferenceProvider for PanickingProvider {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn invoke(&self, request: InferenceRequest) -> Result<InferenceResponse, ProviderError> {
        if request.step == ChainStep::Ranking {
            panic!("provider bug");
        }
        self.0.invoke(request).await
    }
}

#[tokio::test]
async fn panicking_chains_are_reported_as_aborted() {
    let h = harness(
        fast_config(),
        Arc::new(PanickingProvider(MockProvider::new())),
        Some(mixed_articles()),
        Some(market()),
    );

    let summary = h.orchestrator.run(request("panic"), live()).await.unwrap();

    assert_eq!(summary.admitted, 1);
    assert_eq!(summary.aborted, 1);
    assert_eq!(summary.not_started, 0);
    assert_eq!(summary.processed, 0);
    assert_eq!(summary.failed(), 0);
    assert!(!summary.cancelled);
    assert!(h.store.read(Stage::ChainFailures, date()).await.unwrap().is_empty());
}

fn replay(run_id: &str) -> ReplayRequest {
    ReplayRequest {
        run_id: RunId::new(run_id).unwrap(),
        date: date(),
    }
}

#[tokio::test]
async fn gate_replays_rebuild_the_gate_partition() {
    let h = harness(
        fast_config(),
        Arc::new(MockProvider::new()),
        Some(mixed_articles()),
        Some(market()),
    );
    h.orchestrator.run(request("stored"), live()).await.unwrap();
    let key = PartitionKey::new(Stage::Gates, date(), RunId::new("stored").unwrap());
    h.store.write(&key, &StageRecords::empty(Stage::Gates)).await.unwrap();

    let summary = h.orchestrator.replay_gates(replay("stored"), live()).await.unwrap();

    assert_eq!(summary.candidates, 2);
    assert_eq!(summary.admitted, 1);
    assert_eq!(summary.rejected(), 1);
    assert_eq!(h.store.read_run(&key).await.unwrap().len(), 2);
    assert_eq!(h.store.load_day(date()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn process_replays_rerun_the_admitted_candidates() {
    let h = harness(
        fast_config(),
        Arc::new(MockProvider::new()),
        Some(mixed_articles()),
        Some(market()),
    );
    h.orchestrator.run(request("stored"), live()).await.unwrap();
    let key = PartitionKey::new(Stage::ProcessedNews, date(), RunId::new("stored").unwrap());
    h.store
        .write(&key, &StageRecords::empty(Stage::ProcessedNews))
        .await
        .unwrap();

    let summary = h.orchestrator.replay_process(replay("stored"), live()).await.unwrap();

    assert_eq!(summary.candidates_seen, 2);
    assert_eq!(summary.admitted, 1);
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.rejected(), 1);
    assert!(matches!(summary.daily_analysis, DailyAnalysisStatus::Completed { .. }));
    assert_eq!(h.store.read_run(&key).await.unwrap().len(), 1);
    assert_eq!(h.store.load_day(date()).await.unwrap().len(), 1);
    for stage in Stage::ALL {
        assert_eq!(h.store.partition_count(stage, date()), 1, "{stage}");
    }
}

/// Delegates to the mock and keeps the context of every impact call.
#[derive(Default)]
struct RecordingProvider {
    mock: MockProvider,
    impact_contexts: parking_lot::Mutex<Vec<serde_json::Value>>,
}

#[async_trait]
impl InferenceProvider for RecordingProvider {
    fn name(&self) -> &str {
        "recording"
    }

    async fn invoke(&self, request: InferenceRequest) -> Result<InferenceResponse, ProviderError> {
        if request.step == ChainStep::ImpactAnalysis {
            self.impact_contexts.lock().push(request.context.clone());
        }
        self.mock.invoke(request).await
    }
}

#[tokio::test]
async fn process_replays_use_the_stored_market_snapshot() {
    let h = harness(
        fast_config(),
        Arc::new(MockProvider::new()),
        Some(mixed_articles()),
        Some(market()),
    );
    h.orchestrator.run(request("stored"), live()).await.unwrap();
    let recorder = Arc::new(RecordingProvider::default());
    let replayer = PipelineOrchestrator::new(
        fast_config(),
        recorder.clone(),
        Arc::new(StaticArticles(None)),
        Arc::new(StaticMarket(None)),
        h.store.clone(),
        h.store.clone(),
    )
    .unwrap();

    let summary = replayer.replay_process(replay("stored"), live()).await.unwrap();

    assert_eq!(summary.processed, 1);
    let contexts = recorder.impact_contexts.lock();
    assert_eq!(contexts.len(), 1);
    assert_eq!(contexts[0]["market"]["exchange_rate"], json!(4105.0));
    assert_eq!(contexts[0]["market"]["volatility_index"], json!(15.2));
}

#[tokio::test]
async fn replaying_an_unknown_run_has_nothing_to_replay() {
    let h = harness(
        fast_config(),
        Arc::new(MockProvider::new()),
        Some(mixed_articles()),
        Some(market()),
    );

    let gates = h.orchestrator.replay_gates(replay("ghost"), live()).await.unwrap_err();
    let process = h.orchestrator.replay_process(replay("ghost"), live()).await.unwrap_err();

    assert!(matches!(gates, PipelineError::NothingToReplay { .. }));
    assert!(matches!(process, PipelineError::NothingToReplay { .. }));
    assert!(process.to_string().contains("gates/date="));
    assert_eq!(h.store.partition_count(Stage::Gates, date()), 0);
}
