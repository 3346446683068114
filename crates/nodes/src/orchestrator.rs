//! Pipeline Orchestrator: sequences one run end to end.
//!
//! ```text
//! sources ──► normalize ──► raw/news, raw/market
//!                 │
//!                 ▼
//!          gate evaluation ──► gates
//!                 │ admitted
//!                 ▼
//!       chains (bounded concurrency) ──► processed/news, processed/failures
//!                 │
//!                 ▼
//!   daily analysis over processed/news ──► analysis/daily
//!                 │
//!                 ▼
//!            cost report ──► costs
//! ```
//!
//! Duplicate detection spans the date: the seen window starts with every
//! candidate admitted by an earlier run of the same date.
//!
//! Two replays restart a stored run part way: [`PipelineOrchestrator::replay_gates`]
//! re-evaluates its raw news, [`PipelineOrchestrator::replay_process`] re-runs
//! the chains over its admitted candidates.
//!
//! Per-candidate problems (malformed input, gate rejection, chain failure)
//! are counted in the [`RunSummary`]. Only the loss of both sources or a
//! storage failure ends the run with a [`PipelineError`].

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::NaiveDate;
use pipeline::{
    normalize, ArticleSource, Candidate, CandidateId, ChainFailure, ChainFailureRecord,
    ChainStep, CostAccountant, CostReport, CostReportStore, DailyAnalysisRecord, GateEvaluator,
    GateResult, InferenceProvider, MarketIndicatorRecord, MarketSnapshot, MarketSnapshotSource,
    PartitionKey, PartitionedStore, PipelineConfig, PipelineError, ProcessedRecord, RunId,
    SeenWindow, Stage, StageRecords, StorageError, Timestamp, TokenCost,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, info_span, warn, Instrument};

use crate::chain::ChainExecutor;

/// Parameters of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub run_id: RunId,
    /// Calendar day the run's partitions are written under.
    pub date: NaiveDate,
    /// Overrides `[pipeline.run] max_articles` when set.
    pub max_articles: Option<usize>,
}

impl RunRequest {
    /// A request for a fresh run id on `date`.
    pub fn new(date: NaiveDate) -> Self {
        Self {
            run_id: RunId::generate(),
            date,
            max_articles: None,
        }
    }
}

/// Identifies the stored run a replay starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayRequest {
    pub run_id: RunId,
    pub date: NaiveDate,
}

/// Outcome of the daily analysis phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DailyAnalysisStatus {
    Completed { articles: usize, cost_usd: TokenCost },
    Skipped { reason: String },
    /// The phase failed; the run itself still succeeds.
    Failed { kind: String, message: String },
}

impl DailyAnalysisStatus {
    fn skipped(reason: &str) -> Self {
        Self::Skipped {
            reason: reason.to_string(),
        }
    }
}

/// What a run did, reported to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub date: NaiveDate,
    /// Raw records received from the article source.
    pub candidates_seen: usize,
    /// Raw records dropped by the normalizer.
    pub malformed: usize,
    /// Candidates admitted by earlier runs of the date, loaded into the
    /// duplicate window.
    pub earlier_admissions: usize,
    pub admitted: usize,
    /// Rejections keyed by the gate that rejected them.
    pub rejected_by_gate: BTreeMap<String, usize>,
    pub processed: usize,
    /// Chain failures keyed by the step that failed.
    pub chain_failures: BTreeMap<ChainStep, usize>,
    /// Candidates never evaluated or never started because the run was cancelled.
    pub not_started: usize,
    /// Chains whose task panicked; they leave no record.
    pub aborted: usize,
    pub cancelled: bool,
    pub daily_analysis: DailyAnalysisStatus,
    pub cost_report: CostReport,
    /// Set when the article source failed and the run continued without articles.
    pub article_source_error: Option<String>,
    /// Set when the market source failed and the run continued with an
    /// unavailable snapshot.
    pub market_source_error: Option<String>,
}

impl RunSummary {
    pub fn rejected(&self) -> usize {
        self.rejected_by_gate.values().sum()
    }

    pub fn failed(&self) -> usize {
        self.chain_failures.values().sum()
    }
}

/// What a gate replay did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionSummary {
    pub run_id: RunId,
    pub date: NaiveDate,
    /// Stored candidates of the run.
    pub candidates: usize,
    pub earlier_admissions: usize,
    pub admitted: usize,
    pub rejected_by_gate: BTreeMap<String, usize>,
    pub not_started: usize,
    pub cancelled: bool,
}

impl AdmissionSummary {
    pub fn rejected(&self) -> usize {
        self.rejected_by_gate.values().sum()
    }
}

/// Result of gate evaluation over one run's candidates.
struct Admission {
    results: Vec<GateResult>,
    admitted: Vec<Candidate>,
    earlier_admissions: usize,
    not_started: usize,
    cancelled: bool,
}

/// Result of the chains, the daily analysis and the cost report.
struct Analysis {
    processed: usize,
    chain_failures: BTreeMap<ChainStep, usize>,
    not_started: usize,
    aborted: usize,
    cancelled: bool,
    daily_analysis: DailyAnalysisStatus,
    cost_report: CostReport,
}

/// Drives the stages of a run against the configured collaborators.
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    gates: GateEvaluator,
    provider: Arc<dyn InferenceProvider>,
    articles: Arc<dyn ArticleSource>,
    market: Arc<dyn MarketSnapshotSource>,
    store: Arc<dyn PartitionedStore>,
    reports: Arc<dyn CostReportStore>,
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("provider", &self.provider.name())
            .field("gates", &self.gates)
            .finish_non_exhaustive()
    }
}

impl PipelineOrchestrator {
    /// # Errors
    ///
    /// Returns [`PipelineError::ConfigurationError`] if `config` is invalid.
    pub fn new(
        config: PipelineConfig,
        provider: Arc<dyn InferenceProvider>,
        articles: Arc<dyn ArticleSource>,
        market: Arc<dyn MarketSnapshotSource>,
        store: Arc<dyn PartitionedStore>,
        reports: Arc<dyn CostReportStore>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let gates = GateEvaluator::standard(&config.gates)?;
        Ok(Self {
            config,
            gates,
            provider,
            articles,
            market,
            store,
            reports,
        })
    }

    /// Runs the pipeline once.
    ///
    /// Setting `cancel` to `true` stops gate evaluation between candidates and
    /// aborts chains in flight; whatever was computed is still written and the
    /// summary reports `cancelled`.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::SourcesUnavailable`] if both sources fail.
    /// - [`PipelineError::Storage`] if a partition or the cost report cannot
    ///   be written.
    pub async fn run(
        &self,
        request: RunRequest,
        cancel: watch::Receiver<bool>,
    ) -> Result<RunSummary, PipelineError> {
        let span = info_span!("run", run_id = %request.run_id, date = %request.date);
        self.run_inner(request, cancel).instrument(span).await
    }

    /// Re-evaluates the gates over the stored raw news of a run and replaces
    /// its gate partition. Chains are not run.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::NothingToReplay`] if the run has no raw news.
    /// - [`PipelineError::Storage`] if a partition cannot be read or written.
    pub async fn replay_gates(
        &self,
        request: ReplayRequest,
        cancel: watch::Receiver<bool>,
    ) -> Result<AdmissionSummary, PipelineError> {
        let span = info_span!("replay_gates", run_id = %request.run_id, date = %request.date);
        self.replay_gates_inner(request, cancel).instrument(span).await
    }

    /// Runs the chains over the candidates a stored run admitted, against the
    /// market snapshot stored with the run. Replaces the run's processed,
    /// failure and daily analysis partitions and its cost report.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::NothingToReplay`] if the run has no gate results.
    /// - [`PipelineError::Storage`] if a partition or the cost report cannot
    ///   be read or written.
    pub async fn replay_process(
        &self,
        request: ReplayRequest,
        cancel: watch::Receiver<bool>,
    ) -> Result<RunSummary, PipelineError> {
        let span = info_span!("replay_process", run_id = %request.run_id, date = %request.date);
        self.replay_process_inner(request, cancel).instrument(span).await
    }

    async fn run_inner(
        &self,
        request: RunRequest,
        cancel: watch::Receiver<bool>,
    ) -> Result<RunSummary, PipelineError> {
        let RunRequest {
            run_id,
            date,
            max_articles,
        } = request;
        let limit = max_articles.unwrap_or(self.config.run.max_articles);
        let key = |stage| PartitionKey::new(stage, date, run_id.clone());

        // Sources.
        let (articles, market) = tokio::join!(self.articles.fetch(limit), self.market.snapshot());
        let (raw, article_source_error, snapshot, market_source_error) = match (articles, market) {
            (Err(a), Err(m)) => {
                error!(articles = %a, market = %m, "both sources unavailable");
                return Err(PipelineError::SourcesUnavailable {
                    articles: a.to_string(),
                    market: m.to_string(),
                });
            }
            (Ok(raw), Ok(snapshot)) => (raw, None, snapshot, None),
            (Err(a), Ok(snapshot)) => {
                warn!(error = %a, "article source unavailable, continuing with zero candidates");
                (Vec::new(), Some(a.to_string()), snapshot, None)
            }
            (Ok(raw), Err(m)) => {
                warn!(error = %m, "market source unavailable, indicators marked unavailable");
                (raw, None, MarketSnapshot::unavailable(Timestamp::now()), Some(m.to_string()))
            }
        };
        let raw: Vec<_> = raw.into_iter().take(limit).collect();
        let candidates_seen = raw.len();

        // Normalization.
        let mut candidates: Vec<Candidate> = Vec::with_capacity(raw.len());
        let mut malformed = 0;
        for article in &raw {
            match normalize(article) {
                Ok(candidate) => candidates.push(candidate),
                Err(e) => {
                    malformed += 1;
                    warn!(url = %article.url, source = %article.source, error = %e, "malformed article skipped");
                }
            }
        }
        info!(seen = candidates_seen, normalized = candidates.len(), malformed, "articles normalized");

        self.write(&key(Stage::RawNews), StageRecords::RawNews(candidates.clone()))
            .await?;
        self.write(
            &key(Stage::RawMarket),
            StageRecords::RawMarket(MarketIndicatorRecord::from_snapshot(&snapshot)),
        )
        .await?;

        let admission = self.admit(date, &run_id, &candidates, &cancel).await?;
        let rejected_by_gate = tally_rejections(&admission.results);
        let admitted = admission.admitted.len();
        let analysis = self
            .analyze(date, &run_id, admission.admitted, snapshot, &cancel)
            .await?;

        Ok(RunSummary {
            run_id,
            date,
            candidates_seen,
            malformed,
            earlier_admissions: admission.earlier_admissions,
            admitted,
            rejected_by_gate,
            processed: analysis.processed,
            chain_failures: analysis.chain_failures,
            not_started: admission.not_started + analysis.not_started,
            aborted: analysis.aborted,
            cancelled: admission.cancelled || analysis.cancelled,
            daily_analysis: analysis.daily_analysis,
            cost_report: analysis.cost_report,
            article_source_error,
            market_source_error,
        })
    }

    async fn replay_gates_inner(
        &self,
        request: ReplayRequest,
        cancel: watch::Receiver<bool>,
    ) -> Result<AdmissionSummary, PipelineError> {
        let ReplayRequest { run_id, date } = request;
        let candidates = self
            .read_for_replay(&PartitionKey::new(Stage::RawNews, date, run_id.clone()))
            .await?
            .into_raw_news()?;
        info!(candidates = candidates.len(), "replaying gates");

        let admission = self.admit(date, &run_id, &candidates, &cancel).await?;
        Ok(AdmissionSummary {
            candidates: candidates.len(),
            earlier_admissions: admission.earlier_admissions,
            admitted: admission.admitted.len(),
            rejected_by_gate: tally_rejections(&admission.results),
            not_started: admission.not_started,
            cancelled: admission.cancelled,
            run_id,
            date,
        })
    }

    async fn replay_process_inner(
        &self,
        request: ReplayRequest,
        cancel: watch::Receiver<bool>,
    ) -> Result<RunSummary, PipelineError> {
        let ReplayRequest { run_id, date } = request;
        let key = |stage| PartitionKey::new(stage, date, run_id.clone());

        let gates = self.read_for_replay(&key(Stage::Gates)).await?.into_gates()?;
        let admitted_ids: HashSet<&CandidateId> = gates
            .iter()
            .filter(|g| g.admitted)
            .map(|g| &g.candidate_id)
            .collect();
        let admitted: Vec<Candidate> = self
            .store
            .read_run(&key(Stage::RawNews))
            .await?
            .into_raw_news()?
            .into_iter()
            .filter(|c| admitted_ids.contains(&c.id))
            .collect();
        if admitted.len() < admitted_ids.len() {
            warn!(
                missing = admitted_ids.len() - admitted.len(),
                "admitted candidates missing from raw news, replaying the rest"
            );
        }

        let rows = self.store.read_run(&key(Stage::RawMarket)).await?.into_raw_market()?;
        if rows.is_empty() {
            warn!("no stored market snapshot, indicators marked unavailable");
        }
        let snapshot = MarketSnapshot::from_records(&rows, Timestamp::now());
        info!(admitted = admitted.len(), "replaying chains");

        let admitted_count = admitted.len();
        let analysis = self.analyze(date, &run_id, admitted, snapshot, &cancel).await?;
        Ok(RunSummary {
            run_id,
            date,
            candidates_seen: gates.len(),
            malformed: 0,
            earlier_admissions: 0,
            admitted: admitted_count,
            rejected_by_gate: tally_rejections(&gates),
            processed: analysis.processed,
            chain_failures: analysis.chain_failures,
            not_started: analysis.not_started,
            aborted: analysis.aborted,
            cancelled: analysis.cancelled,
            daily_analysis: analysis.daily_analysis,
            cost_report: analysis.cost_report,
            article_source_error: None,
            market_source_error: None,
        })
    }

    /// Evaluates the gates over `candidates` and writes the gate partition.
    async fn admit(
        &self,
        date: NaiveDate,
        run_id: &RunId,
        candidates: &[Candidate],
        cancel: &watch::Receiver<bool>,
    ) -> Result<Admission, PipelineError> {
        let mut seen = self.seen_window(date, run_id).await;
        let earlier_admissions = seen.len();
        let mut results = Vec::with_capacity(candidates.len());
        let mut admitted: Vec<Candidate> = Vec::new();
        let mut not_started = 0;
        let mut cancelled = false;
        for (i, candidate) in candidates.iter().enumerate() {
            if *cancel.borrow() {
                cancelled = true;
                not_started += candidates.len() - i;
                warn!(remaining = candidates.len() - i, "run cancelled during admission");
                break;
            }
            let result = self.gates.evaluate(candidate, &mut seen, Timestamp::now());
            if result.admitted {
                admitted.push(candidate.clone());
            }
            results.push(result);
        }
        info!(
            admitted = admitted.len(),
            rejected = results.len() - admitted.len(),
            "admission complete"
        );
        self.write(
            &PartitionKey::new(Stage::Gates, date, run_id.clone()),
            StageRecords::Gates(results.clone()),
        )
        .await?;
        Ok(Admission {
            results,
            admitted,
            earlier_admissions,
            not_started,
            cancelled,
        })
    }

    /// Runs the chains and the daily analysis, writes their partitions and
    /// saves the run's cost report.
    async fn analyze(
        &self,
        date: NaiveDate,
        run_id: &RunId,
        admitted: Vec<Candidate>,
        snapshot: MarketSnapshot,
        cancel: &watch::Receiver<bool>,
    ) -> Result<Analysis, PipelineError> {
        let key = |stage| PartitionKey::new(stage, date, run_id.clone());
        let accountant = Arc::new(CostAccountant::from_config(&self.config.cost)?);
        let executor = Arc::new(ChainExecutor::new(
            Arc::clone(&self.provider),
            Arc::clone(&accountant),
            self.config.chain.clone(),
        ));
        let admitted_count = admitted.len();
        let outcomes = run_chains(
            Arc::clone(&executor),
            admitted,
            snapshot,
            self.config.chain.concurrency,
            cancel.clone(),
        )
        .await;

        let mut processed: Vec<ProcessedRecord> = Vec::new();
        let mut failures: Vec<ChainFailureRecord> = Vec::new();
        let mut chain_failures: BTreeMap<ChainStep, usize> = BTreeMap::new();
        let mut not_started = 0;
        let mut aborted = 0;
        for (candidate, outcome) in outcomes {
            match outcome {
                ChainOutcome::Processed(record) => processed.push(*record),
                ChainOutcome::Failed(failure) => {
                    *chain_failures.entry(failure.step).or_default() += 1;
                    failures.push(ChainFailureRecord::from_failure(
                        &failure,
                        &candidate.title,
                        Timestamp::now(),
                    ));
                }
                ChainOutcome::NotStarted => not_started += 1,
                ChainOutcome::Aborted => aborted += 1,
            }
        }
        let cancelled = *cancel.borrow();
        info!(
            admitted = admitted_count,
            processed = processed.len(),
            failed = failures.len(),
            aborted,
            "analysis complete"
        );
        let processed_count = processed.len();
        self.write(&key(Stage::ProcessedNews), StageRecords::ProcessedNews(processed))
            .await?;
        self.write(&key(Stage::ChainFailures), StageRecords::ChainFailures(failures))
            .await?;

        // Daily analysis.
        let (daily_analysis, rows) = self.synthesize_day(&executor, date, run_id, cancel).await;
        self.write(&key(Stage::DailyAnalysis), StageRecords::DailyAnalysis(rows))
            .await?;

        // Cost report.
        let prior = self.prior_daily_spend(date, run_id).await;
        let cost_report = accountant.report(date, run_id, prior);
        self.reports.save(&cost_report).await.map_err(|e| {
            error!(error = %e, "cost report could not be saved");
            PipelineError::Storage(e)
        })?;
        info!(
            total_cost = %cost_report.total_cost_usd,
            daily_total = %cost_report.daily_total_usd,
            threshold_exceeded = cost_report.threshold_exceeded.is_some(),
            "run complete"
        );

        Ok(Analysis {
            processed: processed_count,
            chain_failures,
            not_started,
            aborted,
            cancelled,
            daily_analysis,
            cost_report,
        })
    }

    /// Daily analysis over every processed record of `date`. Never fails the
    /// run: problems are reported in the returned status.
    async fn synthesize_day(
        &self,
        executor: &ChainExecutor,
        date: NaiveDate,
        run_id: &RunId,
        cancel: &watch::Receiver<bool>,
    ) -> (DailyAnalysisStatus, Vec<DailyAnalysisRecord>) {
        if !self.config.daily.enabled {
            return (DailyAnalysisStatus::skipped("disabled"), Vec::new());
        }
        if *cancel.borrow() {
            return (DailyAnalysisStatus::skipped("run cancelled"), Vec::new());
        }
        let records = match self
            .store
            .read(Stage::ProcessedNews, date)
            .await
            .and_then(StageRecords::into_processed)
        {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "processed records unreadable, daily analysis skipped");
                return (
                    DailyAnalysisStatus::Failed {
                        kind: "storage".into(),
                        message: e.to_string(),
                    },
                    Vec::new(),
                );
            }
        };
        if records.is_empty() {
            info!("no processed records for the date, daily analysis skipped");
            return (DailyAnalysisStatus::skipped("no processed records"), Vec::new());
        }
        match executor
            .analyze_day(date, run_id, &records, self.config.daily.top_news, cancel.clone())
            .await
        {
            Ok(record) => (
                DailyAnalysisStatus::Completed {
                    articles: record.articles_analyzed,
                    cost_usd: record.cost,
                },
                vec![record],
            ),
            Err(cause) => (
                DailyAnalysisStatus::Failed {
                    kind: cause.kind().to_string(),
                    message: cause.to_string(),
                },
                Vec::new(),
            ),
        }
    }

    /// Seen window for a run of `date`, holding every candidate admitted by an
    /// earlier run of that date. The run's own partitions are skipped, so a
    /// re-run of a run id evaluates its candidates afresh.
    async fn seen_window(&self, date: NaiveDate, run_id: &RunId) -> SeenWindow {
        let mut seen = SeenWindow::new();
        let runs = match self.store.runs(Stage::Gates, date).await {
            Ok(runs) => runs,
            Err(e) => {
                warn!(error = %e, "earlier gate results unreadable, duplicate window starts empty");
                return seen;
            }
        };
        for earlier in runs.into_iter().filter(|r| r != run_id) {
            match self.earlier_admissions(date, &earlier).await {
                Ok(candidates) => candidates.iter().for_each(|c| seen.record(c)),
                Err(e) => warn!(
                    earlier_run = %earlier,
                    error = %e,
                    "earlier run unreadable, its admissions are not in the duplicate window"
                ),
            }
        }
        if !seen.is_empty() {
            info!(carried_over = seen.len(), "duplicate window seeded from earlier runs");
        }
        seen
    }

    async fn earlier_admissions(
        &self,
        date: NaiveDate,
        run_id: &RunId,
    ) -> Result<Vec<Candidate>, StorageError> {
        let key = |stage| PartitionKey::new(stage, date, run_id.clone());
        let gates = self.store.read_run(&key(Stage::Gates)).await?.into_gates()?;
        let admitted: HashSet<&CandidateId> = gates
            .iter()
            .filter(|g| g.admitted)
            .map(|g| &g.candidate_id)
            .collect();
        if admitted.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .store
            .read_run(&key(Stage::RawNews))
            .await?
            .into_raw_news()?
            .into_iter()
            .filter(|c| admitted.contains(&c.id))
            .collect())
    }

    async fn read_for_replay(&self, key: &PartitionKey) -> Result<StageRecords, PipelineError> {
        let records = self.store.read_run(key).await?;
        if records.is_empty() {
            warn!(partition = %key, "nothing to replay");
            return Err(PipelineError::NothingToReplay {
                partition: key.to_string(),
            });
        }
        Ok(records)
    }

    async fn write(&self, key: &PartitionKey, records: StageRecords) -> Result<(), PipelineError> {
        self.store.write(key, &records).await.map_err(|e| {
            error!(stage = %key.stage, records = records.len(), error = %e, "partition write failed");
            PipelineError::Storage(e)
        })?;
        info!(stage = %key.stage, records = records.len(), "partition written");
        Ok(())
    }

    /// Spend of earlier runs on `date`. A re-run of `run_id` replaces its own
    /// earlier report, so that report is excluded.
    async fn prior_daily_spend(&self, date: NaiveDate, run_id: &RunId) -> TokenCost {
        match self.reports.load_day(date).await {
            Ok(reports) => reports
                .iter()
                .filter(|r| &r.run_id != run_id)
                .map(|r| r.total_cost_usd)
                .sum(),
            Err(e) => {
                warn!(error = %e, "earlier cost reports unreadable, day total covers this run only");
                TokenCost::zero()
            }
        }
    }
}

fn tally_rejections(results: &[GateResult]) -> BTreeMap<String, usize> {
    let mut rejected: BTreeMap<String, usize> = BTreeMap::new();
    for rejection in results.iter().filter_map(GateResult::rejection) {
        *rejected.entry(rejection.gate_name.to_string()).or_default() += 1;
    }
    rejected
}

enum ChainOutcome {
    Processed(Box<ProcessedRecord>),
    Failed(Box<ChainFailure>),
    NotStarted,
    /// The chain's task panicked.
    Aborted,
}

/// Runs every admitted candidate's chain with at most `concurrency` in
/// flight. Outcomes come back in admission order.
async fn run_chains(
    executor: Arc<ChainExecutor>,
    admitted: Vec<Candidate>,
    snapshot: MarketSnapshot,
    concurrency: usize,
    cancel: watch::Receiver<bool>,
) -> Vec<(Candidate, ChainOutcome)> {
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let snapshot = Arc::new(snapshot);
    let mut tasks = JoinSet::new();

    for (index, candidate) in admitted.iter().cloned().enumerate() {
        let executor = Arc::clone(&executor);
        let permits = Arc::clone(&permits);
        let snapshot = Arc::clone(&snapshot);
        let cancel = cancel.clone();
        tasks.spawn(
            async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return (index, ChainOutcome::NotStarted);
                };
                if *cancel.borrow() {
                    return (index, ChainOutcome::NotStarted);
                }
                let outcome = match executor
                    .run_cancellable(&candidate, &snapshot, cancel)
                    .await
                {
                    Ok(record) => ChainOutcome::Processed(Box::new(record)),
                    Err(failure) => ChainOutcome::Failed(Box::new(failure)),
                };
                (index, outcome)
            }
            .in_current_span(),
        );
    }

    let mut slots: Vec<Option<ChainOutcome>> = admitted.iter().map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, outcome)) => slots[index] = Some(outcome),
            Err(e) => error!(error = %e, panicked = e.is_panic(), "chain task aborted"),
        }
    }

    // A slot left empty belongs to a task that never returned.
    admitted
        .into_iter()
        .zip(slots)
        .map(|(candidate, slot)| {
            let outcome = slot.unwrap_or_else(|| {
                error!(
                    candidate_id = %candidate.id.short(),
                    title = %candidate.title,
                    "chain aborted without a result"
                );
                ChainOutcome::Aborted
            });
            (candidate, outcome)
        })
        .collect()
}
