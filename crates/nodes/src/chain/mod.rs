//! Chain Executor.
//!
//! Drives one admitted candidate through summarization, topic extraction,
//! impact analysis and ranking. Each step is one or more calls to the
//! [`InferenceProvider`]; the step's output is layered onto the
//! [`AnalysisContext`] only when it validates.
//!
//! Per step, three independent budgets bound the number of calls:
//!
//! - transient errors (rate limit, timeout) follow the [`RetrySchedule`];
//! - schema violations get `schema_retries` extra calls with a reformat notice;
//! - an empty topic set gets `empty_topic_retries` extra calls with a stricter
//!   notice.
//!
//! Every call the provider billed is recorded with the [`CostAccountant`]
//! before its outcome is inspected, so failed steps still account for their
//! cost. An out-of-range rank score fails the step at once.

use std::future::Future;
use std::sync::Arc;

use pipeline::{
    AnalysisContext, Candidate, CandidateId, ChainConfig, ChainFailure, ChainStep, CostAccountant,
    InferenceProvider, InferenceRequest, InferenceResponse, MarketSnapshot, ProcessedRecord,
    ProviderError, ProviderErrorKind, StepFailure, StepUsage, Timestamp, TokenCount,
};
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::prompts::{self, REFORMAT_NOTICE, STRICT_TOPICS_NOTICE};
use crate::retry::RetrySchedule;

mod daily;
pub(crate) mod parse;

use parse::PayloadError;

/// Runs analysis chains for admitted candidates.
///
/// Cheap to share: one executor serves every concurrent chain of a run.
pub struct ChainExecutor {
    provider: Arc<dyn InferenceProvider>,
    accountant: Arc<CostAccountant>,
    config: ChainConfig,
    schedule: RetrySchedule,
}

impl std::fmt::Debug for ChainExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainExecutor")
            .field("provider", &self.provider.name())
            .field("schedule", &self.schedule)
            .finish()
    }
}

/// Outcome of one provider call as seen by the step loop.
enum CallOutcome {
    Response(InferenceResponse),
    Failed(ProviderError),
    Cancelled,
}

/// Identifies the chain a step belongs to.
struct StepScope<'a> {
    candidate_id: &'a CandidateId,
    step: ChainStep,
}

impl ChainExecutor {
    pub fn new(
        provider: Arc<dyn InferenceProvider>,
        accountant: Arc<CostAccountant>,
        config: ChainConfig,
    ) -> Self {
        let schedule = RetrySchedule::from_config(&config);
        Self {
            provider,
            accountant,
            config,
            schedule,
        }
    }

    /// Runs the full chain for `candidate`.
    ///
    /// # Errors
    ///
    /// Returns [`ChainFailure`] naming the failed step, its cause, the context
    /// reached so far and the usage the failed step incurred.
    pub async fn run(
        &self,
        candidate: &Candidate,
        market: &MarketSnapshot,
    ) -> Result<ProcessedRecord, ChainFailure> {
        // Holding the sender keeps the channel open, so the chain is never cancelled.
        let (_never, cancel) = watch::channel(false);
        self.run_cancellable(candidate, market, cancel).await
    }

    /// Runs the full chain, aborting with [`StepFailure::Cancelled`] as soon as
    /// `cancel` becomes `true`. A cancelled chain never yields a record; cost
    /// already recorded stands.
    ///
    /// # Errors
    ///
    /// Returns [`ChainFailure`] as for [`ChainExecutor::run`].
    pub async fn run_cancellable(
        &self,
        candidate: &Candidate,
        market: &MarketSnapshot,
        cancel: watch::Receiver<bool>,
    ) -> Result<ProcessedRecord, ChainFailure> {
        let span = info_span!("chain", candidate_id = %candidate.id.short());
        self.run_chain(candidate, market, cancel).instrument(span).await
    }

    async fn run_chain(
        &self,
        candidate: &Candidate,
        market: &MarketSnapshot,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<ProcessedRecord, ChainFailure> {
        let context = AnalysisContext::new(candidate.id.clone());

        // Step 1: summarization.
        let input = json!({ "title": candidate.title, "body": candidate.body });
        let sentences = self.config.min_summary_sentences..=self.config.max_summary_sentences;
        let (summary, usage) = self
            .step(
                StepScope { candidate_id: &candidate.id, step: ChainStep::Summarization },
                input,
                |payload| parse::summary(payload, sentences.clone()),
                &mut cancel,
            )
            .await
            .map_err(|(cause, usage)| failure(&context, ChainStep::Summarization, cause, usage))?;
        let context = advance(context.clone().with_summary(summary, usage), &context, ChainStep::Summarization)?;

        // Step 2: topic extraction.
        let input = json!({
            "title": candidate.title,
            "summary": context.summary().map(|s| s.summary.as_str()),
        });
        let (topics, usage) = self
            .step(
                StepScope { candidate_id: &candidate.id, step: ChainStep::TopicExtraction },
                input,
                parse::topics,
                &mut cancel,
            )
            .await
            .map_err(|(cause, usage)| failure(&context, ChainStep::TopicExtraction, cause, usage))?;
        let context = advance(context.clone().with_topics(topics, usage), &context, ChainStep::TopicExtraction)?;

        // Step 3: impact analysis.
        let input = json!({
            "summary": context.summary().map(|s| s.summary.as_str()),
            "topics": topic_names(&context),
            "market": market.to_context(),
        });
        let (impact, usage) = self
            .step(
                StepScope { candidate_id: &candidate.id, step: ChainStep::ImpactAnalysis },
                input,
                parse::impact,
                &mut cancel,
            )
            .await
            .map_err(|(cause, usage)| failure(&context, ChainStep::ImpactAnalysis, cause, usage))?;
        let context = advance(context.clone().with_impact(impact, usage), &context, ChainStep::ImpactAnalysis)?;

        // Step 4: ranking.
        let input = json!({
            "summary": context.summary().map(|s| s.summary.as_str()),
            "topics": topic_names(&context),
            "impact": context.impact().map(|i| json!({
                "direction": i.direction.as_str(),
                "mechanisms": i.mechanisms,
                "confidence": i.confidence.as_f64(),
                "time_horizon": i.time_horizon,
            })),
        });
        let (ranking, usage) = self
            .step(
                StepScope { candidate_id: &candidate.id, step: ChainStep::Ranking },
                input,
                parse::ranking,
                &mut cancel,
            )
            .await
            .map_err(|(cause, usage)| failure(&context, ChainStep::Ranking, cause, usage))?;
        let context = advance(context.clone().with_ranking(ranking, usage), &context, ChainStep::Ranking)?;

        let snapshot = context.clone();
        let record = context
            .complete(candidate, Timestamp::now())
            .map_err(|e| {
                failure(
                    &snapshot,
                    ChainStep::Ranking,
                    StepFailure::SchemaViolation { message: e.to_string(), attempts: 0 },
                    StepUsage::default(),
                )
            })?;
        info!(
            score = record.ranking.score.as_u8(),
            direction = record.impact.direction.as_str(),
            prompt_tokens = record.total_prompt_tokens.as_u64(),
            completion_tokens = record.total_completion_tokens.as_u64(),
            cost = %record.total_cost,
            "chain complete"
        );
        Ok(record)
    }

    /// Runs one step to a validated output or a permanent failure.
    async fn step<T, P>(
        &self,
        scope: StepScope<'_>,
        input: Value,
        parse: P,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(T, StepUsage), (StepFailure, StepUsage)>
    where
        P: Fn(&Value) -> Result<T, PayloadError>,
    {
        let mut usage = StepUsage::default();
        let mut transient_failures = 0u32;
        let mut schema_retries = 0u32;
        let mut topic_retries = 0u32;
        let mut notices: Vec<&'static str> = Vec::new();

        loop {
            if *cancel.borrow() {
                return Err((StepFailure::Cancelled, usage));
            }
            let attempt = usage.attempts + 1;
            let request = InferenceRequest {
                step: scope.step,
                instruction: prompts::instruction_with(scope.step, &notices),
                context: input.clone(),
                schema: prompts::schema(scope.step),
                attempt,
            };
            let span = info_span!("step", step = %scope.step, attempt);
            let outcome = self.call(request, cancel).instrument(span).await;

            let schema_message = match outcome {
                CallOutcome::Cancelled => return Err((StepFailure::Cancelled, usage)),
                CallOutcome::Response(response) => {
                    self.bill(&scope, response.prompt_tokens, response.completion_tokens, &mut usage);
                    match parse(&response.payload) {
                        Ok(output) => {
                            debug!(step = %scope.step, attempts = usage.attempts, "step succeeded");
                            return Ok((output, usage));
                        }
                        Err(PayloadError::ScoreOutOfRange(value)) => {
                            warn!(step = %scope.step, value, "rank score out of range");
                            return Err((StepFailure::ScoreOutOfRange { value }, usage));
                        }
                        Err(PayloadError::EmptyTopics) => {
                            if topic_retries < self.config.empty_topic_retries {
                                topic_retries += 1;
                                if !notices.contains(&STRICT_TOPICS_NOTICE) {
                                    notices.push(STRICT_TOPICS_NOTICE);
                                }
                                warn!(step = %scope.step, attempt, "no recognized topics, retrying with stricter instruction");
                                continue;
                            }
                            return Err((StepFailure::EmptyTopics { attempts: usage.attempts }, usage));
                        }
                        Err(PayloadError::Schema(message)) => message,
                    }
                }
                CallOutcome::Failed(error) => {
                    if error.is_billed() {
                        self.bill(&scope, error.prompt_tokens, error.completion_tokens, &mut usage);
                    } else {
                        usage.attempts += 1;
                    }
                    if error.kind == ProviderErrorKind::SchemaViolation {
                        error.message
                    } else {
                        transient_failures += 1;
                        match self.schedule.next_delay(&error.retry_policy(), transient_failures) {
                            Some(delay) => {
                                warn!(
                                    step = %scope.step,
                                    attempt,
                                    kind = %error.kind,
                                    delay_ms = delay.as_millis() as u64,
                                    "transient provider error, backing off"
                                );
                                if sleep_or_cancel(delay, cancel).await {
                                    return Err((StepFailure::Cancelled, usage));
                                }
                                continue;
                            }
                            None => {
                                warn!(step = %scope.step, attempt, kind = %error.kind, error = %error.message, "provider error is permanent");
                                return Err((
                                    StepFailure::Provider { error, attempts: usage.attempts },
                                    usage,
                                ));
                            }
                        }
                    }
                }
            };

            if schema_retries < self.config.schema_retries {
                schema_retries += 1;
                if !notices.contains(&REFORMAT_NOTICE) {
                    notices.push(REFORMAT_NOTICE);
                }
                warn!(step = %scope.step, attempt, reason = %schema_message, "schema violation, retrying with reformat instruction");
                continue;
            }
            warn!(step = %scope.step, attempt, reason = %schema_message, "schema violation is permanent");
            return Err((
                StepFailure::SchemaViolation {
                    message: schema_message,
                    attempts: usage.attempts,
                },
                usage,
            ));
        }
    }

    /// One provider call bounded by the call timeout and raced against cancellation.
    async fn call(
        &self,
        request: InferenceRequest,
        cancel: &mut watch::Receiver<bool>,
    ) -> CallOutcome {
        let timeout = self.config.call_timeout();
        let call = tokio::time::timeout(timeout, self.provider.invoke(request));
        tokio::select! {
            biased;
            () = cancelled(cancel) => CallOutcome::Cancelled,
            result = call => match result {
                Ok(Ok(response)) => CallOutcome::Response(response),
                Ok(Err(error)) => CallOutcome::Failed(error),
                Err(_) => CallOutcome::Failed(ProviderError::timeout(format!(
                    "no response within {}s",
                    timeout.as_secs()
                ))),
            },
        }
    }

    fn bill(
        &self,
        scope: &StepScope<'_>,
        prompt: TokenCount,
        completion: TokenCount,
        usage: &mut StepUsage,
    ) {
        let entry = self
            .accountant
            .record(scope.candidate_id, scope.step, prompt, completion);
        usage.add_call(prompt, completion, entry.usd_cost);
    }
}

fn failure(
    context: &AnalysisContext,
    step: ChainStep,
    cause: StepFailure,
    step_usage: StepUsage,
) -> ChainFailure {
    warn!(step = %step, kind = cause.kind(), cause = %cause, "chain failed");
    ChainFailure {
        step,
        cause,
        context: context.clone(),
        step_usage,
    }
}

/// Unwraps a context transition; the executor runs steps in order, so a
/// rejection here means the step's output cannot be recorded.
fn advance(
    next: Result<AnalysisContext, pipeline::ContextError>,
    previous: &AnalysisContext,
    step: ChainStep,
) -> Result<AnalysisContext, ChainFailure> {
    next.map_err(|e| {
        failure(
            previous,
            step,
            StepFailure::SchemaViolation {
                message: e.to_string(),
                attempts: 0,
            },
            StepUsage::default(),
        )
    })
}

fn topic_names(context: &AnalysisContext) -> Vec<&'static str> {
    context
        .topics()
        .map(|t| t.topics.iter().map(|c| c.as_str()).collect())
        .unwrap_or_default()
}

/// Resolves once `cancel` holds `true`; never resolves if the sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Sleeps for `delay`; returns `true` if cancelled first.
async fn sleep_or_cancel(delay: std::time::Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    race(tokio::time::sleep(delay), cancelled(cancel)).await
}

async fn race(work: impl Future<Output = ()>, cancel: impl Future<Output = ()>) -> bool {
    tokio::select! {
        biased;
        () = cancel => true,
        () = work => false,
    }
}
