//! Daily analysis step.
//!
//! One provider call over every processed record of a date, driven by the same
//! step loop as the chain steps: the same retry budgets, timeout and
//! cancellation apply, and every billed call is recorded under
//! [`ChainStep::DailyAnalysis`] against the date's ledger id.

use chrono::NaiveDate;
use pipeline::{
    daily_ledger_id, ranking_distribution, top_news, ChainStep, DailyAnalysisRecord,
    ProcessedRecord, RunId, StepFailure, Timestamp,
};
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{info, info_span, warn, Instrument};

use super::{parse, ChainExecutor, StepScope};

impl ChainExecutor {
    /// Synthesizes the day from `records`, presenting the `top` best in detail.
    ///
    /// # Errors
    ///
    /// Returns the [`StepFailure`] that ended the step. Calls billed before the
    /// failure stay in the ledger.
    pub async fn analyze_day(
        &self,
        date: NaiveDate,
        run_id: &RunId,
        records: &[ProcessedRecord],
        top: usize,
        cancel: watch::Receiver<bool>,
    ) -> Result<DailyAnalysisRecord, StepFailure> {
        let span = info_span!("daily_analysis", %date, articles = records.len());
        self.run_daily(date, run_id, records, top, cancel)
            .instrument(span)
            .await
    }

    async fn run_daily(
        &self,
        date: NaiveDate,
        run_id: &RunId,
        records: &[ProcessedRecord],
        top: usize,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<DailyAnalysisRecord, StepFailure> {
        let ledger_id = daily_ledger_id(date);
        let best = top_news(records, top);
        let distribution = ranking_distribution(records);
        let input = json!({
            "date": date.format("%Y-%m-%d").to_string(),
            "total_news": records.len(),
            "ranking_distribution": distribution,
            "top_news": best.iter().map(|r| headline_context(r)).collect::<Vec<_>>(),
        });

        let (analysis, usage) = self
            .step(
                StepScope { candidate_id: &ledger_id, step: ChainStep::DailyAnalysis },
                input,
                parse::daily,
                &mut cancel,
            )
            .await
            .map_err(|(cause, _)| {
                warn!(kind = cause.kind(), cause = %cause, "daily analysis failed");
                cause
            })?;

        if !best.iter().any(|r| r.candidate.id.as_str() == analysis.most_important.candidate_id) {
            warn!(
                candidate_id = %analysis.most_important.candidate_id,
                "headline item is not among the records presented"
            );
        }
        info!(
            direction = analysis.outlook.direction.as_str(),
            prompt_tokens = usage.prompt_tokens.as_u64(),
            completion_tokens = usage.completion_tokens.as_u64(),
            cost = %usage.cost,
            "daily analysis complete"
        );
        Ok(DailyAnalysisRecord {
            date,
            run_id: run_id.clone(),
            generated_at: Timestamp::now(),
            articles_analyzed: records.len(),
            ranking_distribution: distribution,
            top_candidates: best.iter().map(|r| r.candidate.id.clone()).collect(),
            analysis,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            cost: usage.cost,
            attempts: usage.attempts,
        })
    }
}

fn headline_context(record: &ProcessedRecord) -> Value {
    json!({
        "candidate_id": record.candidate.id,
        "title": record.candidate.title,
        "score": record.ranking.score.as_u8(),
        "category": record.ranking.category,
        "topics": record.topics.topics.iter().map(|t| t.as_str()).collect::<Vec<_>>(),
        "impact_direction": record.impact.direction.as_str(),
        "impact_confidence": record.impact.confidence.as_f64(),
        "justification": record.ranking.justification,
        "summary": record.summary.summary,
    })
}
