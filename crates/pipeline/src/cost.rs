//! Cost accounting.
//!
//! [`CostAccountant`] converts per-call token usage into USD with the
//! configured [`TokenPrice`] and appends one [`CostEntry`] per billed provider
//! call to a run-scoped [`CostLedger`]. Concurrent chains share one accountant;
//! appends are serialized behind a mutex, and every total is recomputed from
//! the entries so the ledger total is always their exact sum.
//!
//! [`CostAccountant::report`] produces the end-of-run [`CostReport`], including
//! the advisory [`ThresholdExceeded`] signal when the day's spend (this run
//! plus earlier runs of the same date) is above the [`CostCeiling`].

use std::collections::HashMap;

use chrono::NaiveDate;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    CandidateId, ChainStep, CostCeiling, CostConfig, PipelineError, RunId, Timestamp, TokenCost,
    TokenCount, TokenPrice,
};

/// One billed provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEntry {
    pub candidate_id: CandidateId,
    pub step: ChainStep,
    pub prompt_tokens: TokenCount,
    pub completion_tokens: TokenCount,
    pub usd_cost: TokenCost,
}

impl CostEntry {
    /// Prompt plus completion tokens.
    pub fn total_tokens(&self) -> TokenCount {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Append-only sequence of cost entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostLedger {
    entries: Vec<CostEntry>,
}

impl CostLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry.
    pub fn append(&mut self, entry: CostEntry) {
        self.entries.push(entry);
    }

    /// Entries in append order.
    pub fn entries(&self) -> &[CostEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exact sum of every entry's cost.
    pub fn total_cost(&self) -> TokenCost {
        self.entries.iter().map(|e| e.usd_cost).sum()
    }

    pub fn total_prompt_tokens(&self) -> TokenCount {
        self.entries.iter().map(|e| e.prompt_tokens).sum()
    }

    pub fn total_completion_tokens(&self) -> TokenCount {
        self.entries.iter().map(|e| e.completion_tokens).sum()
    }

    /// Prompt plus completion tokens over every entry.
    pub fn total_tokens(&self) -> TokenCount {
        self.total_prompt_tokens() + self.total_completion_tokens()
    }

    /// Per-candidate totals over chain steps, in order of each candidate's
    /// first entry. Day-level entries count in the totals and in
    /// [`CostLedger::by_step`] only.
    pub fn by_candidate(&self) -> Vec<CandidateCost> {
        let mut index: HashMap<&CandidateId, usize> = HashMap::new();
        let mut rows: Vec<CandidateCost> = Vec::new();
        for entry in self.entries.iter().filter(|e| e.step.is_chain_step()) {
            let slot = *index.entry(&entry.candidate_id).or_insert_with(|| {
                rows.push(CandidateCost::empty(entry.candidate_id.clone()));
                rows.len() - 1
            });
            let row = &mut rows[slot];
            row.calls += 1;
            row.prompt_tokens += entry.prompt_tokens;
            row.completion_tokens += entry.completion_tokens;
            row.usd_cost += entry.usd_cost;
        }
        rows
    }

    /// Per-step totals, in chain order; steps without entries are omitted.
    pub fn by_step(&self) -> Vec<StepCost> {
        ChainStep::BILLABLE
            .into_iter()
            .filter_map(|step| {
                let entries: Vec<&CostEntry> =
                    self.entries.iter().filter(|e| e.step == step).collect();
                if entries.is_empty() {
                    return None;
                }
                Some(StepCost {
                    step,
                    calls: entries.len(),
                    prompt_tokens: entries.iter().map(|e| e.prompt_tokens).sum(),
                    completion_tokens: entries.iter().map(|e| e.completion_tokens).sum(),
                    usd_cost: entries.iter().map(|e| e.usd_cost).sum(),
                })
            })
            .collect()
    }

    /// Number of distinct candidates with at least one entry.
    pub fn candidate_count(&self) -> usize {
        self.by_candidate().len()
    }

    /// Average chain cost per distinct candidate; zero for an empty ledger.
    pub fn avg_cost_per_candidate(&self) -> TokenCost {
        let rows = self.by_candidate();
        rows.iter()
            .map(|c| c.usd_cost)
            .sum::<TokenCost>()
            .average_over(rows.len())
    }
}

/// Cost attributed to one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateCost {
    pub candidate_id: CandidateId,
    pub calls: usize,
    pub prompt_tokens: TokenCount,
    pub completion_tokens: TokenCount,
    pub usd_cost: TokenCost,
}

impl CandidateCost {
    fn empty(candidate_id: CandidateId) -> Self {
        Self {
            candidate_id,
            calls: 0,
            prompt_tokens: TokenCount::default(),
            completion_tokens: TokenCount::default(),
            usd_cost: TokenCost::zero(),
        }
    }
}

/// Cost attributed to one chain step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepCost {
    pub step: ChainStep,
    pub calls: usize,
    pub prompt_tokens: TokenCount,
    pub completion_tokens: TokenCount,
    pub usd_cost: TokenCost,
}

/// Advisory signal raised when the day's spend is above the ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdExceeded {
    pub ceiling: CostCeiling,
    pub daily_total: TokenCost,
}

/// End-of-run cost summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostReport {
    pub date: NaiveDate,
    pub run_id: RunId,
    pub generated_at: Timestamp,
    /// Distinct candidates that incurred at least one chain call.
    pub total_articles: usize,
    pub total_prompt_tokens: TokenCount,
    pub total_completion_tokens: TokenCount,
    pub total_tokens: TokenCount,
    pub total_cost_usd: TokenCost,
    pub avg_cost_per_article: TokenCost,
    pub min_cost_per_article: TokenCost,
    pub max_cost_per_article: TokenCost,
    pub cost_breakdown: Vec<CandidateCost>,
    pub step_breakdown: Vec<StepCost>,
    pub entries: Vec<CostEntry>,
    /// This run's cost plus every earlier run of the same date.
    pub daily_total_usd: TokenCost,
    pub ceiling: CostCeiling,
    pub threshold_exceeded: Option<ThresholdExceeded>,
}

/// Run-scoped, thread-safe cost accountant.
#[derive(Debug)]
pub struct CostAccountant {
    price: TokenPrice,
    ceiling: CostCeiling,
    ledger: Mutex<CostLedger>,
}

impl CostAccountant {
    pub fn new(price: TokenPrice, ceiling: CostCeiling) -> Self {
        Self {
            price,
            ceiling,
            ledger: Mutex::new(CostLedger::new()),
        }
    }

    /// Builds an accountant from the `[pipeline.cost]` section.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ConfigurationError`] for invalid prices or ceiling.
    pub fn from_config(config: &CostConfig) -> Result<Self, PipelineError> {
        Ok(Self::new(config.price()?, config.ceiling()?))
    }

    pub fn price(&self) -> TokenPrice {
        self.price
    }

    /// Prices one provider call and appends it to the ledger.
    pub fn record(
        &self,
        candidate_id: &CandidateId,
        step: ChainStep,
        prompt_tokens: TokenCount,
        completion_tokens: TokenCount,
    ) -> CostEntry {
        let entry = CostEntry {
            candidate_id: candidate_id.clone(),
            step,
            prompt_tokens,
            completion_tokens,
            usd_cost: self.price.cost_of(prompt_tokens, completion_tokens),
        };
        self.ledger.lock().append(entry.clone());
        debug!(
            candidate_id = %candidate_id.short(),
            step = %step,
            prompt_tokens = prompt_tokens.as_u64(),
            completion_tokens = completion_tokens.as_u64(),
            usd_cost = %entry.usd_cost,
            "cost recorded"
        );
        entry
    }

    /// Running total for this run.
    pub fn total_cost(&self) -> TokenCost {
        self.ledger.lock().total_cost()
    }

    /// A copy of the ledger as it stands.
    pub fn snapshot(&self) -> CostLedger {
        self.ledger.lock().clone()
    }

    /// Builds the end-of-run report.
    ///
    /// `prior_daily_spend` is the total of earlier runs on `date`; the
    /// threshold signal compares it plus this run's total to the ceiling.
    pub fn report(
        &self,
        date: NaiveDate,
        run_id: &RunId,
        prior_daily_spend: TokenCost,
    ) -> CostReport {
        let ledger = self.snapshot();
        let cost_breakdown = ledger.by_candidate();
        let total_cost_usd = ledger.total_cost();
        let article_cost: TokenCost = cost_breakdown.iter().map(|c| c.usd_cost).sum();
        let daily_total_usd = prior_daily_spend + total_cost_usd;

        let threshold_exceeded = if self.ceiling.is_exceeded_by(daily_total_usd) {
            warn!(
                date = %date,
                daily_total = %daily_total_usd,
                ceiling = %self.ceiling,
                "daily cost ceiling exceeded"
            );
            Some(ThresholdExceeded {
                ceiling: self.ceiling,
                daily_total: daily_total_usd,
            })
        } else {
            None
        };

        CostReport {
            date,
            run_id: run_id.clone(),
            generated_at: Timestamp::now(),
            total_articles: cost_breakdown.len(),
            total_prompt_tokens: ledger.total_prompt_tokens(),
            total_completion_tokens: ledger.total_completion_tokens(),
            total_tokens: ledger.total_tokens(),
            total_cost_usd,
            avg_cost_per_article: article_cost.average_over(cost_breakdown.len()),
            min_cost_per_article: cost_breakdown
                .iter()
                .map(|c| c.usd_cost)
                .min()
                .unwrap_or_default(),
            max_cost_per_article: cost_breakdown
                .iter()
                .map(|c| c.usd_cost)
                .max()
                .unwrap_or_default(),
            step_breakdown: ledger.by_step(),
            cost_breakdown,
            entries: ledger.entries().to_vec(),
            daily_total_usd,
            ceiling: self.ceiling,
            threshold_exceeded,
        }
    }
}
