//! Analysis chain state: step outputs, the append-only context and the
//! persisted record.
//!
//! The chain runs four dependent steps in a fixed order:
//!
//! ```text
//! Started ─► Summarized ─► TopicsExtracted ─► ImpactAssessed ─► Ranked ─► Complete
//!    └───────────┴──────────────┴─────────────────┴──────────────┴──► Failed(step)
//! ```
//!
//! [`AnalysisContext`] is a value: each step consumes the previous context and
//! returns a new one carrying its output. Outputs are write-once and must be
//! layered in step order, so a later step can read but never replace earlier
//! results. When a chain fails, the context reached so far travels inside the
//! [`ChainFailure`] for diagnostics.
//!
//! A context stops at `Ranked`; [`AnalysisContext::complete`] consumes it into
//! a [`ProcessedRecord`], whose state is `Complete`. A [`ChainFailure`] reports
//! `Failed(step)`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    Candidate, CandidateId, Confidence, ProviderError, RankScore, Timestamp, TokenCost,
    TokenCount,
};

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// The six topic categories an article can be classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicCategory {
    Economy,
    Politics,
    Security,
    Energy,
    International,
    Monetary,
}

impl TopicCategory {
    /// Every category, in canonical order.
    pub const ALL: [TopicCategory; 6] = [
        Self::Economy,
        Self::Politics,
        Self::Security,
        Self::Energy,
        Self::International,
        Self::Monetary,
    ];

    /// Wire name of the category.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Economy => "economy",
            Self::Politics => "politics",
            Self::Security => "security",
            Self::Energy => "energy",
            Self::International => "international",
            Self::Monetary => "monetary",
        }
    }

    /// Parses a wire name, ignoring case and surrounding whitespace.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }
}

impl std::fmt::Display for TopicCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expected direction of an article's effect on the peso.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ImpactDirection {
    Positive,
    Negative,
    Neutral,
}

impl ImpactDirection {
    /// Parses `POSITIVE`, `NEGATIVE` or `NEUTRAL`, ignoring case.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "POSITIVE" => Some(Self::Positive),
            "NEGATIVE" => Some(Self::Negative),
            "NEUTRAL" => Some(Self::Neutral),
            _ => None,
        }
    }

    /// Wire name of the direction.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "POSITIVE",
            Self::Negative => "NEGATIVE",
            Self::Neutral => "NEUTRAL",
        }
    }
}

/// How soon the assessed impact is expected to materialize.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimeHorizon {
    ShortTerm,
    #[default]
    MediumTerm,
    LongTerm,
}

impl TimeHorizon {
    /// Parses `short-term`, `medium-term` or `long-term` (underscores accepted).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "short-term" => Some(Self::ShortTerm),
            "medium-term" => Some(Self::MediumTerm),
            "long-term" => Some(Self::LongTerm),
            _ => None,
        }
    }
}

/// Label attached to a rank score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RankCategory {
    Irrelevant,
    Low,
    Moderate,
    High,
    Critical,
}

impl RankCategory {
    /// The label conventionally attached to `score`.
    pub fn from_score(score: RankScore) -> Self {
        match score.as_u8() {
            0 | 1 => Self::Irrelevant,
            2 => Self::Low,
            3 => Self::Moderate,
            4 => Self::High,
            _ => Self::Critical,
        }
    }

    /// Parses a label, ignoring case.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "irrelevant" => Some(Self::Irrelevant),
            "low" => Some(Self::Low),
            "moderate" => Some(Self::Moderate),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// Action recommended to a trader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraderAction {
    Monitor,
    Alert,
    Urgent,
}

impl TraderAction {
    /// The action implied by `score`: 1-2 monitor, 3-4 alert, 5 urgent.
    pub fn from_score(score: RankScore) -> Self {
        match score.as_u8() {
            0..=2 => Self::Monitor,
            3 | 4 => Self::Alert,
            _ => Self::Urgent,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Monitor => "monitor",
            Self::Alert => "alert",
            Self::Urgent => "urgent",
        }
    }

    /// Parses an action name, ignoring case.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "monitor" => Some(Self::Monitor),
            "alert" => Some(Self::Alert),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }
}

/// One billable inference step.
///
/// The first four make up a candidate's chain. `DailyAnalysis` is the
/// day-level synthesis over every processed record of a date; it belongs to
/// no candidate's chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStep {
    Summarization,
    TopicExtraction,
    ImpactAnalysis,
    Ranking,
    DailyAnalysis,
}

impl ChainStep {
    /// The per-candidate chain, in execution order.
    pub const ALL: [ChainStep; 4] = [
        Self::Summarization,
        Self::TopicExtraction,
        Self::ImpactAnalysis,
        Self::Ranking,
    ];

    /// Every step a provider call can be billed to.
    pub const BILLABLE: [ChainStep; 5] = [
        Self::Summarization,
        Self::TopicExtraction,
        Self::ImpactAnalysis,
        Self::Ranking,
        Self::DailyAnalysis,
    ];

    /// Stable name used in logs, cost entries and failure records.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Summarization => "summarization",
            Self::TopicExtraction => "topic_extraction",
            Self::ImpactAnalysis => "impact_analysis",
            Self::Ranking => "ranking",
            Self::DailyAnalysis => "daily_analysis",
        }
    }

    /// Returns `true` for the four steps of a candidate's chain.
    pub fn is_chain_step(self) -> bool {
        self != Self::DailyAnalysis
    }

    /// Parses a stable step name.
    pub fn parse(value: &str) -> Option<Self> {
        Self::BILLABLE.into_iter().find(|s| s.as_str() == value.trim())
    }
}

impl std::fmt::Display for ChainStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of a chain in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainState {
    Started,
    Summarized,
    TopicsExtracted,
    ImpactAssessed,
    Ranked,
    Complete,
    Failed(ChainStep),
}

// ---------------------------------------------------------------------------
// Step outputs
// ---------------------------------------------------------------------------

/// Output of the summarization step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryOutput {
    pub summary: String,
    /// Reasoning trace; carried for audit, never used as control input.
    pub cot: String,
}

/// Output of the topic extraction step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicsOutput {
    /// Non-empty set of recognized categories.
    pub topics: BTreeSet<TopicCategory>,
    /// Confidence per topic in `topics`.
    pub confidence: BTreeMap<TopicCategory, Confidence>,
    pub cot: String,
}

/// Output of the impact analysis step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactOutput {
    pub direction: ImpactDirection,
    /// Non-empty list of causal mechanisms.
    pub mechanisms: Vec<String>,
    pub confidence: Confidence,
    pub time_horizon: TimeHorizon,
    pub cot: String,
}

/// Output of the ranking step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingOutput {
    pub score: RankScore,
    pub category: RankCategory,
    pub justification: String,
    pub trader_action: TraderAction,
    pub cot: String,
}

/// Provider usage attributed to one step, across all of its attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StepUsage {
    pub prompt_tokens: TokenCount,
    pub completion_tokens: TokenCount,
    pub cost: TokenCost,
    /// Provider calls made for the step.
    pub attempts: u32,
}

impl StepUsage {
    /// Adds one provider call to the usage.
    pub fn add_call(&mut self, prompt: TokenCount, completion: TokenCount, cost: TokenCost) {
        self.prompt_tokens += prompt;
        self.completion_tokens += completion;
        self.cost += cost;
        self.attempts += 1;
    }
}

impl std::ops::Add for StepUsage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            prompt_tokens: self.prompt_tokens + rhs.prompt_tokens,
            completion_tokens: self.completion_tokens + rhs.completion_tokens,
            cost: self.cost + rhs.cost,
            attempts: self.attempts + rhs.attempts,
        }
    }
}

impl std::iter::Sum for StepUsage {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |acc, u| acc + u)
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Violations of the write-once, in-order context discipline.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ContextError {
    /// The step's output was already recorded.
    #[error("output of step {step} is already recorded")]
    AlreadyWritten { step: ChainStep },

    /// An earlier step has not produced its output yet.
    #[error("step {step} cannot be recorded in state {state:?}")]
    OutOfOrder { step: ChainStep, state: ChainState },

    /// Completion was attempted with a different candidate.
    #[error("context belongs to {expected}, not {actual}")]
    CandidateMismatch {
        expected: CandidateId,
        actual: CandidateId,
    },
}

/// Accumulating state of one candidate's chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisContext {
    candidate_id: CandidateId,
    summary: Option<SummaryOutput>,
    topics: Option<TopicsOutput>,
    impact: Option<ImpactOutput>,
    ranking: Option<RankingOutput>,
    usage: BTreeMap<ChainStep, StepUsage>,
}

impl AnalysisContext {
    /// An empty context for `candidate_id`.
    pub fn new(candidate_id: CandidateId) -> Self {
        Self {
            candidate_id,
            summary: None,
            topics: None,
            impact: None,
            ranking: None,
            usage: BTreeMap::new(),
        }
    }

    pub fn candidate_id(&self) -> &CandidateId {
        &self.candidate_id
    }

    pub fn summary(&self) -> Option<&SummaryOutput> {
        self.summary.as_ref()
    }

    pub fn topics(&self) -> Option<&TopicsOutput> {
        self.topics.as_ref()
    }

    pub fn impact(&self) -> Option<&ImpactOutput> {
        self.impact.as_ref()
    }

    pub fn ranking(&self) -> Option<&RankingOutput> {
        self.ranking.as_ref()
    }

    /// Usage recorded for `step`, if the step succeeded.
    pub fn usage(&self, step: ChainStep) -> Option<&StepUsage> {
        self.usage.get(&step)
    }

    /// Usage summed over every successful step.
    pub fn total_usage(&self) -> StepUsage {
        self.usage.values().copied().sum()
    }

    /// Furthest state reached.
    pub fn state(&self) -> ChainState {
        match (&self.summary, &self.topics, &self.impact, &self.ranking) {
            (Some(_), Some(_), Some(_), Some(_)) => ChainState::Ranked,
            (Some(_), Some(_), Some(_), None) => ChainState::ImpactAssessed,
            (Some(_), Some(_), None, _) => ChainState::TopicsExtracted,
            (Some(_), None, _, _) => ChainState::Summarized,
            (None, _, _, _) => ChainState::Started,
        }
    }

    /// The step that would run next, or `None` once ranked.
    pub fn next_step(&self) -> Option<ChainStep> {
        match self.state() {
            ChainState::Started => Some(ChainStep::Summarization),
            ChainState::Summarized => Some(ChainStep::TopicExtraction),
            ChainState::TopicsExtracted => Some(ChainStep::ImpactAnalysis),
            ChainState::ImpactAssessed => Some(ChainStep::Ranking),
            _ => None,
        }
    }

    /// Returns `true` once all four steps have succeeded.
    pub fn is_complete(&self) -> bool {
        self.state() == ChainState::Ranked
    }

    fn admit(&self, step: ChainStep) -> Result<(), ContextError> {
        if self.usage.contains_key(&step) {
            return Err(ContextError::AlreadyWritten { step });
        }
        match self.next_step() {
            Some(next) if next == step => Ok(()),
            Some(_) | None => Err(ContextError::OutOfOrder {
                step,
                state: self.state(),
            }),
        }
    }

    /// Layers the summarization output onto the context.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError`] if the step is out of order or already written.
    pub fn with_summary(
        mut self,
        output: SummaryOutput,
        usage: StepUsage,
    ) -> Result<Self, ContextError> {
        self.admit(ChainStep::Summarization)?;
        self.summary = Some(output);
        self.usage.insert(ChainStep::Summarization, usage);
        Ok(self)
    }

    /// Layers the topic extraction output onto the context.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError`] if the step is out of order or already written.
    pub fn with_topics(
        mut self,
        output: TopicsOutput,
        usage: StepUsage,
    ) -> Result<Self, ContextError> {
        self.admit(ChainStep::TopicExtraction)?;
        self.topics = Some(output);
        self.usage.insert(ChainStep::TopicExtraction, usage);
        Ok(self)
    }

    /// Layers the impact analysis output onto the context.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError`] if the step is out of order or already written.
    pub fn with_impact(
        mut self,
        output: ImpactOutput,
        usage: StepUsage,
    ) -> Result<Self, ContextError> {
        self.admit(ChainStep::ImpactAnalysis)?;
        self.impact = Some(output);
        self.usage.insert(ChainStep::ImpactAnalysis, usage);
        Ok(self)
    }

    /// Layers the ranking output onto the context.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError`] if the step is out of order or already written.
    pub fn with_ranking(
        mut self,
        output: RankingOutput,
        usage: StepUsage,
    ) -> Result<Self, ContextError> {
        self.admit(ChainStep::Ranking)?;
        self.ranking = Some(output);
        self.usage.insert(ChainStep::Ranking, usage);
        Ok(self)
    }

    /// Joins a complete context with its candidate into the persisted record.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::OutOfOrder`] if a step is missing and
    /// [`ContextError::CandidateMismatch`] if `candidate` is not the one the
    /// context was created for.
    pub fn complete(
        self,
        candidate: &Candidate,
        processed_at: Timestamp,
    ) -> Result<ProcessedRecord, ContextError> {
        if candidate.id != self.candidate_id {
            return Err(ContextError::CandidateMismatch {
                expected: self.candidate_id,
                actual: candidate.id.clone(),
            });
        }
        let state = self.state();
        let total = self.total_usage();
        match (self.summary, self.topics, self.impact, self.ranking) {
            (Some(summary), Some(topics), Some(impact), Some(ranking)) => Ok(ProcessedRecord {
                candidate: candidate.clone(),
                summary,
                topics,
                impact,
                ranking,
                usage: self.usage,
                total_prompt_tokens: total.prompt_tokens,
                total_completion_tokens: total.completion_tokens,
                total_cost: total.cost,
                processed_at,
            }),
            _ => Err(ContextError::OutOfOrder {
                step: ChainStep::Ranking,
                state,
            }),
        }
    }
}

/// A candidate joined with its complete analysis; the processed-stage unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub candidate: Candidate,
    pub summary: SummaryOutput,
    pub topics: TopicsOutput,
    pub impact: ImpactOutput,
    pub ranking: RankingOutput,
    pub usage: BTreeMap<ChainStep, StepUsage>,
    pub total_prompt_tokens: TokenCount,
    pub total_completion_tokens: TokenCount,
    pub total_cost: TokenCost,
    pub processed_at: Timestamp,
}

impl ProcessedRecord {
    /// Terminal state of a completed chain.
    pub fn state(&self) -> ChainState {
        ChainState::Complete
    }
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

/// Why a single chain step failed permanently.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum StepFailure {
    /// The provider kept failing after the retry budget was spent, or failed
    /// with a non-retryable error.
    #[error("provider error after {attempts} attempt(s): {error}")]
    Provider { error: ProviderError, attempts: u32 },

    /// The provider's output did not match the step's shape, even after the
    /// reformat retry.
    #[error("schema violation after {attempts} attempt(s): {message}")]
    SchemaViolation { message: String, attempts: u32 },

    /// No recognized topic was returned, even with the stricter instruction.
    #[error("no recognized topics after {attempts} attempt(s)")]
    EmptyTopics { attempts: u32 },

    /// The provider returned a rank score outside `[1, 5]`.
    #[error("rank score {value} is outside [1, 5]")]
    ScoreOutOfRange { value: i64 },

    /// The run was cancelled while the step was in flight.
    #[error("cancelled")]
    Cancelled,
}

impl StepFailure {
    /// Stable short name used in persisted failure records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Provider { .. } => "provider_error",
            Self::SchemaViolation { .. } => "schema_violation",
            Self::EmptyTopics { .. } => "empty_topics",
            Self::ScoreOutOfRange { .. } => "score_out_of_range",
            Self::Cancelled => "cancelled",
        }
    }
}

/// A chain aborted at one step.
///
/// Carries the context reached before the failing step and the usage the
/// failing step incurred, so partial work and sunk cost stay inspectable.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("chain for {} failed at {step}: {cause}", .context.candidate_id().short())]
pub struct ChainFailure {
    pub step: ChainStep,
    pub cause: StepFailure,
    pub context: AnalysisContext,
    pub step_usage: StepUsage,
}

impl ChainFailure {
    pub fn candidate_id(&self) -> &CandidateId {
        self.context.candidate_id()
    }

    /// Terminal state of the failed chain.
    pub fn state(&self) -> ChainState {
        ChainState::Failed(self.step)
    }

    /// Usage across the whole chain, failing step included.
    pub fn total_usage(&self) -> StepUsage {
        self.context.total_usage() + self.step_usage
    }
}
