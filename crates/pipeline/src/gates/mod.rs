//! Admission gates.
//!
//! A [`GateEvaluator`] holds a fixed, ordered list of [`Gate`] values and runs
//! them against a normalized [`Candidate`], stopping at the first failure. The
//! resulting [`GateResult`] lists exactly the verdicts produced up to and
//! including that failure, so every rejection carries an auditable reason.
//!
//! The standard order is:
//!
//! 1. [`ContentQualityGate`]: length bounds and Spanish-language ratio.
//! 2. [`TopicRelevanceGate`]: domain keyword matches.
//! 3. [`DuplicateGate`]: exact content id or near-identical title already seen.
//! 4. [`TemporalRelevanceGate`]: article age.
//!
//! Gates are pure: a verdict depends only on the candidate, the run-scoped
//! [`SeenWindow`], the evaluation instant and the gate's own configuration.
//! The window is an explicit parameter owned by the caller (a single writer),
//! never shared module state, so independent runs are isolated.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::candidate::normalize_text;
use crate::{Candidate, CandidateId, GateConfig, GateName, PipelineError, Timestamp};

mod content_quality;
mod duplicate;
pub mod language;
mod temporal;
mod topic_relevance;

pub use content_quality::ContentQualityGate;
pub use duplicate::DuplicateGate;
pub use temporal::TemporalRelevanceGate;
pub use topic_relevance::TopicRelevanceGate;

/// Stable name of the content quality gate.
pub const CONTENT_QUALITY: &str = "content_quality";
/// Stable name of the topic relevance gate.
pub const TOPIC_RELEVANCE: &str = "topic_relevance";
/// Stable name of the duplicate detection gate.
pub const DUPLICATE_DETECTION: &str = "duplicate_detection";
/// Stable name of the temporal relevance gate.
pub const TEMPORAL_RELEVANCE: &str = "temporal_relevance";

// ---------------------------------------------------------------------------
// Verdicts
// ---------------------------------------------------------------------------

/// Outcome of one gate for one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateVerdict {
    /// Gate that produced the verdict.
    pub gate_name: GateName,
    /// Whether the candidate passed.
    pub passed: bool,
    /// Human-readable explanation, always present.
    pub reason: String,
}

impl GateVerdict {
    /// A passing verdict.
    pub fn pass(gate_name: &GateName, reason: impl Into<String>) -> Self {
        Self {
            gate_name: gate_name.clone(),
            passed: true,
            reason: reason.into(),
        }
    }

    /// A failing verdict.
    pub fn fail(gate_name: &GateName, reason: impl Into<String>) -> Self {
        Self {
            gate_name: gate_name.clone(),
            passed: false,
            reason: reason.into(),
        }
    }
}

/// Outcome of gate evaluation for one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateResult {
    /// Candidate the gates were applied to.
    pub candidate_id: CandidateId,
    /// Verdicts in execution order, ending at the first failure.
    pub verdicts: Vec<GateVerdict>,
    /// `true` only when every gate passed.
    pub admitted: bool,
    /// When the evaluation happened.
    pub evaluated_at: Timestamp,
}

impl GateResult {
    /// The verdict that rejected the candidate, if any.
    pub fn rejection(&self) -> Option<&GateVerdict> {
        self.verdicts.iter().find(|v| !v.passed)
    }
}

// ---------------------------------------------------------------------------
// Seen window
// ---------------------------------------------------------------------------

/// Items already evaluated on the current date: everything this run
/// evaluated, admitted or not, plus whatever the orchestrator loaded from
/// earlier runs.
///
/// Grows monotonically; duplicate detection reads it and the evaluator appends
/// every candidate after its gates have run.
#[derive(Debug, Clone, Default)]
pub struct SeenWindow {
    ids: HashSet<CandidateId>,
    titles: Vec<SeenTitle>,
}

#[derive(Debug, Clone)]
struct SeenTitle {
    normalized: String,
    original: String,
}

impl SeenWindow {
    /// Creates an empty window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if a candidate with this id has been seen.
    pub fn contains_id(&self, id: &CandidateId) -> bool {
        self.ids.contains(id)
    }

    /// Returns the most similar prior title and its normalized similarity.
    ///
    /// Similarity is the normalized Levenshtein score of the lower-cased,
    /// whitespace-collapsed titles; `1.0` means identical.
    pub fn most_similar_title(&self, title: &str) -> Option<(&str, f64)> {
        let normalized = normalize_text(title);
        self.titles
            .iter()
            .map(|seen| {
                (
                    seen.original.as_str(),
                    strsim::normalized_levenshtein(&normalized, &seen.normalized),
                )
            })
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// Adds a candidate's id and title to the window.
    pub fn record(&mut self, candidate: &Candidate) {
        if self.ids.insert(candidate.id.clone()) {
            self.titles.push(SeenTitle {
                normalized: normalize_text(&candidate.title),
                original: candidate.title.clone(),
            });
        }
    }

    /// Number of distinct candidates seen.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns `true` if nothing has been seen yet.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Gate capability
// ---------------------------------------------------------------------------

/// Read-only inputs shared by every gate during one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct GateContext<'a> {
    /// Items seen earlier in the run.
    pub seen: &'a SeenWindow,
    /// Evaluation instant, used for age checks.
    pub now: Timestamp,
}

/// One admission check.
///
/// Implementations must be deterministic and free of I/O: the same candidate,
/// context and configuration always produce the same verdict. New checks are
/// added by implementing this trait and registering the value with
/// [`GateEvaluator::from_gates`].
pub trait Gate: Send + Sync {
    /// Stable name persisted with every verdict.
    fn name(&self) -> &GateName;

    /// Evaluates the candidate. Never fails: problems are failing verdicts.
    fn evaluate(&self, candidate: &Candidate, ctx: &GateContext<'_>) -> GateVerdict;
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

/// Runs an ordered list of gates with fail-fast semantics.
pub struct GateEvaluator {
    gates: Vec<Box<dyn Gate>>,
}

impl std::fmt::Debug for GateEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateEvaluator")
            .field("gates", &self.gate_names())
            .finish()
    }
}

impl GateEvaluator {
    /// Builds the standard four-gate evaluator.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ConfigurationError`] for invalid thresholds or
    /// keywords that cannot be compiled into matchers.
    pub fn standard(config: &GateConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Self::from_gates(vec![
            Box::new(ContentQualityGate::new(
                config.min_length,
                config.max_length,
                config.min_language_ratio,
            )),
            Box::new(TopicRelevanceGate::new(
                &config.keywords,
                config.min_keyword_matches,
            )?),
            Box::new(DuplicateGate::new(config.similarity_threshold)),
            Box::new(TemporalRelevanceGate::new(config.max_age_hours)),
        ])
    }

    /// Builds an evaluator from an explicit, ordered gate list.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ConfigurationError`] if the list is empty.
    pub fn from_gates(gates: Vec<Box<dyn Gate>>) -> Result<Self, PipelineError> {
        if gates.is_empty() {
            return Err(PipelineError::config(
                "gate evaluator needs at least one gate",
            ));
        }
        Ok(Self { gates })
    }

    /// Names of the registered gates, in execution order.
    pub fn gate_names(&self) -> Vec<&GateName> {
        self.gates.iter().map(|g| g.name()).collect()
    }

    /// Evaluates one candidate and records it in `seen`.
    ///
    /// The candidate is added to the window whatever the outcome, so a later
    /// copy of a rejected item is still caught as a duplicate.
    pub fn evaluate(
        &self,
        candidate: &Candidate,
        seen: &mut SeenWindow,
        now: Timestamp,
    ) -> GateResult {
        let mut verdicts = Vec::with_capacity(self.gates.len());
        let mut admitted = true;
        {
            let ctx = GateContext { seen, now };
            for gate in &self.gates {
                let verdict = gate.evaluate(candidate, &ctx);
                let passed = verdict.passed;
                debug!(
                    candidate_id = %candidate.id.short(),
                    gate = %verdict.gate_name,
                    passed,
                    reason = %verdict.reason,
                    "gate evaluated"
                );
                verdicts.push(verdict);
                if !passed {
                    admitted = false;
                    break;
                }
            }
        }
        seen.record(candidate);

        let result = GateResult {
            candidate_id: candidate.id.clone(),
            verdicts,
            admitted,
            evaluated_at: now,
        };
        match result.rejection() {
            Some(rejection) => info!(
                candidate_id = %candidate.id.short(),
                gate = %rejection.gate_name,
                reason = %rejection.reason,
                "candidate rejected"
            ),
            None => info!(candidate_id = %candidate.id.short(), "candidate admitted"),
        }
        result
    }
}
