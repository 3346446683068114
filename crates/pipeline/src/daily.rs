//! Daily analysis: a day-level synthesis over every processed record of a date.
//!
//! After a run has written its processed records, the orchestrator selects the
//! day's highest-ranked records, asks the provider for one synthesis (the most
//! important item, the day's context, the peso outlook and recommendations for
//! traders) and persists the result as a [`DailyAnalysisRecord`]. The call is
//! billed to [`ChainStep::DailyAnalysis`](crate::ChainStep::DailyAnalysis).

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{CandidateId, ProcessedRecord, RunId, Timestamp, TokenCost, TokenCount};

/// Expected move of the peso against the dollar over the coming days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutlookDirection {
    Strengthening,
    Weakening,
    Neutral,
}

impl OutlookDirection {
    /// Parses `STRENGTHENING`, `WEAKENING` or `NEUTRAL`, ignoring case.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "STRENGTHENING" => Some(Self::Strengthening),
            "WEAKENING" => Some(Self::Weakening),
            "NEUTRAL" => Some(Self::Neutral),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strengthening => "STRENGTHENING",
            Self::Weakening => "WEAKENING",
            Self::Neutral => "NEUTRAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutlookConfidence {
    High,
    Medium,
    Low,
}

impl OutlookConfidence {
    /// Parses `HIGH`, `MEDIUM` or `LOW`, ignoring case.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "HIGH" => Some(Self::High),
            "MEDIUM" => Some(Self::Medium),
            "LOW" => Some(Self::Low),
            _ => None,
        }
    }
}

/// The item the synthesis singled out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadlineItem {
    /// Candidate id as returned by the provider.
    pub candidate_id: String,
    pub title: String,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PesoOutlook {
    pub direction: OutlookDirection,
    pub confidence: OutlookConfidence,
    pub explanation: String,
}

/// Validated output of the daily analysis call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAnalysisOutput {
    pub most_important: HeadlineItem,
    pub daily_context: String,
    pub outlook: PesoOutlook,
    /// At least one recommendation.
    pub trader_recommendations: Vec<String>,
}

/// Persisted daily analysis, one per `(date, run_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAnalysisRecord {
    pub date: NaiveDate,
    /// Run that produced the analysis.
    pub run_id: RunId,
    pub generated_at: Timestamp,
    /// Processed records of the date the analysis covers.
    pub articles_analyzed: usize,
    /// Record count per rank score, `1` through `5`.
    pub ranking_distribution: BTreeMap<u8, usize>,
    /// Records presented in detail, best first.
    pub top_candidates: Vec<CandidateId>,
    pub analysis: DailyAnalysisOutput,
    pub prompt_tokens: TokenCount,
    pub completion_tokens: TokenCount,
    pub cost: TokenCost,
    /// Provider calls made, retries included.
    pub attempts: u32,
}

/// Ledger key the daily analysis of `date` is billed under.
pub fn daily_ledger_id(date: NaiveDate) -> CandidateId {
    CandidateId::from_digest(format!("daily-{}", date.format("%Y-%m-%d")))
}

/// Number of records per rank score. Every score from 1 to 5 is present.
pub fn ranking_distribution(records: &[ProcessedRecord]) -> BTreeMap<u8, usize> {
    let mut distribution: BTreeMap<u8, usize> = (1..=5).map(|score| (score, 0)).collect();
    for record in records {
        *distribution.entry(record.ranking.score.as_u8()).or_default() += 1;
    }
    distribution
}

/// The `limit` best records: highest score first, then highest impact
/// confidence. Ties keep their stored order.
pub fn top_news(records: &[ProcessedRecord], limit: usize) -> Vec<&ProcessedRecord> {
    let mut ranked: Vec<&ProcessedRecord> = records.iter().collect();
    ranked.sort_by(|a, b| {
        b.ranking
            .score
            .as_u8()
            .cmp(&a.ranking.score.as_u8())
            .then_with(|| {
                b.impact
                    .confidence
                    .as_f64()
                    .partial_cmp(&a.impact.confidence.as_f64())
                    .unwrap_or(Ordering::Equal)
            })
    });
    ranked.truncate(limit);
    ranked
}
