//! Admission-and-analysis domain for newsgate.
//!
//! This crate contains every domain concept, newtype identifier, value type and
//! error type of the pipeline, plus the port traits infrastructure crates
//! implement. It defines *what* happens to a news item; the `nodes` crate
//! sequences it and the infrastructure crates supply I/O.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** No I/O dependencies. Gates, context
//! transitions and cost arithmetic are pure and deterministic.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`CandidateId`, `GateName`, `RunId`, ...) |
//! | [`types`] | Value types (`TokenCount`, `TokenCost`, `RankScore`, `Timestamp`, ...) |
//! | [`errors`] | Run-level error and retry-policy types |
//! | [`config`] | Gate, chain, cost and run configuration |
//! | [`candidate`] | Candidate Normalizer |
//! | [`gates`] | Gate Evaluator and the four standard gates |
//! | [`analysis`] | Chain steps, outputs, `AnalysisContext`, `ProcessedRecord`, failures |
//! | [`cost`] | Cost Accountant, ledger and report |
//! | [`daily`] | Day-level synthesis record, ranking distribution, top news |
//! | [`ports`] | Inference, source and storage traits |

pub mod analysis;
pub mod candidate;
pub mod config;
pub mod cost;
pub mod daily;
pub mod errors;
pub mod gates;
pub mod identifiers;
pub mod ports;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use analysis::{
    AnalysisContext, ChainFailure, ChainState, ChainStep, ContextError, ImpactDirection,
    ImpactOutput, ProcessedRecord, RankCategory, RankingOutput, StepFailure, StepUsage,
    SummaryOutput, TimeHorizon, TopicCategory, TopicsOutput, TraderAction,
};
pub use candidate::{normalize, Candidate, MalformedInputError, RawArticle};
pub use config::{
    ChainConfig, CostConfig, DailyConfig, GateConfig, PipelineConfig, RunConfig,
};
pub use cost::{
    CandidateCost, CostAccountant, CostEntry, CostLedger, CostReport, StepCost,
    ThresholdExceeded,
};
pub use daily::{
    daily_ledger_id, ranking_distribution, top_news, DailyAnalysisOutput, DailyAnalysisRecord,
    HeadlineItem, OutlookConfidence, OutlookDirection, PesoOutlook,
};
pub use errors::{PipelineError, RetryPolicy};
pub use gates::{Gate, GateContext, GateEvaluator, GateResult, GateVerdict, SeenWindow};
pub use identifiers::{CandidateId, GateName, RunId, SourceName};
pub use ports::{
    ArticleSource, ChainFailureRecord, CostReportStore, InferenceProvider, InferenceRequest,
    InferenceResponse, MarketIndicatorRecord, MarketSnapshot, MarketSnapshotSource,
    PartitionKey, PartitionedStore, ProviderError, ProviderErrorKind, SourceError, Stage,
    StageRecords, StorageError,
};
pub use types::{
    Confidence, CostCeiling, RankScore, Timestamp, TokenCost, TokenCount, TokenPrice,
};
