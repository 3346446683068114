//! newsgate orchestration: the chain executor and the pipeline orchestrator.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** This crate sequences calls between the domain
//! rules in the [`pipeline`] crate and the port traits it defines (inference
//! provider, sources, stores). It owns control flow: step ordering, retries,
//! timeouts, concurrency and cancellation. It contains no domain rules of its
//! own and performs no I/O except through those ports.
//!
//! | Module | Role |
//! |--------|------|
//! | [`chain`] | Four-step analysis state machine for one admitted candidate, and the day-level synthesis step |
//! | [`retry`] | Exponential back-off schedule for transient provider errors |
//! | [`prompts`] | Step instructions and expected payload schemas |
//! | [`orchestrator`] | One run: sources, admission, chains, daily analysis, persistence, cost report; gate and chain replays |

pub mod chain;
pub mod orchestrator;
pub mod prompts;
pub mod retry;

pub use chain::ChainExecutor;
pub use orchestrator::{
    AdmissionSummary, DailyAnalysisStatus, PipelineOrchestrator, ReplayRequest, RunRequest,
    RunSummary,
};
pub use retry::RetrySchedule;
