//! Top-level error and retry-policy types for the newsgate domain.
//!
//! [`PipelineError`] covers conditions that terminate a run. Per-candidate
//! errors (malformed input, step failures, provider failures) are defined in
//! their respective modules and never cascade to other candidates:
//!
//! | Error | Scope | Effect |
//! |-------|-------|--------|
//! | [`crate::MalformedInputError`] | candidate | logged and skipped |
//! | [`crate::ProviderError`] | one inference call | retried per [`RetryPolicy`] |
//! | [`crate::StepFailure`] | candidate chain | chain aborted, failure persisted |
//! | [`crate::StorageError`] | run | surfaced as [`PipelineError::Storage`] |
//! | [`PipelineError`] | run | run terminated, caller notified |
//!
//! Gate rejections and cost-threshold crossings are not errors: they are
//! ordinary values carried in [`crate::GateResult`] and [`crate::CostReport`].
//!
//! [`RetryPolicy`] is a cross-cutting concern: any error type that participates
//! in retry decisions must be able to produce a [`RetryPolicy`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::StorageError;

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// Returned by infrastructure error types to let the chain executor decide
/// whether to re-invoke an operation.
///
/// - `Retryable` errors: provider timeouts, transient rate-limit responses.
/// - `NonRetryable` errors: server failures, schema violations (these have
///   their own single reformat retry), invalid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    ///
    /// `after` optionally specifies the minimum delay before retrying (e.g.
    /// derived from a `Retry-After` response header).
    Retryable {
        /// Minimum back-off before the next attempt. `None` means apply the
        /// caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried.
    NonRetryable,
}

impl RetryPolicy {
    /// Returns `true` for [`RetryPolicy::Retryable`].
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }
}

// ---------------------------------------------------------------------------
// Run-level errors
// ---------------------------------------------------------------------------

/// Errors that terminate a run.
///
/// These are distinct from per-candidate errors in that no further output can
/// be produced (or already-computed results cannot be made durable).
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum PipelineError {
    /// Neither the article source nor the market snapshot source produced data.
    #[error("Article source and market snapshot source are both unavailable (articles: {articles}; market: {market})")]
    SourcesUnavailable {
        /// Failure reported by the article source.
        articles: String,
        /// Failure reported by the market snapshot source.
        market: String,
    },

    /// A partition or report could not be written.
    ///
    /// Fatal because inference cost has already been sunk for results that
    /// would otherwise have no durable record.
    #[error("Storage failure: {0}")]
    Storage(#[from] StorageError),

    /// A replay found no records in the partition it starts from.
    #[error("Nothing to replay: partition {partition} is empty or missing")]
    NothingToReplay {
        /// Path-like name of the partition, e.g. `raw/news/date=2026-10-16/run=a`.
        partition: String,
    },

    /// The pipeline configuration is invalid.
    ///
    /// Produced at load time; a run never starts with an invalid config.
    #[error("Configuration error: {message}")]
    ConfigurationError {
        /// Description of the configuration problem.
        message: String,
    },
}

impl PipelineError {
    /// Shorthand for [`PipelineError::ConfigurationError`].
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigurationError {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_policy_classification() {
        assert!(RetryPolicy::Retryable { after: None }.is_retryable());
        assert!(!RetryPolicy::NonRetryable.is_retryable());
    }

    #[test]
    fn storage_errors_convert_into_pipeline_errors() {
        let err: PipelineError = StorageError::Io {
            path: "data/gates".into(),
            message: "read-only file system".into(),
        }
        .into();
        assert!(matches!(err, PipelineError::Storage(_)));
        assert!(err.to_string().contains("read-only file system"));
    }
}
