//! Inference Provider port.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{ChainStep, RetryPolicy, TokenCount};

/// One structured inference call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    /// Chain step the call belongs to.
    pub step: ChainStep,
    /// Step-specific instruction.
    pub instruction: String,
    /// Accumulated context the instruction operates on.
    pub context: Value,
    /// JSON schema the payload must satisfy.
    pub schema: Value,
    /// 1-based attempt number within the step.
    pub attempt: u32,
}

/// A structured payload plus the usage the provider billed for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub payload: Value,
    pub prompt_tokens: TokenCount,
    pub completion_tokens: TokenCount,
}

/// Failure category reported by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProviderErrorKind {
    /// The provider throttled the call; `retry_after` is its suggested delay.
    RateLimited { retry_after: Option<Duration> },
    /// The call did not complete within the configured timeout.
    Timeout,
    /// The provider answered, but not with a payload of the expected shape.
    SchemaViolation,
    /// The provider failed in a way retrying will not fix.
    ServerError,
}

impl ProviderErrorKind {
    /// How the chain executor may retry this kind.
    ///
    /// Schema violations are non-retryable here; they get their own single
    /// reformat retry.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::RateLimited { retry_after } => RetryPolicy::Retryable {
                after: *retry_after,
            },
            Self::Timeout => RetryPolicy::Retryable { after: None },
            Self::SchemaViolation | Self::ServerError => RetryPolicy::NonRetryable,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Timeout => "timeout",
            Self::SchemaViolation => "schema_violation",
            Self::ServerError => "server_error",
        }
    }
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed provider failure.
///
/// Carries whatever usage the provider billed before failing (a schema
/// violation is a full, billed response), so sunk cost is never lost.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
    pub prompt_tokens: TokenCount,
    pub completion_tokens: TokenCount,
}

impl ProviderError {
    /// A failure with no billed usage.
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            prompt_tokens: TokenCount::default(),
            completion_tokens: TokenCount::default(),
        }
    }

    pub fn rate_limited(retry_after: Option<Duration>, message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::RateLimited { retry_after }, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Timeout, message)
    }

    pub fn schema_violation(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::SchemaViolation, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::ServerError, message)
    }

    /// Attaches billed usage.
    #[must_use]
    pub fn with_usage(mut self, prompt_tokens: TokenCount, completion_tokens: TokenCount) -> Self {
        self.prompt_tokens = prompt_tokens;
        self.completion_tokens = completion_tokens;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.kind.retry_policy()
    }

    /// Returns `true` if the failed call still consumed billable work.
    pub fn is_billed(&self) -> bool {
        self.kind == ProviderErrorKind::SchemaViolation
            || !self.prompt_tokens.is_zero()
            || !self.completion_tokens.is_zero()
    }
}

/// A reasoning engine that turns an instruction plus context into a
/// schema-conforming JSON payload.
///
/// Adapters own transport, authentication and structured-block extraction;
/// they never retry. Retry decisions belong to the chain executor, driven by
/// [`ProviderError::retry_policy`].
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Short provider name for logs (e.g. `"anthropic"`, `"mock"`).
    fn name(&self) -> &str;

    /// Performs one call.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] with the matching [`ProviderErrorKind`].
    async fn invoke(&self, request: InferenceRequest) -> Result<InferenceResponse, ProviderError>;
}
