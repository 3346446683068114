//! newsgate inference provider adapters.
//!
//! Implements the [`pipeline::InferenceProvider`] trait for Anthropic's
//! Messages API, plus a deterministic zero-cost mock. Additional providers are
//! added as new `impl` blocks in this crate without any changes to the
//! `pipeline` crate.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** HTTP transport, request formatting, response parsing,
//! rate-limit header handling and structured-block extraction live here.
//! Adapters never retry: the chain executor decides from each error's
//! [`pipeline::RetryPolicy`].

use thiserror::Error;

pub mod anthropic;
pub mod extract;
pub mod mock;

pub use anthropic::{AnthropicProvider, AnthropicSettings};
pub use extract::extract_structured_block;
pub use mock::MockProvider;

/// Errors constructing a provider.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API key missing: set {variable}")]
    MissingApiKey { variable: String },

    #[error("HTTP client could not be built: {message}")]
    Client { message: String },
}
