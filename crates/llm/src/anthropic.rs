//! Anthropic Messages API provider.
//!
//! Sends one user message per call: the step instruction, the expected JSON
//! schema and the step context. The reply's text blocks are joined and the
//! structured payload is extracted with [`extract_structured_block`].
//!
//! Status mapping:
//!
//! | Response | [`ProviderErrorKind`] |
//! |----------|-----------------------|
//! | 429, 529 | `RateLimited` (with `Retry-After` when present) |
//! | client-side timeout | `Timeout` |
//! | other non-2xx, transport errors, undecodable body | `ServerError` |
//! | 2xx without a JSON object | `SchemaViolation` (billed) |

use std::time::Duration;

use async_trait::async_trait;
use pipeline::{
    InferenceProvider, InferenceRequest, InferenceResponse, ProviderError, ProviderErrorKind,
    TokenCount,
};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::extract::extract_structured_block;
use crate::LlmError;

/// Default Messages API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// API version header value.
const API_VERSION: &str = "2023-06-01";

/// Connection settings for [`AnthropicProvider`].
#[derive(Debug, Clone, PartialEq)]
pub struct AnthropicSettings {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Base URL without the `/v1/messages` path.
    pub base_url: String,
    /// Transport-level timeout. The chain executor applies its own call
    /// timeout on top.
    pub request_timeout: Duration,
}

impl Default for AnthropicSettings {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5".into(),
            max_tokens: 2048,
            temperature: 0.2,
            base_url: DEFAULT_BASE_URL.into(),
            request_timeout: Duration::from_secs(90),
        }
    }
}

/// [`InferenceProvider`] backed by the Anthropic Messages API.
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    settings: AnthropicSettings,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl AnthropicProvider {
    /// # Errors
    ///
    /// Returns [`LlmError::MissingApiKey`] for an empty key and
    /// [`LlmError::Client`] if the HTTP client cannot be built.
    pub fn new(api_key: impl Into<String>, settings: AnthropicSettings) -> Result<Self, LlmError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(LlmError::MissingApiKey {
                variable: "api_key".into(),
            });
        }
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| LlmError::Client {
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            api_key,
            settings,
        })
    }

    /// Reads the API key from the environment variable `variable`.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::MissingApiKey`] if the variable is unset or empty.
    pub fn from_env(variable: &str, settings: AnthropicSettings) -> Result<Self, LlmError> {
        let api_key = std::env::var(variable)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| LlmError::MissingApiKey {
                variable: variable.to_string(),
            })?;
        Self::new(api_key, settings)
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.settings.base_url.trim_end_matches('/'))
    }

    fn build_request(&self, request: &InferenceRequest) -> MessagesRequest {
        MessagesRequest {
            model: self.settings.model.clone(),
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            messages: vec![Message {
                role: "user",
                content: render_prompt(request),
            }],
        }
    }
}

/// Instruction, schema and context as one message body.
fn render_prompt(request: &InferenceRequest) -> String {
    let schema = serde_json::to_string_pretty(&request.schema).unwrap_or_default();
    let context = serde_json::to_string_pretty(&request.context).unwrap_or_default();
    format!(
        "{instruction}\n\nRespond only with a JSON object matching this schema:\n{schema}\n\nInput:\n{context}",
        instruction = request.instruction,
    )
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f64,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// Seconds from a `Retry-After` header. HTTP-date values are ignored.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn status_error(status: StatusCode, headers: &HeaderMap, body: &str) -> ProviderError {
    let message = format!("HTTP {}: {}", status.as_u16(), truncate(body, 300));
    match status.as_u16() {
        429 | 529 => ProviderError::rate_limited(retry_after(headers), message),
        _ => ProviderError::server_error(message),
    }
}

fn transport_error(err: &reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::timeout(err.to_string())
    } else {
        ProviderError::server_error(err.to_string())
    }
}

/// Turns a decoded reply into a payload, keeping the billed tokens on failure.
fn into_inference_response(
    response: MessagesResponse,
) -> Result<InferenceResponse, ProviderError> {
    let prompt_tokens = TokenCount::new(response.usage.input_tokens);
    let completion_tokens = TokenCount::new(response.usage.output_tokens);
    let text: String = response
        .content
        .into_iter()
        .filter(|block| block.kind.is_empty() || block.kind == "text")
        .map(|block| block.text)
        .collect::<Vec<_>>()
        .join("");
    match extract_structured_block(&text) {
        Some(payload) => Ok(InferenceResponse {
            payload,
            prompt_tokens,
            completion_tokens,
        }),
        None => Err(ProviderError::schema_violation(format!(
            "no JSON object in reply: {}",
            truncate(&text, 200)
        ))
        .with_usage(prompt_tokens, completion_tokens)),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

#[async_trait]
impl InferenceProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn invoke(&self, request: InferenceRequest) -> Result<InferenceResponse, ProviderError> {
        let body = self.build_request(&request);
        debug!(step = %request.step, attempt = request.attempt, model = %self.settings.model, "sending messages request");

        let response = self
            .client
            .post(self.endpoint())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            let error = status_error(status, &headers, &text);
            warn!(step = %request.step, status = status.as_u16(), kind = %error.kind, "provider returned an error status");
            return Err(error);
        }

        let decoded = response
            .json::<MessagesResponse>()
            .await
            .map_err(|e| match transport_error(&e) {
                timeout @ ProviderError {
                    kind: ProviderErrorKind::Timeout,
                    ..
                } => timeout,
                _ => ProviderError::server_error(format!("undecodable reply: {e}")),
            })?;
        into_inference_response(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline::ChainStep;
    use reqwest::header::HeaderValue;
    use serde_json::json;

    fn request() -> InferenceRequest {
        InferenceRequest {
            step: ChainStep::Ranking,
            instruction: "Rank it.".into(),
            context: json!({"summary": "Uno. Dos. Tres."}),
            schema: json!({"type": "object"}),
            attempt: 1,
        }
    }

    fn decode(body: serde_json::Value) -> MessagesResponse {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn empty_keys_are_rejected() {
        let err = AnthropicProvider::new("  ", AnthropicSettings::default()).unwrap_err();
        assert!(matches!(err, LlmError::MissingApiKey { .. }));
    }

    #[test]
    fn endpoint_tolerates_trailing_slash() {
        let settings = AnthropicSettings {
            base_url: "http://localhost:8080/".into(),
            ..AnthropicSettings::default()
        };
        let provider = AnthropicProvider::new("k", settings).unwrap();
        assert_eq!(provider.endpoint(), "http://localhost:8080/v1/messages");
    }

    #[test]
    fn request_body_carries_instruction_schema_and_context() {
        let provider = AnthropicProvider::new("k", AnthropicSettings::default()).unwrap();
        let body = serde_json::to_value(provider.build_request(&request())).unwrap();
        assert_eq!(body["messages"][0]["role"], "user");
        let content = body["messages"][0]["content"].as_str().unwrap();
        assert!(content.starts_with("Rank it."));
        assert!(content.contains("\"type\": \"object\""));
        assert!(content.contains("Uno. Dos. Tres."));
    }

    #[test]
    fn usage_is_read_from_the_reply() {
        let reply = decode(json!({
            "content": [
                {"type": "text", "text": "Claro:\n```json\n{\"score\": 4}\n```"}
            ],
            "usage": {"input_tokens": 812, "output_tokens": 95}
        }));
        let out = into_inference_response(reply).unwrap();
        assert_eq!(out.payload, json!({"score": 4}));
        assert_eq!(out.prompt_tokens.as_u64(), 812);
        assert_eq!(out.completion_tokens.as_u64(), 95);
    }

    #[test]
    fn replies_without_json_are_billed_schema_violations() {
        let reply = decode(json!({
            "content": [{"type": "text", "text": "Lo siento, no puedo."}],
            "usage": {"input_tokens": 500, "output_tokens": 7}
        }));
        let err = into_inference_response(reply).unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::SchemaViolation);
        assert_eq!(err.prompt_tokens.as_u64(), 500);
        assert!(err.is_billed());
    }

    #[test]
    fn rate_limits_carry_retry_after() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        let err = status_error(StatusCode::TOO_MANY_REQUESTS, &headers, "slow down");
        assert_eq!(
            err.kind,
            ProviderErrorKind::RateLimited {
                retry_after: Some(Duration::from_secs(12))
            }
        );
        assert!(err.retry_policy().is_retryable());
    }

    #[test]
    fn other_statuses_are_server_errors() {
        let err = status_error(StatusCode::BAD_REQUEST, &HeaderMap::new(), "bad");
        assert_eq!(err.kind, ProviderErrorKind::ServerError);
        let err = status_error(StatusCode::BAD_GATEWAY, &HeaderMap::new(), "");
        assert_eq!(err.kind, ProviderErrorKind::ServerError);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate("añoñoño", 3), "año…");
        assert_eq!(truncate("corto", 10), "corto");
    }

    #[tokio::test]
    #[ignore = "calls the live Anthropic API; needs ANTHROPIC_API_KEY"]
    async fn live_ranking_call() {
        let provider =
            AnthropicProvider::from_env("ANTHROPIC_API_KEY", AnthropicSettings::default()).unwrap();
        let out = provider.invoke(request()).await.unwrap();
        assert!(out.payload.is_object());
        assert!(out.prompt_tokens.as_u64() > 0);
    }
}
