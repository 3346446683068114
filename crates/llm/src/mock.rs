//! Deterministic, zero-cost provider for tests and dry runs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use pipeline::{
    ChainStep, InferenceProvider, InferenceRequest, InferenceResponse, ProviderError, TokenCount,
};
use serde_json::{json, Value};

/// Answers every step with a fixed, valid payload and reports no token usage.
///
/// The same request always yields the same payload, so a chain run twice
/// against one mock produces identical records apart from timestamps.
#[derive(Debug, Clone)]
pub struct MockProvider {
    payloads: BTreeMap<ChainStep, Value>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        let payloads = ChainStep::BILLABLE
            .into_iter()
            .map(|step| (step, canned(step)))
            .collect();
        Self { payloads }
    }

    /// Replaces the canned payload for `step`.
    pub fn with_payload(mut self, step: ChainStep, payload: Value) -> Self {
        self.payloads.insert(step, payload);
        self
    }
}

fn canned(step: ChainStep) -> Value {
    match step {
        ChainStep::Summarization => json!({
            "summary": "Resumen simulado de la noticia. El contenido no fue analizado por un modelo. \
                        Los valores de cada paso son fijos.",
            "reasoning": "mock provider"
        }),
        ChainStep::TopicExtraction => json!({
            "topics": ["economy"],
            "confidence": { "economy": 0.5 },
            "reasoning": "mock provider"
        }),
        ChainStep::ImpactAnalysis => json!({
            "direction": "NEUTRAL",
            "mechanisms": ["sin análisis: proveedor simulado"],
            "confidence": 0.5,
            "time_horizon": "medium-term",
            "reasoning": "mock provider"
        }),
        ChainStep::Ranking => json!({
            "score": 1,
            "category": "Irrelevant",
            "justification": "Respuesta simulada.",
            "trader_action": "monitor",
            "reasoning": "mock provider"
        }),
        ChainStep::DailyAnalysis => json!({
            "most_important_news": {
                "candidate_id": "mock",
                "title": "Sin análisis",
                "reasoning": "Respuesta simulada."
            },
            "daily_context": "Análisis diario simulado; ningún modelo revisó las noticias.",
            "usd_cop_outlook": {
                "direction": "NEUTRAL",
                "confidence": "LOW",
                "explanation": "Proveedor simulado."
            },
            "trader_recommendations": ["Revisar las noticias manualmente."]
        }),
    }
}

#[async_trait]
impl InferenceProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn invoke(&self, request: InferenceRequest) -> Result<InferenceResponse, ProviderError> {
        let payload = self
            .payloads
            .get(&request.step)
            .cloned()
            .unwrap_or_else(|| canned(request.step));
        Ok(InferenceResponse {
            payload,
            prompt_tokens: TokenCount::default(),
            completion_tokens: TokenCount::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(step: ChainStep) -> InferenceRequest {
        InferenceRequest {
            step,
            instruction: String::new(),
            context: json!({}),
            schema: json!({}),
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn answers_are_free_and_repeatable() {
        let mock = MockProvider::new();
        for step in ChainStep::BILLABLE {
            let first = mock.invoke(request(step)).await.unwrap();
            let second = mock.invoke(request(step)).await.unwrap();
            assert_eq!(first, second);
            assert!(first.prompt_tokens.is_zero());
            assert!(first.completion_tokens.is_zero());
        }
    }

    #[tokio::test]
    async fn payloads_can_be_overridden() {
        let mock = MockProvider::new().with_payload(ChainStep::Ranking, json!({"score": 9}));
        let out = mock.invoke(request(ChainStep::Ranking)).await.unwrap();
        assert_eq!(out.payload["score"], 9);
    }
}
