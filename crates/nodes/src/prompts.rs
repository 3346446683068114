//! Step instructions and the JSON shapes each step must return.
//!
//! Instructions are short and provider-agnostic; adapters wrap them with the
//! context and schema in whatever framing their API needs.

use pipeline::{ChainStep, TopicCategory};
use serde_json::{json, Value};

/// Appended after a schema violation.
pub const REFORMAT_NOTICE: &str = "Your previous answer did not match the required JSON \
    shape. Reply with a single JSON object that satisfies the schema exactly, with no \
    surrounding text.";

/// Appended after an empty or unrecognized topic set.
pub const STRICT_TOPICS_NOTICE: &str = "Your previous answer contained no valid topic. You \
    must choose at least one topic, and only from: economy, politics, security, energy, \
    international, monetary.";

/// Base instruction for `step`.
pub fn instruction(step: ChainStep) -> &'static str {
    match step {
        ChainStep::Summarization => {
            "Summarize this Spanish-language news article in 3 to 6 sentences, keeping the \
             facts relevant to the Colombian peso. Explain your reasoning briefly."
        }
        ChainStep::TopicExtraction => {
            "Classify the summarized article into one or more of these topics: economy, \
             politics, security, energy, international, monetary. Give a confidence between \
             0 and 1 for each topic you choose."
        }
        ChainStep::ImpactAnalysis => {
            "Assess the likely impact of this news on the Colombian peso against the US \
             dollar, given the market snapshot. State the direction (POSITIVE means the peso \
             strengthens), the causal mechanisms, your confidence and the time horizon."
        }
        ChainStep::Ranking => {
            "Rank the relevance of this news for a USD/COP trader on a 1 to 5 scale \
             (1 Irrelevant, 2 Low, 3 Moderate, 4 High, 5 Critical), justify the score and \
             recommend an action: monitor, alert or urgent."
        }
        ChainStep::DailyAnalysis => {
            "You are given every processed news item of one day: the score distribution \
             and the highest ranked items in detail. Identify the single most important \
             item for the Colombian peso and explain why, describe the day's economic and \
             political context, give the likely direction of USD/COP over the coming days \
             (STRENGTHENING means the peso strengthens) with your confidence, and list what \
             USD/COP traders should watch."
        }
    }
}

/// Instruction for `step` with optional corrective notices appended.
pub fn instruction_with(step: ChainStep, notices: &[&str]) -> String {
    let mut text = instruction(step).to_string();
    for notice in notices {
        text.push_str("\n\n");
        text.push_str(notice);
    }
    text
}

/// JSON schema the payload of `step` must satisfy.
pub fn schema(step: ChainStep) -> Value {
    match step {
        ChainStep::Summarization => json!({
            "type": "object",
            "required": ["summary", "reasoning"],
            "properties": {
                "summary": { "type": "string" },
                "reasoning": { "type": "string" }
            }
        }),
        ChainStep::TopicExtraction => {
            let topics: Vec<&str> = TopicCategory::ALL.iter().map(|t| t.as_str()).collect();
            json!({
                "type": "object",
                "required": ["topics", "confidence", "reasoning"],
                "properties": {
                    "topics": {
                        "type": "array",
                        "minItems": 1,
                        "items": { "type": "string", "enum": topics }
                    },
                    "confidence": {
                        "type": "object",
                        "additionalProperties": { "type": "number", "minimum": 0, "maximum": 1 }
                    },
                    "reasoning": { "type": "string" }
                }
            })
        }
        ChainStep::ImpactAnalysis => json!({
            "type": "object",
            "required": ["direction", "mechanisms", "confidence", "time_horizon", "reasoning"],
            "properties": {
                "direction": { "type": "string", "enum": ["POSITIVE", "NEGATIVE", "NEUTRAL"] },
                "mechanisms": { "type": "array", "minItems": 1, "items": { "type": "string" } },
                "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
                "time_horizon": {
                    "type": "string",
                    "enum": ["short-term", "medium-term", "long-term"]
                },
                "reasoning": { "type": "string" }
            }
        }),
        ChainStep::Ranking => json!({
            "type": "object",
            "required": ["score", "category", "justification", "trader_action", "reasoning"],
            "properties": {
                "score": { "type": "integer", "minimum": 1, "maximum": 5 },
                "category": {
                    "type": "string",
                    "enum": ["Irrelevant", "Low", "Moderate", "High", "Critical"]
                },
                "justification": { "type": "string" },
                "trader_action": { "type": "string", "enum": ["monitor", "alert", "urgent"] },
                "reasoning": { "type": "string" }
            }
        }),
        ChainStep::DailyAnalysis => json!({
            "type": "object",
            "required": [
                "most_important_news",
                "daily_context",
                "usd_cop_outlook",
                "trader_recommendations"
            ],
            "properties": {
                "most_important_news": {
                    "type": "object",
                    "required": ["candidate_id", "reasoning"],
                    "properties": {
                        "candidate_id": { "type": "string" },
                        "title": { "type": "string" },
                        "reasoning": { "type": "string" }
                    }
                },
                "daily_context": { "type": "string" },
                "usd_cop_outlook": {
                    "type": "object",
                    "required": ["direction", "confidence"],
                    "properties": {
                        "direction": {
                            "type": "string",
                            "enum": ["STRENGTHENING", "WEAKENING", "NEUTRAL"]
                        },
                        "confidence": { "type": "string", "enum": ["HIGH", "MEDIUM", "LOW"] },
                        "explanation": { "type": "string" }
                    }
                },
                "trader_recommendations": {
                    "type": "array",
                    "minItems": 1,
                    "items": { "type": "string" }
                }
            }
        }),
    }
}
