//! Validation of step payloads into typed outputs.
//!
//! A payload either becomes the step's output or a [`PayloadError`] telling
//! the executor which corrective path applies.

use std::collections::{BTreeMap, BTreeSet};

use pipeline::{
    Confidence, DailyAnalysisOutput, HeadlineItem, ImpactDirection, ImpactOutput,
    OutlookConfidence, OutlookDirection, PesoOutlook, RankCategory, RankScore, RankingOutput,
    SummaryOutput, TimeHorizon, TopicCategory, TopicsOutput, TraderAction,
};
use serde_json::Value;

/// Why a payload was not accepted.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PayloadError {
    /// The payload does not have the step's shape.
    Schema(String),
    /// No recognized topic was returned.
    EmptyTopics,
    /// The rank score is an integer outside `[1, 5]`.
    ScoreOutOfRange(i64),
}

type Parsed<T> = Result<T, PayloadError>;

fn schema(message: impl Into<String>) -> PayloadError {
    PayloadError::Schema(message.into())
}

fn object(payload: &Value) -> Parsed<&serde_json::Map<String, Value>> {
    payload
        .as_object()
        .ok_or_else(|| schema("payload is not a JSON object"))
}

fn required_str<'a>(map: &'a serde_json::Map<String, Value>, field: &str) -> Parsed<&'a str> {
    match map.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim()),
        Some(Value::String(_)) => Err(schema(format!("'{field}' is empty"))),
        Some(_) => Err(schema(format!("'{field}' is not a string"))),
        None => Err(schema(format!("'{field}' is missing"))),
    }
}

fn optional_str(map: &serde_json::Map<String, Value>, field: &str) -> String {
    map.get(field)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn nested<'a>(
    map: &'a serde_json::Map<String, Value>,
    field: &str,
) -> Parsed<&'a serde_json::Map<String, Value>> {
    match map.get(field) {
        Some(Value::Object(inner)) => Ok(inner),
        Some(_) => Err(schema(format!("'{field}' is not an object"))),
        None => Err(schema(format!("'{field}' is missing"))),
    }
}

fn string_list(map: &serde_json::Map<String, Value>, field: &str) -> Parsed<Vec<String>> {
    let items = match map.get(field) {
        Some(Value::Array(items)) => items,
        Some(_) => return Err(schema(format!("'{field}' is not an array"))),
        None => return Err(schema(format!("'{field}' is missing"))),
    };
    let values: Vec<String> = items
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if values.is_empty() {
        return Err(schema(format!("'{field}' is empty")));
    }
    Ok(values)
}

fn confidence(value: &Value, field: &str) -> Parsed<Confidence> {
    value
        .as_f64()
        .and_then(Confidence::new)
        .ok_or_else(|| schema(format!("'{field}' must be a number in [0, 1]")))
}

/// Counts sentences: runs ending in `.`, `!` or `?` followed by whitespace or
/// the end of text, plus a trailing unterminated run. Runs without any
/// alphanumeric character are ignored.
pub(crate) fn count_sentences(text: &str) -> usize {
    let mut count = 0;
    let mut has_content = false;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_alphanumeric() {
            has_content = true;
        }
        let terminal = matches!(c, '.' | '!' | '?')
            && chars.peek().map_or(true, |next| next.is_whitespace());
        if terminal && has_content {
            count += 1;
            has_content = false;
        }
    }
    if has_content {
        count += 1;
    }
    count
}

pub(crate) fn summary(
    payload: &Value,
    sentences: std::ops::RangeInclusive<usize>,
) -> Parsed<SummaryOutput> {
    let map = object(payload)?;
    let summary = required_str(map, "summary")?;
    let count = count_sentences(summary);
    if !sentences.contains(&count) {
        return Err(schema(format!(
            "summary has {count} sentence(s), expected {} to {}",
            sentences.start(),
            sentences.end()
        )));
    }
    Ok(SummaryOutput {
        summary: summary.to_string(),
        cot: optional_str(map, "reasoning"),
    })
}

/// Unknown topic names are dropped; an empty remainder is
/// [`PayloadError::EmptyTopics`]. `confidence` may be one number applied to
/// every topic or an object keyed by topic.
pub(crate) fn topics(payload: &Value) -> Parsed<TopicsOutput> {
    let map = object(payload)?;
    let raw = match map.get("topics") {
        Some(Value::Array(items)) => items,
        Some(_) => return Err(schema("'topics' is not an array")),
        None => return Err(schema("'topics' is missing")),
    };
    let topics: BTreeSet<TopicCategory> = raw
        .iter()
        .filter_map(Value::as_str)
        .filter_map(TopicCategory::parse)
        .collect();
    if topics.is_empty() {
        return Err(PayloadError::EmptyTopics);
    }

    let mut confidences = BTreeMap::new();
    match map.get("confidence") {
        Some(Value::Object(per_topic)) => {
            let by_topic: BTreeMap<TopicCategory, &Value> = per_topic
                .iter()
                .filter_map(|(k, v)| TopicCategory::parse(k).map(|t| (t, v)))
                .collect();
            for topic in &topics {
                let value = by_topic.get(topic).ok_or_else(|| {
                    schema(format!("'confidence' has no entry for '{topic}'"))
                })?;
                confidences.insert(*topic, confidence(value, "confidence")?);
            }
        }
        Some(single @ Value::Number(_)) => {
            let shared = confidence(single, "confidence")?;
            for topic in &topics {
                confidences.insert(*topic, shared);
            }
        }
        Some(_) => return Err(schema("'confidence' must be a number or an object")),
        None => return Err(schema("'confidence' is missing")),
    }

    Ok(TopicsOutput {
        topics,
        confidence: confidences,
        cot: optional_str(map, "reasoning"),
    })
}

/// A missing or unrecognized time horizon falls back to medium-term.
pub(crate) fn impact(payload: &Value) -> Parsed<ImpactOutput> {
    let map = object(payload)?;
    let direction_raw = required_str(map, "direction")?;
    let direction = ImpactDirection::parse(direction_raw)
        .ok_or_else(|| schema(format!("unknown direction '{direction_raw}'")))?;

    let mechanisms = string_list(map, "mechanisms")?;

    let confidence = match map.get("confidence") {
        Some(value) => confidence(value, "confidence")?,
        None => return Err(schema("'confidence' is missing")),
    };
    let time_horizon = map
        .get("time_horizon")
        .and_then(Value::as_str)
        .and_then(TimeHorizon::parse)
        .unwrap_or_default();

    Ok(ImpactOutput {
        direction,
        mechanisms,
        confidence,
        time_horizon,
        cot: optional_str(map, "reasoning"),
    })
}

/// The score must be an integer in `[1, 5]`; it is never clamped. Missing or
/// unrecognized category and action labels are derived from the score.
pub(crate) fn ranking(payload: &Value) -> Parsed<RankingOutput> {
    let map = object(payload)?;
    let value = map
        .get("score")
        .ok_or_else(|| schema("'score' is missing"))?;
    let raw = match (value.as_i64(), value.as_f64()) {
        (Some(n), _) => n,
        (None, Some(f)) if f.is_finite() && f.fract() == 0.0 => f as i64,
        _ => return Err(schema("'score' is not an integer")),
    };
    let score = RankScore::new(raw).ok_or(PayloadError::ScoreOutOfRange(raw))?;

    let category = map
        .get("category")
        .and_then(Value::as_str)
        .and_then(RankCategory::parse)
        .unwrap_or_else(|| RankCategory::from_score(score));
    let trader_action = map
        .get("trader_action")
        .and_then(Value::as_str)
        .and_then(TraderAction::parse)
        .unwrap_or_else(|| TraderAction::from_score(score));

    Ok(RankingOutput {
        score,
        category,
        justification: optional_str(map, "justification"),
        trader_action,
        cot: optional_str(map, "reasoning"),
    })
}

/// Outlook direction and confidence must be recognized labels; the headline
/// title and the outlook explanation may be left out.
pub(crate) fn daily(payload: &Value) -> Parsed<DailyAnalysisOutput> {
    let map = object(payload)?;

    let headline = nested(map, "most_important_news")?;
    let most_important = HeadlineItem {
        candidate_id: required_str(headline, "candidate_id")?.to_string(),
        title: optional_str(headline, "title"),
        reasoning: required_str(headline, "reasoning")?.to_string(),
    };

    let outlook = nested(map, "usd_cop_outlook")?;
    let direction_raw = required_str(outlook, "direction")?;
    let direction = OutlookDirection::parse(direction_raw)
        .ok_or_else(|| schema(format!("unknown outlook direction '{direction_raw}'")))?;
    let confidence_raw = required_str(outlook, "confidence")?;
    let confidence = OutlookConfidence::parse(confidence_raw)
        .ok_or_else(|| schema(format!("unknown outlook confidence '{confidence_raw}'")))?;

    Ok(DailyAnalysisOutput {
        most_important,
        daily_context: required_str(map, "daily_context")?.to_string(),
        outlook: PesoOutlook {
            direction,
            confidence,
            explanation: optional_str(outlook, "explanation"),
        },
        trader_recommendations: string_list(map, "trader_recommendations")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sentence_counting() {
        assert_eq!(count_sentences("Uno. Dos! ¿Tres? Cuatro"), 4);
        assert_eq!(count_sentences("La tasa subió a 9.25% hoy. Fin."), 2);
        assert_eq!(count_sentences("..."), 0);
        assert_eq!(count_sentences(""), 0);
    }

    #[test]
    fn summaries_must_have_three_to_six_sentences() {
        let ok = json!({"summary": "Uno. Dos. Tres.", "reasoning": "r"});
        assert_eq!(summary(&ok, 3..=6).unwrap().cot, "r");

        let short = json!({"summary": "Solo una frase."});
        assert!(matches!(summary(&short, 3..=6), Err(PayloadError::Schema(_))));

        let long = json!({"summary": "1a. 2b. 3c. 4d. 5e. 6f. 7g."});
        assert!(matches!(summary(&long, 3..=6), Err(PayloadError::Schema(_))));
    }

    #[test]
    fn unknown_topics_are_ignored() {
        let payload = json!({
            "topics": ["economy", "sports", "Monetary"],
            "confidence": {"economy": 0.9, "monetary": 0.6, "sports": 1.0}
        });
        let out = topics(&payload).unwrap();
        assert_eq!(out.topics.len(), 2);
        assert_eq!(out.confidence[&TopicCategory::Monetary].as_f64(), 0.6);
    }

    #[test]
    fn only_unknown_topics_is_an_empty_set() {
        let payload = json!({"topics": ["sports"], "confidence": 0.5});
        assert_eq!(topics(&payload), Err(PayloadError::EmptyTopics));
    }

    #[test]
    fn a_single_confidence_applies_to_every_topic() {
        let payload = json!({"topics": ["energy", "economy"], "confidence": 0.7});
        let out = topics(&payload).unwrap();
        assert!(out.confidence.values().all(|c| c.as_f64() == 0.7));
    }

    #[test]
    fn topic_confidence_must_be_in_range() {
        let payload = json!({"topics": ["energy"], "confidence": {"energy": 1.4}});
        assert!(matches!(topics(&payload), Err(PayloadError::Schema(_))));
    }

    #[test]
    fn impact_requires_mechanisms() {
        let payload = json!({"direction": "NEGATIVE", "mechanisms": [], "confidence": 0.5});
        assert!(matches!(impact(&payload), Err(PayloadError::Schema(_))));
    }

    #[test]
    fn impact_horizon_defaults_to_medium_term() {
        let payload = json!({
            "direction": "positive",
            "mechanisms": ["entrada de capitales"],
            "confidence": 0.8,
            "time_horizon": "someday"
        });
        let out = impact(&payload).unwrap();
        assert_eq!(out.direction, ImpactDirection::Positive);
        assert_eq!(out.time_horizon, TimeHorizon::MediumTerm);
    }

    #[test]
    fn out_of_range_scores_are_not_clamped() {
        let payload = json!({"score": 7, "category": "Critical"});
        assert_eq!(ranking(&payload), Err(PayloadError::ScoreOutOfRange(7)));
        let payload = json!({"score": 0});
        assert_eq!(ranking(&payload), Err(PayloadError::ScoreOutOfRange(0)));
    }

    #[test]
    fn fractional_scores_are_schema_violations() {
        let payload = json!({"score": 3.5});
        assert!(matches!(ranking(&payload), Err(PayloadError::Schema(_))));
    }

    #[test]
    fn missing_labels_are_derived_from_the_score() {
        let payload = json!({"score": 5.0, "category": "???", "justification": "j"});
        let out = ranking(&payload).unwrap();
        assert_eq!(out.score.as_u8(), 5);
        assert_eq!(out.category, RankCategory::Critical);
        assert_eq!(out.trader_action, TraderAction::Urgent);
    }

    fn daily_payload() -> Value {
        json!({
            "most_important_news": {
                "candidate_id": "abc",
                "title": "Banco de la República recorta tasas",
                "reasoning": "Cambia el diferencial de tasas."
            },
            "daily_context": "Jornada dominada por la política monetaria.",
            "usd_cop_outlook": {"direction": "weakening", "confidence": "MEDIUM"},
            "trader_recommendations": ["Vigilar el diferencial", "  "]
        })
    }

    #[test]
    fn daily_analysis_payloads_are_validated() {
        let out = daily(&daily_payload()).unwrap();
        assert_eq!(out.most_important.candidate_id, "abc");
        assert_eq!(out.outlook.direction, OutlookDirection::Weakening);
        assert_eq!(out.outlook.confidence, OutlookConfidence::Medium);
        assert!(out.outlook.explanation.is_empty());
        assert_eq!(out.trader_recommendations, ["Vigilar el diferencial"]);
    }

    #[test]
    fn daily_analysis_rejects_unknown_outlooks_and_empty_advice() {
        let mut payload = daily_payload();
        payload["usd_cop_outlook"]["direction"] = json!("sideways");
        assert!(matches!(daily(&payload), Err(PayloadError::Schema(_))));

        let mut payload = daily_payload();
        payload["trader_recommendations"] = json!([]);
        assert!(matches!(daily(&payload), Err(PayloadError::Schema(_))));

        let mut payload = daily_payload();
        payload["most_important_news"] = json!("abc");
        assert!(matches!(daily(&payload), Err(PayloadError::Schema(_))));
    }
}
