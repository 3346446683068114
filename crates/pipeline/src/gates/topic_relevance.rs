use regex::Regex;

use super::{Gate, GateContext, GateVerdict, TOPIC_RELEVANCE};
use crate::{Candidate, GateName, PipelineError};

/// Number of matched keywords quoted in a passing reason.
const QUOTED_MATCHES: usize = 5;

/// Requires a minimum number of distinct domain keywords in title + body.
///
/// Keywords match case-insensitively on word boundaries; a multi-word keyword
/// tolerates any whitespace run between its words.
#[derive(Debug, Clone)]
pub struct TopicRelevanceGate {
    name: GateName,
    matchers: Vec<(String, Regex)>,
    min_matches: usize,
}

impl TopicRelevanceGate {
    /// Compiles one matcher per non-blank keyword.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ConfigurationError`] if a matcher cannot be built.
    pub fn new(keywords: &[String], min_matches: usize) -> Result<Self, PipelineError> {
        let mut matchers = Vec::with_capacity(keywords.len());
        for keyword in keywords {
            let words: Vec<String> = keyword.split_whitespace().map(regex::escape).collect();
            if words.is_empty() {
                continue;
            }
            let pattern = format!(r"(?i)\b{}\b", words.join(r"\s+"));
            let regex = Regex::new(&pattern).map_err(|e| {
                PipelineError::config(format!("invalid keyword '{keyword}': {e}"))
            })?;
            matchers.push((keyword.trim().to_lowercase(), regex));
        }
        Ok(Self {
            name: GateName::from_static(TOPIC_RELEVANCE),
            matchers,
            min_matches,
        })
    }

    /// Distinct keywords found in `text`, in configuration order.
    pub fn matches<'a>(&'a self, text: &str) -> Vec<&'a str> {
        self.matchers
            .iter()
            .filter(|(_, regex)| regex.is_match(text))
            .map(|(keyword, _)| keyword.as_str())
            .collect()
    }
}

impl Gate for TopicRelevanceGate {
    fn name(&self) -> &GateName {
        &self.name
    }

    fn evaluate(&self, candidate: &Candidate, _ctx: &GateContext<'_>) -> GateVerdict {
        let text = format!("{}\n{}", candidate.title, candidate.body);
        let found = self.matches(&text);
        if found.len() < self.min_matches {
            return GateVerdict::fail(
                &self.name,
                format!(
                    "Insufficient relevant keywords: {} (min: {})",
                    found.len(),
                    self.min_matches
                ),
            );
        }
        let quoted: Vec<&str> = found.iter().take(QUOTED_MATCHES).copied().collect();
        GateVerdict::pass(
            &self.name,
            format!(
                "Found {} relevant keywords (e.g., {})",
                found.len(),
                quoted.join(", ")
            ),
        )
    }
}
