//! Pipeline configuration.
//!
//! Every section deserializes from the `[pipeline.*]` tables of the TOML
//! configuration file and every field has a default, so an empty table is a
//! valid configuration. [`PipelineConfig::validate`] must be called before a
//! run starts; it is the only place thresholds are checked.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{CostCeiling, PipelineError, TokenPrice};

/// Complete configuration of the admission-and-analysis pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Admission gate thresholds.
    #[serde(default)]
    pub gates: GateConfig,

    /// Chain executor retry, timeout and concurrency settings.
    #[serde(default)]
    pub chain: ChainConfig,

    /// Token pricing and the daily spending ceiling.
    #[serde(default)]
    pub cost: CostConfig,

    /// Per-run limits.
    #[serde(default)]
    pub run: RunConfig,

    /// Day-level synthesis after each run.
    #[serde(default)]
    pub daily: DailyConfig,
}

impl PipelineConfig {
    /// Checks every threshold, returning the first problem found.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ConfigurationError`] describing the invalid field.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.gates.validate()?;
        self.chain.validate()?;
        self.cost.validate()?;
        if self.run.max_articles == 0 {
            return Err(PipelineError::config("run.max_articles must be at least 1"));
        }
        if self.daily.top_news == 0 {
            return Err(PipelineError::config("daily.top_news must be at least 1"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Gates
// ---------------------------------------------------------------------------

/// Thresholds for the four admission gates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Minimum body length in characters.
    #[serde(default = "default_min_length")]
    pub min_length: usize,

    /// Maximum body length in characters.
    #[serde(default = "default_max_length")]
    pub max_length: usize,

    /// Minimum fraction of language-bearing tokens that must be Spanish.
    #[serde(default = "default_min_language_ratio")]
    pub min_language_ratio: f64,

    /// Minimum number of distinct domain keywords found in title + body.
    #[serde(default = "default_min_keyword_matches")]
    pub min_keyword_matches: usize,

    /// Domain keywords, matched case-insensitively on word boundaries.
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,

    /// Normalized title similarity above which a candidate is a duplicate.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// Maximum article age, in hours, at evaluation time.
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_length: default_min_length(),
            max_length: default_max_length(),
            min_language_ratio: default_min_language_ratio(),
            min_keyword_matches: default_min_keyword_matches(),
            keywords: default_keywords(),
            similarity_threshold: default_similarity_threshold(),
            max_age_hours: default_max_age_hours(),
        }
    }
}

impl GateConfig {
    pub(crate) fn validate(&self) -> Result<(), PipelineError> {
        if self.min_length > self.max_length {
            return Err(PipelineError::config(format!(
                "gates.min_length ({}) exceeds gates.max_length ({})",
                self.min_length, self.max_length
            )));
        }
        if !unit_interval(self.min_language_ratio) {
            return Err(PipelineError::config(
                "gates.min_language_ratio must be within [0, 1]",
            ));
        }
        if !unit_interval(self.similarity_threshold) {
            return Err(PipelineError::config(
                "gates.similarity_threshold must be within [0, 1]",
            ));
        }
        if !(self.max_age_hours.is_finite() && self.max_age_hours > 0.0) {
            return Err(PipelineError::config("gates.max_age_hours must be positive"));
        }
        if self.min_keyword_matches == 0 {
            return Err(PipelineError::config(
                "gates.min_keyword_matches must be at least 1",
            ));
        }
        if self.keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(PipelineError::config("gates.keywords must not be empty"));
        }
        Ok(())
    }
}

fn unit_interval(v: f64) -> bool {
    v.is_finite() && (0.0..=1.0).contains(&v)
}

fn default_min_length() -> usize {
    200
}
fn default_max_length() -> usize {
    50_000
}
fn default_min_language_ratio() -> f64 {
    0.8
}
fn default_min_keyword_matches() -> usize {
    2
}
fn default_similarity_threshold() -> f64 {
    0.9
}
fn default_max_age_hours() -> f64 {
    48.0
}

/// Keywords relevant to the Colombian peso, grouped by topic for readability.
fn default_keywords() -> Vec<String> {
    const ECONOMY: &[&str] = &[
        "economía", "económico", "dólar", "peso", "inflación", "banco", "comercio",
        "inversión", "pib", "crecimiento", "fiscal", "tributaria", "empleo", "desempleo",
        "salario", "importación", "exportación", "deuda", "déficit", "superávit", "mercado",
        "bolsa", "acciones",
    ];
    const POLITICS: &[&str] = &[
        "gobierno", "petro", "congreso", "reforma", "ley", "ministro", "presidente",
        "política", "elecciones", "votación", "senado", "cámara", "decreto", "acuerdo",
        "negociación", "coalición",
    ];
    const SECURITY: &[&str] = &[
        "conflicto", "farc", "eln", "seguridad", "violencia", "militar", "policía",
        "guerrilla", "disidencia", "ataque", "atentado", "secuestro", "narcotráfico",
        "droga", "paz", "acuerdo de paz",
    ];
    const ENERGY: &[&str] = &[
        "petróleo", "ecopetrol", "energía", "carbón", "gas", "crudo", "barril",
        "exploración", "producción", "refinería", "oleoducto", "fracking", "yacimiento",
        "reservas", "opep", "wti", "brent",
    ];
    const INTERNATIONAL: &[&str] = &[
        "venezuela", "ecuador", "brasil", "estados unidos", "china", "tratado",
        "acuerdo comercial", "otan", "onu", "frontera", "migración", "diplomacia",
        "embajada", "trump",
    ];
    const MONETARY: &[&str] = &[
        "banco de la república", "banrep", "tasa de interés", "tasa de cambio",
        "tipo de cambio", "política monetaria", "emisión", "reservas internacionales",
        "devaluación", "revaluación", "intervención cambiaria", "junta directiva",
    ];

    let mut keywords: Vec<String> = Vec::new();
    for group in [ECONOMY, POLITICS, SECURITY, ENERGY, INTERNATIONAL, MONETARY] {
        for kw in group {
            if !keywords.iter().any(|k| k == kw) {
                keywords.push((*kw).to_string());
            }
        }
    }
    keywords
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// Retry, timeout and concurrency settings for the chain executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Total attempts (first call included) for transient provider errors.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Back-off before the first transient retry, in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Factor applied to the back-off after every transient retry.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: u32,

    /// Upper bound for any single back-off, in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Extra attempts with a reformat instruction after a schema violation.
    #[serde(default = "default_one")]
    pub schema_retries: u32,

    /// Extra attempts with a stricter instruction after an empty topic set.
    #[serde(default = "default_one")]
    pub empty_topic_retries: u32,

    /// Timeout applied to every single provider call, in seconds.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Fewest sentences accepted in a step-one summary.
    #[serde(default = "default_min_summary_sentences")]
    pub min_summary_sentences: usize,

    /// Most sentences accepted in a step-one summary.
    #[serde(default = "default_max_summary_sentences")]
    pub max_summary_sentences: usize,

    /// Maximum number of candidate chains executing at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
            schema_retries: default_one(),
            empty_topic_retries: default_one(),
            call_timeout_secs: default_call_timeout_secs(),
            min_summary_sentences: default_min_summary_sentences(),
            max_summary_sentences: default_max_summary_sentences(),
            concurrency: default_concurrency(),
        }
    }
}

impl ChainConfig {
    /// Back-off before the first transient retry.
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    /// Upper bound for a single back-off.
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Timeout applied to every provider call.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub(crate) fn validate(&self) -> Result<(), PipelineError> {
        if self.max_attempts == 0 {
            return Err(PipelineError::config("chain.max_attempts must be at least 1"));
        }
        if self.backoff_multiplier == 0 {
            return Err(PipelineError::config(
                "chain.backoff_multiplier must be at least 1",
            ));
        }
        if self.call_timeout_secs == 0 {
            return Err(PipelineError::config(
                "chain.call_timeout_secs must be at least 1",
            ));
        }
        if self.concurrency == 0 {
            return Err(PipelineError::config("chain.concurrency must be at least 1"));
        }
        if self.min_summary_sentences == 0
            || self.min_summary_sentences > self.max_summary_sentences
        {
            return Err(PipelineError::config(
                "chain summary sentence range must be non-empty and start at 1 or more",
            ));
        }
        Ok(())
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    1_000
}
fn default_backoff_multiplier() -> u32 {
    2
}
fn default_max_backoff_ms() -> u64 {
    30_000
}
fn default_one() -> u32 {
    1
}
fn default_call_timeout_secs() -> u64 {
    60
}
fn default_min_summary_sentences() -> usize {
    3
}
fn default_max_summary_sentences() -> usize {
    6
}
fn default_concurrency() -> usize {
    4
}

// ---------------------------------------------------------------------------
// Cost
// ---------------------------------------------------------------------------

/// Token pricing and the advisory daily ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostConfig {
    /// USD per million prompt tokens.
    #[serde(default = "default_prompt_price")]
    pub prompt_price_per_million: Decimal,

    /// USD per million completion tokens.
    #[serde(default = "default_completion_price")]
    pub completion_price_per_million: Decimal,

    /// Daily spend above which the threshold signal is raised.
    #[serde(default = "default_daily_ceiling")]
    pub daily_ceiling_usd: Decimal,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            prompt_price_per_million: default_prompt_price(),
            completion_price_per_million: default_completion_price(),
            daily_ceiling_usd: default_daily_ceiling(),
        }
    }
}

impl CostConfig {
    /// The configured per-token prices.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ConfigurationError`] if a price is negative.
    pub fn price(&self) -> Result<TokenPrice, PipelineError> {
        TokenPrice::new(
            self.prompt_price_per_million,
            self.completion_price_per_million,
        )
        .ok_or_else(|| PipelineError::config("cost prices must not be negative"))
    }

    /// The configured daily ceiling.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ConfigurationError`] if the ceiling is not positive.
    pub fn ceiling(&self) -> Result<CostCeiling, PipelineError> {
        CostCeiling::new(self.daily_ceiling_usd)
            .ok_or_else(|| PipelineError::config("cost.daily_ceiling_usd must be positive"))
    }

    pub(crate) fn validate(&self) -> Result<(), PipelineError> {
        self.price()?;
        self.ceiling()?;
        Ok(())
    }
}

fn default_prompt_price() -> Decimal {
    Decimal::from(3)
}
fn default_completion_price() -> Decimal {
    Decimal::from(15)
}
fn default_daily_ceiling() -> Decimal {
    Decimal::from(10)
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Per-run limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Maximum number of articles requested from the article source.
    #[serde(default = "default_max_articles")]
    pub max_articles: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_articles: default_max_articles(),
        }
    }
}

fn default_max_articles() -> usize {
    100
}

// ---------------------------------------------------------------------------
// Daily analysis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyConfig {
    /// Run the synthesis after every run that is not cancelled.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Highest-ranked records presented in detail.
    #[serde(default = "default_top_news")]
    pub top_news: usize,
}

impl Default for DailyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            top_news: default_top_news(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_top_news() -> usize {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.gates.min_length, 200);
        assert_eq!(config.gates.min_keyword_matches, 2);
        assert_eq!(config.gates.max_age_hours, 48.0);
        assert_eq!(config.chain.max_attempts, 3);
    }

    #[test]
    fn default_keywords_cover_the_monetary_vocabulary() {
        let keywords = default_keywords();
        assert!(keywords.iter().any(|k| k == "banco de la república"));
        assert!(keywords.iter().any(|k| k == "tasa de cambio"));
        let mut sorted = keywords.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), keywords.len(), "keywords must be unique");
    }

    #[test]
    fn invalid_ratios_are_rejected() {
        let mut config = PipelineConfig::default();
        config.gates.min_language_ratio = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("min_language_ratio"));
    }

    #[test]
    fn inverted_length_bounds_are_rejected() {
        let mut config = PipelineConfig::default();
        config.gates.min_length = 10_000;
        config.gates.max_length = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut config = PipelineConfig::default();
        config.chain.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_positive_ceiling_is_rejected() {
        let mut config = PipelineConfig::default();
        config.cost.daily_ceiling_usd = Decimal::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_top_news_is_rejected() {
        let mut config = PipelineConfig::default();
        assert!(config.daily.enabled);
        config.daily.top_news = 0;
        assert!(config.validate().unwrap_err().to_string().contains("top_news"));
    }

    #[test]
    fn partial_tables_fill_in_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"gates": {"min_length": 300}}"#).unwrap();
        assert_eq!(config.gates.min_length, 300);
        assert_eq!(config.gates.max_length, 50_000);
        assert_eq!(config.chain, ChainConfig::default());
    }
}
