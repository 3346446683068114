//! Market snapshot source over a scraper output file.
//!
//! Accepts a flat object (`{"exchange_rate": 4120.5, ...}`) or the scraper's
//! nested form (`{"indicators": {"usd_cop": {"value": 4120.5}, ...}}`).
//! Missing, null or non-numeric values become unavailable.

use std::path::PathBuf;

use async_trait::async_trait;
use pipeline::candidate::parse_timestamp;
use pipeline::{MarketSnapshot, MarketSnapshotSource, SourceError, Timestamp};
use serde_json::Value;
use tracing::debug;

const EXCHANGE_RATE: &[&str] = &["exchange_rate", "usd_cop"];
const COMMODITY_PRICE: &[&str] = &["commodity_price", "petroleo_brent", "brent"];
const DOLLAR_INDEX: &[&str] = &["dollar_index", "dxy"];
const VOLATILITY_INDEX: &[&str] = &["volatility_index", "vix"];

/// [`MarketSnapshotSource`] reading a JSON file on every call.
#[derive(Debug, Clone)]
pub struct JsonFileMarketSource {
    path: PathBuf,
}

impl JsonFileMarketSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

fn indicator(root: &Value, names: &[&str]) -> Option<f64> {
    names.iter().find_map(|name| {
        let value = root
            .get(name)
            .or_else(|| root.get("indicators").and_then(|i| i.get(name)))?;
        let number = match value {
            Value::Object(fields) => fields.get("value").and_then(Value::as_f64),
            other => other.as_f64(),
        };
        number.filter(|v| v.is_finite())
    })
}

/// Parses file content; `fallback_time` is used when the file carries no
/// readable `timestamp`.
pub fn parse_snapshot(content: &str, fallback_time: Timestamp) -> Result<MarketSnapshot, SourceError> {
    let root: Value = serde_json::from_str(content).map_err(|e| SourceError::Malformed {
        message: e.to_string(),
    })?;
    if !root.is_object() {
        return Err(SourceError::Malformed {
            message: "market snapshot is not a JSON object".into(),
        });
    }
    let taken_at = root
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
        .unwrap_or(fallback_time);
    Ok(MarketSnapshot {
        taken_at,
        exchange_rate: indicator(&root, EXCHANGE_RATE),
        commodity_price: indicator(&root, COMMODITY_PRICE),
        dollar_index: indicator(&root, DOLLAR_INDEX),
        volatility_index: indicator(&root, VOLATILITY_INDEX),
    })
}

#[async_trait]
impl MarketSnapshotSource for JsonFileMarketSource {
    async fn snapshot(&self) -> Result<MarketSnapshot, SourceError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| SourceError::Unavailable {
                message: format!("{}: {e}", self.path.display()),
            })?;
        let snapshot = parse_snapshot(&content, Timestamp::now())?;
        debug!(
            path = %self.path.display(),
            available = snapshot.indicators().iter().filter(|(_, v)| v.is_some()).count(),
            "market snapshot read"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_snapshots() {
        let snap = parse_snapshot(
            r#"{"timestamp": "2026-10-16T13:00:00Z", "exchange_rate": 4120.5, "dxy": 104.2}"#,
            Timestamp::now(),
        )
        .unwrap();
        assert_eq!(snap.exchange_rate, Some(4120.5));
        assert_eq!(snap.dollar_index, Some(104.2));
        assert_eq!(snap.commodity_price, None);
        assert_eq!(snap.taken_at.to_string(), "2026-10-16T13:00:00+00:00");
    }

    #[test]
    fn nested_scraper_snapshots() {
        let snap = parse_snapshot(
            r#"{"indicators": {
                "usd_cop": {"value": 4098.0, "symbol": "COP=X"},
                "petroleo_brent": {"value": 81.3},
                "vix": {"value": null, "error": "timeout"}
            }}"#,
            Timestamp::now(),
        )
        .unwrap();
        assert_eq!(snap.exchange_rate, Some(4098.0));
        assert_eq!(snap.commodity_price, Some(81.3));
        assert_eq!(snap.volatility_index, None);
    }

    #[test]
    fn non_objects_are_malformed() {
        assert!(matches!(
            parse_snapshot("[1, 2]", Timestamp::now()),
            Err(SourceError::Malformed { .. })
        ));
    }
}
