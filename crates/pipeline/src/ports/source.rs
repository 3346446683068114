//! Article Source and Market Snapshot ports.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::{RawArticle, Timestamp};

/// Failure of a data source. Never fatal on its own.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum SourceError {
    /// The source could not be reached or read.
    #[error("source unavailable: {message}")]
    Unavailable { message: String },

    /// The source was reached but its content could not be decoded.
    #[error("source content malformed: {message}")]
    Malformed { message: String },
}

/// Yields raw article records.
#[async_trait]
pub trait ArticleSource: Send + Sync {
    /// Returns at most `limit` records; fewer (or none) is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the source cannot be read at all.
    async fn fetch(&self, limit: usize) -> Result<Vec<RawArticle>, SourceError>;
}

/// Market indicator values as of one instant. Any value may be unavailable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub taken_at: Timestamp,
    /// USD/COP exchange rate.
    pub exchange_rate: Option<f64>,
    /// Reference commodity (crude oil) price in USD.
    pub commodity_price: Option<f64>,
    pub dollar_index: Option<f64>,
    pub volatility_index: Option<f64>,
}

impl MarketSnapshot {
    /// A snapshot with every indicator unavailable.
    pub fn unavailable(taken_at: Timestamp) -> Self {
        Self {
            taken_at,
            exchange_rate: None,
            commodity_price: None,
            dollar_index: None,
            volatility_index: None,
        }
    }

    /// Indicator names and values in a fixed order.
    pub fn indicators(&self) -> [(&'static str, Option<f64>); 4] {
        [
            ("exchange_rate", self.exchange_rate),
            ("commodity_price", self.commodity_price),
            ("dollar_index", self.dollar_index),
            ("volatility_index", self.volatility_index),
        ]
    }

    /// Renders the snapshot for an instruction context; missing or non-finite
    /// values become `"unavailable"`.
    pub fn to_context(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (name, value) in self.indicators() {
            let rendered = match value {
                Some(v) if v.is_finite() => json!(v),
                _ => json!("unavailable"),
            };
            map.insert(name.to_string(), rendered);
        }
        map.insert("as_of".into(), json!(self.taken_at.to_string()));
        Value::Object(map)
    }
}

/// Yields the current market snapshot.
#[async_trait]
pub trait MarketSnapshotSource: Send + Sync {
    /// # Errors
    ///
    /// Returns [`SourceError`] if no snapshot can be produced at all.
    async fn snapshot(&self) -> Result<MarketSnapshot, SourceError>;
}
