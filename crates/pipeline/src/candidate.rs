//! Candidate normalization.
//!
//! Turns a [`RawArticle`] handed over by an article source into the immutable
//! [`Candidate`] every downstream stage references. Normalization never
//! retries: malformed input is a permanent, per-article rejection.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::{CandidateId, SourceName, Timestamp};

/// A raw article record as yielded by an article source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawArticle {
    /// Headline as scraped.
    pub title: String,
    /// Article text as scraped.
    pub body: String,
    /// Publication time in any supported textual format.
    pub timestamp: String,
    /// Outlet identifier.
    #[serde(default)]
    pub source: String,
    /// Canonical article URL, if known.
    #[serde(default)]
    pub url: String,
}

/// One normalized news item.
///
/// Created once per raw input and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Content hash of the normalized title and body.
    pub id: CandidateId,
    /// Trimmed headline.
    pub title: String,
    /// Trimmed article text.
    pub body: String,
    /// Absolute publication time.
    pub published_at: Timestamp,
    /// Outlet identifier.
    pub source: SourceName,
    /// Canonical article URL (may be empty).
    pub url: String,
    /// Body length in characters.
    pub content_length: usize,
}

/// Reasons a raw article cannot become a [`Candidate`].
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum MalformedInputError {
    /// The title is empty after trimming.
    #[error("title is empty")]
    EmptyTitle,

    /// The body is empty after trimming.
    #[error("body is empty")]
    EmptyBody,

    /// The timestamp matches none of the accepted formats.
    #[error("unparsable timestamp '{value}'")]
    UnparsableTimestamp {
        /// The offending value, as received.
        value: String,
    },
}

/// Normalizes a raw article.
///
/// # Errors
///
/// Returns [`MalformedInputError`] when the title or body is empty after
/// trimming or the timestamp cannot be parsed.
pub fn normalize(raw: &RawArticle) -> Result<Candidate, MalformedInputError> {
    let title = raw.title.trim();
    if title.is_empty() {
        return Err(MalformedInputError::EmptyTitle);
    }
    let body = raw.body.trim();
    if body.is_empty() {
        return Err(MalformedInputError::EmptyBody);
    }
    let published_at = parse_timestamp(&raw.timestamp).ok_or_else(|| {
        MalformedInputError::UnparsableTimestamp {
            value: raw.timestamp.clone(),
        }
    })?;

    let source = SourceName::new(raw.source.trim()).unwrap_or_else(SourceName::unknown);

    Ok(Candidate {
        id: content_id(title, body),
        title: title.to_string(),
        body: body.to_string(),
        published_at,
        source,
        url: raw.url.trim().to_string(),
        content_length: body.chars().count(),
    })
}

/// Lower-cases text and collapses every whitespace run to a single space.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Computes the stable content id of a title/body pair.
pub fn content_id(title: &str, body: &str) -> CandidateId {
    let normalized = normalize_text(&format!("{title} {body}"));
    let digest = Sha256::digest(normalized.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    CandidateId::from_digest(hex)
}

/// Parses RFC 3339, RFC 2822, naive `YYYY-MM-DD[ T]HH:MM:SS` (taken as UTC)
/// and bare `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_timestamp(value: &str) -> Option<Timestamp> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(Timestamp::from_utc(dt.with_timezone(&Utc)));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(Timestamp::from_utc(dt.with_timezone(&Utc)));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(Timestamp::from_utc(naive.and_utc()));
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Timestamp::from_utc(naive.and_utc()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw(title: &str, body: &str, timestamp: &str) -> RawArticle {
        RawArticle {
            title: title.into(),
            body: body.into(),
            timestamp: timestamp.into(),
            source: "cnn_colombia".into(),
            url: "https://example.com/2026/10/16/nota".into(),
        }
    }

    #[test]
    fn trims_and_measures_the_body() {
        let c = normalize(&raw("  Título  ", "  Cuerpo de la nota  ", "2026-10-16")).unwrap();
        assert_eq!(c.title, "Título");
        assert_eq!(c.body, "Cuerpo de la nota");
        assert_eq!(c.content_length, 17);
        assert_eq!(c.source.as_str(), "cnn_colombia");
    }

    #[test]
    fn id_ignores_case_and_whitespace_layout() {
        let a = normalize(&raw("El Dólar Sube", "Texto  de\nla nota", "2026-10-16")).unwrap();
        let b = normalize(&raw("el dólar sube", "texto de la   nota", "2026-10-15")).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.id.as_str().len(), 64);
    }

    #[test]
    fn different_content_yields_different_ids() {
        let a = content_id("uno", "dos");
        let b = content_id("uno", "tres");
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_blank_fields() {
        assert_eq!(
            normalize(&raw("   ", "cuerpo", "2026-10-16")),
            Err(MalformedInputError::EmptyTitle)
        );
        assert_eq!(
            normalize(&raw("título", "\n\t", "2026-10-16")),
            Err(MalformedInputError::EmptyBody)
        );
    }

    #[test]
    fn rejects_unparsable_timestamps() {
        let err = normalize(&raw("título", "cuerpo", "ayer por la tarde")).unwrap_err();
        assert!(matches!(err, MalformedInputError::UnparsableTimestamp { .. }));
        assert!(normalize(&raw("título", "cuerpo", "")).is_err());
    }

    #[test]
    fn missing_source_is_recorded_as_unknown() {
        let mut r = raw("título", "cuerpo", "2026-10-16");
        r.source = "  ".into();
        assert_eq!(normalize(&r).unwrap().source.as_str(), "unknown");
    }

    #[test]
    fn accepts_the_common_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2026, 10, 16, 8, 30, 0).unwrap();
        for value in [
            "2026-10-16T08:30:00Z",
            "2026-10-16T03:30:00-05:00",
            "Fri, 16 Oct 2026 08:30:00 +0000",
            "2026-10-16 08:30:00",
            "2026-10-16T08:30:00",
        ] {
            assert_eq!(
                parse_timestamp(value).map(Timestamp::as_datetime),
                Some(expected),
                "{value}"
            );
        }
        assert_eq!(
            parse_timestamp("2026-10-16").map(Timestamp::as_datetime),
            Some(Utc.with_ymd_and_hms(2026, 10, 16, 0, 0, 0).unwrap())
        );
    }
}
