//! Article source over a scraper output file.
//!
//! The file is either a JSON array of article objects or JSON lines, one
//! object per line. Field names follow [`RawArticle`]; the scraper's
//! `content`, `published_at` and `scraped_at` names are accepted too.

use std::path::PathBuf;

use async_trait::async_trait;
use pipeline::{ArticleSource, RawArticle, SourceError};
use serde::Deserialize;
use tracing::{debug, warn};

/// One article as written by the scraper.
#[derive(Debug, Deserialize)]
struct ArticleLine {
    #[serde(default)]
    title: String,
    #[serde(default, alias = "content")]
    body: String,
    #[serde(default, alias = "published_at", alias = "scraped_at")]
    timestamp: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    url: String,
}

impl From<ArticleLine> for RawArticle {
    fn from(line: ArticleLine) -> Self {
        RawArticle {
            title: line.title,
            body: line.body,
            timestamp: line.timestamp,
            source: line.source,
            url: line.url,
        }
    }
}

/// [`ArticleSource`] reading a JSON or JSON-lines file on every fetch.
#[derive(Debug, Clone)]
pub struct JsonFileArticleSource {
    path: PathBuf,
}

impl JsonFileArticleSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Parses file content. Undecodable JSON lines are skipped; an undecodable
/// array is an error.
pub fn parse_articles(content: &str) -> Result<Vec<RawArticle>, SourceError> {
    let trimmed = content.trim_start();
    if trimmed.starts_with('[') {
        let lines: Vec<ArticleLine> =
            serde_json::from_str(trimmed).map_err(|e| SourceError::Malformed {
                message: e.to_string(),
            })?;
        return Ok(lines.into_iter().map(RawArticle::from).collect());
    }

    let mut articles = Vec::new();
    for (number, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ArticleLine>(line) {
            Ok(article) => articles.push(article.into()),
            Err(e) => warn!(line = number + 1, error = %e, "undecodable article line skipped"),
        }
    }
    Ok(articles)
}

#[async_trait]
impl ArticleSource for JsonFileArticleSource {
    async fn fetch(&self, limit: usize) -> Result<Vec<RawArticle>, SourceError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| SourceError::Unavailable {
                message: format!("{}: {e}", self.path.display()),
            })?;
        let mut articles = parse_articles(&content)?;
        articles.truncate(limit);
        debug!(path = %self.path.display(), articles = articles.len(), "articles read");
        Ok(articles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_lines_accept_scraper_field_names() {
        let content = r#"
{"title": "Dólar cae", "content": "El peso se fortalece.", "scraped_at": "2026-10-16T09:00:00", "url": "https://x/1"}
not json at all
{"title": "Petróleo sube", "body": "Brent supera 80.", "timestamp": "2026-10-16 10:00:00", "source": "portafolio"}
"#;
        let articles = parse_articles(content).unwrap();
        assert_eq!(articles.len(), 2);
        assert_eq!(articles[0].body, "El peso se fortalece.");
        assert_eq!(articles[0].timestamp, "2026-10-16T09:00:00");
        assert_eq!(articles[1].source, "portafolio");
    }

    #[test]
    fn arrays_must_decode_as_a_whole() {
        assert_eq!(
            parse_articles(r#"[{"title": "a", "body": "b", "timestamp": "t"}]"#)
                .unwrap()
                .len(),
            1
        );
        assert!(matches!(
            parse_articles("[{\"title\": 1}]"),
            Err(SourceError::Malformed { .. })
        ));
    }

    #[test]
    fn empty_files_have_no_articles() {
        assert!(parse_articles("").unwrap().is_empty());
        assert!(parse_articles("[]").unwrap().is_empty());
    }
}
