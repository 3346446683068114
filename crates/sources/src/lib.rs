//! newsgate data sources.
//!
//! Implements [`pipeline::ArticleSource`] and [`pipeline::MarketSnapshotSource`]
//! over files written by the external scraper. Scraping itself is out of
//! scope: these adapters only read what the scraper left behind.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Any read failure surfaces as
//! [`pipeline::SourceError::Unavailable`]; the orchestrator decides whether
//! the run can continue without that source.

pub mod articles;
pub mod market;

pub use articles::JsonFileArticleSource;
pub use market::JsonFileMarketSource;
