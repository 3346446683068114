//! Port traits implemented by infrastructure crates.
//!
//! | Port | Implemented in |
//! |------|----------------|
//! | [`InferenceProvider`] | `llm` |
//! | [`ArticleSource`], [`MarketSnapshotSource`] | `sources` |
//! | [`PartitionedStore`], [`CostReportStore`] | `storage` |

pub mod inference;
pub mod source;
pub mod store;

pub use inference::{
    InferenceProvider, InferenceRequest, InferenceResponse, ProviderError, ProviderErrorKind,
};
pub use source::{ArticleSource, MarketSnapshot, MarketSnapshotSource, SourceError};
pub use store::{
    ChainFailureRecord, CostReportStore, MarketIndicatorRecord, PartitionKey, PartitionedStore,
    Stage, StageRecords, StorageError,
};
