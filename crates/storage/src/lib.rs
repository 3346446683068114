//! newsgate storage adapters.
//!
//! Implements [`pipeline::PartitionedStore`] and [`pipeline::CostReportStore`].
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** File layout, Parquet encoding and atomic replacement
//! live here. The domain sees only the port traits and [`pipeline::StorageError`].
//!
//! | Type | Stores |
//! |------|--------|
//! | [`ParquetStore`] | Stage partitions as Snappy-compressed Parquet, one file per run |
//! | [`JsonReportStore`] | Cost reports as JSON, one file per run |
//! | [`MemoryStore`] | Both, in memory |

pub mod batch;
pub mod memory;
pub mod parquet_store;
pub mod report;

pub use memory::MemoryStore;
pub use parquet_store::ParquetStore;
pub use report::JsonReportStore;
