//! Per-file video metadata cache with replication
//!
//! Probing a video for resolution and duration is expensive; this crate
//! caches probe results in SQLite, mirrors them in memory for lock-free-ish
//! reads, refreshes stale entries in small concurrent batches, and
//! replicates the store between a local scratch copy and a canonical
//! network location.

pub mod cache;
pub mod config;
pub mod error;
pub mod integrity;
pub mod models;
pub mod probe;
pub mod replication;
pub mod resolution;
pub mod scan;
pub mod store;

pub use cache::MetadataCache;
pub use config::{CacheConfig, CacheConfigBuilder};
pub use error::{CacheError, CacheErrorKind, ProbeError};
pub use integrity::IntegrityReport;
pub use models::{
    DirectoryScanRecord, MetadataRecord, ProbeData, ScanEvent, ScanOutcome, ScanSummary,
};
pub use probe::{FfprobeProber, MediaProber};
pub use replication::{ReplicationManager, StoreMode, StorePaths};
pub use scan::ScanCoordinator;
pub use store::MetadataStore;
