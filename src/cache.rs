//! In-memory mirror and public cache API
//!
//! The mirror is a full hash-map load of the store taken once at startup;
//! every read is answered from it without touching disk. Writes update the
//! mirror synchronously, then enqueue a whole-row replace onto a single
//! writer task that owns the SQLite connection, so all mutations funnel
//! through one serial execution context. A crash between the two loses at
//! most the latest write, never corrupts older rows.

use log::{error, info, warn};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::models::{DirectoryScanRecord, MetadataRecord};
use crate::resolution;
use crate::store::MetadataStore;

enum WriteOp {
    Put(MetadataRecord),
    Remove(String),
    MarkScan(DirectoryScanRecord),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Owner of the mirror and the persistent store
///
/// Construct one instance per process (or per test) and share it by
/// reference; there is no hidden global state.
pub struct MetadataCache {
    records: RwLock<HashMap<String, MetadataRecord>>,
    dir_scans: RwLock<HashMap<String, DirectoryScanRecord>>,
    tx: mpsc::UnboundedSender<WriteOp>,
    writer: Mutex<Option<JoinHandle<()>>>,
    directory_scan_ttl_secs: i64,
}

impl MetadataCache {
    /// Open the store at `db_path` (running integrity checks), load the
    /// mirror and spawn the store writer
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(db_path: &Path, config: &CacheConfig) -> Result<Self, CacheError> {
        let store = MetadataStore::open(db_path, config.corruption_threshold)?;
        Self::with_store(store, config)
    }

    /// Open over an in-memory store (for testing)
    pub fn open_memory(config: &CacheConfig) -> Result<Self, CacheError> {
        let store = MetadataStore::open_memory()?;
        Self::with_store(store, config)
    }

    fn with_store(store: MetadataStore, config: &CacheConfig) -> Result<Self, CacheError> {
        let records = store.load_all()?;
        let dir_scans = store.load_directory_scans()?;
        info!(
            "mirror loaded: {} records, {} directory scans",
            records.len(),
            dir_scans.len()
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::task::spawn_blocking(move || writer_loop(store, rx));

        Ok(Self {
            records: RwLock::new(records),
            dir_scans: RwLock::new(dir_scans),
            tx,
            writer: Mutex::new(Some(writer)),
            directory_scan_ttl_secs: config.directory_scan_ttl_secs,
        })
    }

    /// Look up a record by path; synchronous and mirror-only
    pub fn get_cached_metadata(&self, path: &str) -> Option<MetadataRecord> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned()
    }

    /// Insert or replace a record: mirror synchronously, store async
    ///
    /// Two closely spaced operations observe a consistent view immediately
    /// because the mirror update happens before the store write is even
    /// scheduled. Invalid-vocabulary records are rejected up front.
    pub fn cache_metadata(&self, record: MetadataRecord) {
        if !resolution::is_valid_label(&record.resolution) {
            warn!(
                "rejecting record with invalid resolution {:?} for {:?}",
                record.resolution, record.path
            );
            return;
        }

        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.path.clone(), record.clone());
        self.enqueue(WriteOp::Put(record));
    }

    /// Explicit eviction (e.g. after file deletion); records are never
    /// pruned automatically
    pub fn remove_metadata(&self, path: &str) {
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(path);
        self.enqueue(WriteOp::Remove(path.to_string()));
    }

    /// Staleness check against the file's current mtime
    ///
    /// False when no record exists, so "never probed" and "stale" both mean
    /// a probe is needed.
    pub fn is_fresh(&self, path: &str, current_mtime: i64) -> bool {
        self.get_cached_metadata(path)
            .is_some_and(|r| r.is_fresh(current_mtime))
    }

    /// Distinct resolution labels under a directory prefix, for filter UIs
    /// without file enumeration
    pub fn get_unique_resolutions(&self, dir_prefix: &str) -> BTreeSet<String> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(path, _)| path.starts_with(dir_prefix))
            .map(|(_, record)| record.resolution.clone())
            .collect()
    }

    /// Whether a directory completed a full scan inside the freshness window
    pub fn has_scanned_directory(&self, dir: &str) -> bool {
        self.dir_scans
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(dir)
            .is_some_and(|r| r.is_recent(self.directory_scan_ttl_secs))
    }

    /// Record a completed full enumeration+fill pass over a directory
    pub fn mark_directory_as_scanned(&self, dir: &str, video_count: u64) {
        let record = DirectoryScanRecord::new(dir, video_count);
        self.dir_scans
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.path.clone(), record.clone());
        self.enqueue(WriteOp::MarkScan(record));
    }

    /// Number of records in the mirror
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Whether the mirror holds no records
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until every enqueued write has reached the store
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(WriteOp::Flush(ack_tx)).is_err() {
            return;
        }
        let _ = ack_rx.await;
    }

    /// Drain pending writes and join the writer task
    ///
    /// Deterministic shutdown; writes issued after close are dropped with a
    /// warning.
    pub async fn close(&self) {
        let _ = self.tx.send(WriteOp::Shutdown);
        let handle = self
            .writer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("store writer task failed: {e}");
            }
        }
    }

    fn enqueue(&self, op: WriteOp) {
        if self.tx.send(op).is_err() {
            warn!("store writer is gone; write kept in mirror only");
        }
    }
}

/// The single serial execution context for the store connection
fn writer_loop(store: MetadataStore, mut rx: mpsc::UnboundedReceiver<WriteOp>) {
    while let Some(op) = rx.blocking_recv() {
        match op {
            WriteOp::Put(record) => {
                if let Err(e) = store.put(&record) {
                    error!("failed to persist {:?}: {e}", record.path);
                }
            }
            WriteOp::Remove(path) => {
                if let Err(e) = store.remove(&path) {
                    error!("failed to evict {:?}: {e}", path);
                }
            }
            WriteOp::MarkScan(record) => {
                if let Err(e) = store.put_directory_scan(&record) {
                    error!("failed to persist directory scan {:?}: {e}", record.path);
                }
            }
            WriteOp::Flush(ack) => {
                let _ = ack.send(());
            }
            WriteOp::Shutdown => break,
        }
    }
}
