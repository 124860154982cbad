//! Core data models for the metadata cache

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::resolution;

/// Current time as unix seconds
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Modification time of a file as unix seconds
pub fn file_mtime(path: &Path) -> std::io::Result<i64> {
    let metadata = std::fs::metadata(path)?;
    let mtime = metadata
        .modified()?
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    Ok(mtime)
}

/// Cached metadata for a single video file
///
/// A record is valid independent of whether the source file still exists;
/// removal only happens through explicit eviction, never by TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// Absolute file path (unique key)
    pub path: String,
    /// Resolution bucket from the fixed vocabulary
    pub resolution: String,
    /// Duration in seconds (0 for unsupported files)
    pub duration: f64,
    /// File size in bytes
    pub file_size: u64,
    /// Source file's mtime at scan time (unix seconds)
    pub last_modified: i64,
    /// When the probe ran (unix seconds)
    pub last_scanned: i64,
}

impl MetadataRecord {
    /// Create a record from a successful probe
    pub fn new(
        path: impl Into<String>,
        resolution: String,
        duration: f64,
        file_size: u64,
        last_modified: i64,
    ) -> Self {
        Self {
            path: path.into(),
            resolution,
            duration,
            file_size,
            last_modified,
            last_scanned: unix_now(),
        }
    }

    /// Create a permanent negative entry for a file that failed probing
    ///
    /// Distinct from "Unknown" (never attempted) so unsupported files are
    /// not retried every pass.
    pub fn unsupported(path: impl Into<String>, file_size: u64, last_modified: i64) -> Self {
        Self::new(
            path,
            resolution::LABEL_UNSUPPORTED.to_string(),
            0.0,
            file_size,
            last_modified,
        )
    }

    /// Staleness rule: fresh iff the recorded mtime is at least the file's
    /// current mtime (`>=` tolerates clock granularity across scans)
    pub fn is_fresh(&self, current_mtime: i64) -> bool {
        self.last_modified >= current_mtime
    }
}

/// Record of a completed full enumeration of a directory
///
/// Lets very large directories skip re-enumeration within a freshness
/// window, checked at read time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryScanRecord {
    /// Directory path (unique key)
    pub path: String,
    /// When the last full enumeration+fill pass completed (unix seconds)
    pub last_full_scan: i64,
    /// Number of video files seen in that pass
    pub video_count: u64,
}

impl DirectoryScanRecord {
    /// Create a record stamped with the current time
    pub fn new(path: impl Into<String>, video_count: u64) -> Self {
        Self {
            path: path.into(),
            last_full_scan: unix_now(),
            video_count,
        }
    }

    /// Whether the scan is still inside the freshness window
    pub fn is_recent(&self, ttl_secs: i64) -> bool {
        unix_now() - self.last_full_scan < ttl_secs
    }
}

/// Raw geometry and duration extracted by a probe
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeData {
    /// Width in pixels after orientation transform
    pub width: u32,
    /// Height in pixels after orientation transform
    pub height: u32,
    /// Duration in seconds (finite, > 0)
    pub duration: f64,
}

/// Outcome of scanning a single path
#[derive(Debug, Clone)]
pub enum ScanOutcome {
    /// Probed and cached a fresh record
    Updated(MetadataRecord),
    /// Existing cache entry was still fresh; no probe ran
    Cached(MetadataRecord),
    /// Probe failed permanently; negative entry cached
    Unsupported(MetadataRecord),
    /// Transient failure; nothing cached, retried on the next request
    TransientError(String),
}

impl ScanOutcome {
    /// The record produced or reused, if any
    pub fn record(&self) -> Option<&MetadataRecord> {
        match self {
            ScanOutcome::Updated(r) | ScanOutcome::Cached(r) | ScanOutcome::Unsupported(r) => {
                Some(r)
            }
            ScanOutcome::TransientError(_) => None,
        }
    }

    /// Short code for progress output
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanOutcome::Updated(_) => "updated",
            ScanOutcome::Cached(_) => "cached",
            ScanOutcome::Unsupported(_) => "unsupported",
            ScanOutcome::TransientError(_) => "error",
        }
    }
}

/// Per-file progress event emitted during a batch scan
///
/// Reported per-file rather than only at completion because directories can
/// contain thousands of entries.
#[derive(Debug, Clone)]
pub struct ScanEvent {
    /// Path that completed
    pub path: PathBuf,
    /// What happened to it
    pub outcome: ScanOutcome,
    /// Paths completed so far, including this one
    pub completed: u64,
    /// Total paths in this scan
    pub total: u64,
}

/// Aggregate counts for a finished scan
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanSummary {
    /// Total paths processed
    pub total: u64,
    /// Freshly probed and cached
    pub updated: u64,
    /// Served from cache without probing
    pub cached: u64,
    /// Cached as permanent negative entries
    pub unsupported: u64,
    /// Transient failures, not cached
    pub errors: u64,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
}

impl ScanSummary {
    /// Fold one event into the summary
    pub fn record_event(&mut self, event: &ScanEvent) {
        self.total += 1;
        match event.outcome {
            ScanOutcome::Updated(_) => self.updated += 1,
            ScanOutcome::Cached(_) => self.cached += 1,
            ScanOutcome::Unsupported(_) => self.unsupported += 1,
            ScanOutcome::TransientError(_) => self.errors += 1,
        }
    }
}
