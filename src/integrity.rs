//! Corruption checks for the persistent store
//!
//! Two layers: a structural `PRAGMA quick_check` at open, then a statistical
//! sweep over resolution values. A handful of bad rows means one bad write
//! batch and gets targeted cleanup; a large fraction means store-level
//! corruption, which is cheaper and safer to discard wholesale than to
//! reason about.

use log::{error, info, warn};
use rusqlite::Connection;

use crate::error::CacheError;
use crate::resolution;

/// Maximum number of invalid rows logged individually during a sweep
const SAMPLE_LOG_LIMIT: usize = 5;

/// Result of a statistical integrity sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    /// Rows examined
    pub total_rows: u64,
    /// Rows whose resolution failed the vocabulary check
    pub invalid_rows: u64,
    /// Whether the invalid fraction crossed the threshold and the store was
    /// emptied
    pub rebuilt: bool,
}

/// Run SQLite's structural quick check
///
/// Returns false for a database file that cannot be trusted at all.
pub fn quick_check(conn: &Connection) -> bool {
    match conn.query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0)) {
        Ok(result) => result == "ok",
        Err(e) => {
            warn!("quick_check failed to run: {}", e);
            false
        }
    }
}

/// Sweep metadata rows for vocabulary violations
///
/// Invalid fraction above `threshold` empties every table (systemic
/// corruption); otherwise only the offending rows are deleted, with a few
/// samples logged for diagnosis.
pub fn sweep(conn: &Connection, threshold: f64) -> Result<IntegrityReport, CacheError> {
    let mut stmt = conn.prepare("SELECT path, resolution FROM metadata")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut total: u64 = 0;
    let mut invalid: Vec<(String, String)> = Vec::new();
    for row in rows {
        let (path, label) = row?;
        total += 1;
        if !resolution::is_valid_label(&label) {
            invalid.push((path, label));
        }
    }
    drop(stmt);

    let mut report = IntegrityReport {
        total_rows: total,
        invalid_rows: invalid.len() as u64,
        rebuilt: false,
    };

    if invalid.is_empty() {
        return Ok(report);
    }

    for (path, label) in invalid.iter().take(SAMPLE_LOG_LIMIT) {
        warn!("invalid resolution {:?} for {:?}", label, path);
    }

    let fraction = invalid.len() as f64 / total as f64;
    if fraction > threshold {
        error!(
            "{}/{} rows invalid ({:.1}%), treating as systemic corruption and rebuilding",
            invalid.len(),
            total,
            fraction * 100.0
        );
        conn.execute("DELETE FROM metadata", [])?;
        conn.execute("DELETE FROM directory_scans", [])?;
        report.rebuilt = true;
    } else {
        info!(
            "deleting {} invalid rows out of {} (below {:.1}% threshold)",
            invalid.len(),
            total,
            threshold * 100.0
        );
        let mut delete = conn.prepare("DELETE FROM metadata WHERE path = ?1")?;
        for (path, _) in &invalid {
            delete.execute([path])?;
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MetadataStore;

    fn seed(store: &MetadataStore, valid: usize, invalid: usize) {
        for i in 0..valid {
            store.insert_raw(&format!("/v/ok_{i}.mp4"), "1080p");
        }
        for i in 0..invalid {
            store.insert_raw(&format!("/v/bad_{i}.mp4"), "!!corrupt!!");
        }
    }

    #[test]
    fn test_quick_check_ok_on_fresh_db() {
        let store = MetadataStore::open_memory().unwrap();
        assert!(quick_check(store.conn()));
    }

    #[test]
    fn test_sweep_empty_store() {
        let store = MetadataStore::open_memory().unwrap();
        let report = sweep(store.conn(), 0.05).unwrap();
        assert_eq!(report, IntegrityReport::default());
    }

    #[test]
    fn test_sweep_targeted_deletion_below_threshold() {
        let store = MetadataStore::open_memory().unwrap();
        seed(&store, 96, 4);

        let report = sweep(store.conn(), 0.05).unwrap();
        assert_eq!(report.total_rows, 100);
        assert_eq!(report.invalid_rows, 4);
        assert!(!report.rebuilt);

        // Only the invalid 4% are gone
        assert_eq!(store.row_count().unwrap(), 96);
        assert!(store.get("/v/ok_0.mp4").unwrap().is_some());
        assert!(store.get("/v/bad_0.mp4").unwrap().is_none());
    }

    #[test]
    fn test_sweep_full_rebuild_above_threshold() {
        let store = MetadataStore::open_memory().unwrap();
        seed(&store, 50, 50);
        store.mark_full_scan("/v", 100).unwrap();

        let report = sweep(store.conn(), 0.05).unwrap();
        assert!(report.rebuilt);
        assert_eq!(store.row_count().unwrap(), 0);
        // Directory-scan records are discarded along with the metadata
        assert!(!store.has_recent_full_scan("/v", 24 * 3600).unwrap());
    }

    #[test]
    fn test_sweep_nonstandard_heights_are_not_corruption() {
        let store = MetadataStore::open_memory().unwrap();
        store.insert_raw("/v/wide.mkv", "1200p");
        store.insert_raw("/v/odd.mkv", "858p");

        let report = sweep(store.conn(), 0.05).unwrap();
        assert_eq!(report.invalid_rows, 0);
        assert_eq!(store.row_count().unwrap(), 2);
    }

    #[test]
    fn test_sweep_threshold_is_configurable() {
        let store = MetadataStore::open_memory().unwrap();
        seed(&store, 80, 20);

        // 20% invalid survives as targeted cleanup under a lax threshold
        let report = sweep(store.conn(), 0.5).unwrap();
        assert!(!report.rebuilt);
        assert_eq!(store.row_count().unwrap(), 80);
    }
}
