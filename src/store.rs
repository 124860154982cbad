//! Persistent store for metadata records
//!
//! A thin typed repository over SQLite. All writes are insert-or-replace
//! keyed by path, never partial field updates, which eliminates
//! read-modify-write races between concurrent probers.

use log::{info, warn};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use crate::error::CacheError;
use crate::integrity::{self, IntegrityReport};
use crate::models::{unix_now, DirectoryScanRecord, MetadataRecord};
use crate::resolution;

/// Repository over the metadata and directory-scan tables
pub struct MetadataStore {
    conn: Connection,
}

impl MetadataStore {
    /// Open or create the store, running integrity checks
    ///
    /// An unreadable or structurally corrupt database file is deleted and
    /// recreated empty: the cache is fully re-derivable by rescanning, and a
    /// half-usable cache is worse than a cold one.
    pub fn open(path: &Path, corruption_threshold: f64) -> Result<Self, CacheError> {
        let conn = match Self::try_open(path) {
            Ok(conn) => conn,
            Err(e) => {
                warn!("store open failed ({e}), recreating {:?}", path);
                Self::destroy(path);
                Connection::open(path)?
            }
        };

        let store = Self { conn };
        store.init_schema()?;
        let report = store.run_sweep(corruption_threshold)?;
        if report.rebuilt {
            info!("store rebuilt after systemic corruption: {:?}", path);
        }
        Ok(store)
    }

    /// Open an in-memory store (for testing)
    pub fn open_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn try_open(path: &Path) -> Result<Connection, CacheError> {
        let conn = Connection::open(path)?;
        if !integrity::quick_check(&conn) {
            return Err(CacheError::corruption(
                Some(path.to_path_buf()),
                "quick_check failed",
            ));
        }
        Ok(conn)
    }

    /// Best-effort removal of the database file and its sidecars
    fn destroy(path: &Path) {
        for suffix in ["", "-wal", "-shm"] {
            let mut target = path.as_os_str().to_os_string();
            target.push(suffix);
            let target = std::path::PathBuf::from(target);
            if target.exists() {
                if let Err(e) = std::fs::remove_file(&target) {
                    warn!("failed to remove {:?}: {}", target, e);
                }
            }
        }
    }

    fn init_schema(&self) -> Result<(), CacheError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS metadata (
                path TEXT PRIMARY KEY,
                resolution TEXT NOT NULL,
                duration REAL NOT NULL,
                file_size INTEGER NOT NULL,
                last_modified INTEGER NOT NULL,
                last_scanned INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_metadata_resolution ON metadata(resolution);

            CREATE TABLE IF NOT EXISTS directory_scans (
                path TEXT PRIMARY KEY,
                last_full_scan INTEGER NOT NULL,
                video_count INTEGER NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    /// Run the statistical integrity sweep over existing rows
    pub fn run_sweep(&self, threshold: f64) -> Result<IntegrityReport, CacheError> {
        integrity::sweep(&self.conn, threshold)
    }

    /// Fetch one record by path
    pub fn get(&self, path: &str) -> Result<Option<MetadataRecord>, CacheError> {
        let record = self
            .conn
            .query_row(
                "SELECT path, resolution, duration, file_size, last_modified, last_scanned
                 FROM metadata WHERE path = ?1",
                [path],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Insert or replace a whole record
    ///
    /// Records whose resolution is outside the fixed vocabulary are rejected
    /// here so a buggy prober cannot corrupt the store.
    pub fn put(&self, record: &MetadataRecord) -> Result<(), CacheError> {
        if !resolution::is_valid_label(&record.resolution) {
            warn!(
                "rejecting record with invalid resolution {:?} for {:?}",
                record.resolution, record.path
            );
            return Ok(());
        }

        self.conn.execute(
            "INSERT OR REPLACE INTO metadata
             (path, resolution, duration, file_size, last_modified, last_scanned)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.path,
                record.resolution,
                record.duration,
                record.file_size as i64,
                record.last_modified,
                record.last_scanned,
            ],
        )?;
        Ok(())
    }

    /// Delete one record by path
    pub fn remove(&self, path: &str) -> Result<(), CacheError> {
        self.conn
            .execute("DELETE FROM metadata WHERE path = ?1", [path])?;
        Ok(())
    }

    /// Load every record as a HashMap for the in-memory mirror
    pub fn load_all(&self) -> Result<HashMap<String, MetadataRecord>, CacheError> {
        let mut stmt = self.conn.prepare(
            "SELECT path, resolution, duration, file_size, last_modified, last_scanned
             FROM metadata",
        )?;
        let rows = stmt.query_map([], Self::row_to_record)?;

        let mut map = HashMap::new();
        for row in rows {
            let record = row?;
            map.insert(record.path.clone(), record);
        }
        Ok(map)
    }

    /// Distinct resolution labels for paths under a directory prefix
    ///
    /// The prefix is matched literally; substr avoids LIKE's wildcard
    /// interpretation of `_` and `%`, which are legal in paths.
    pub fn unique_resolutions(&self, dir_prefix: &str) -> Result<BTreeSet<String>, CacheError> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT resolution FROM metadata WHERE substr(path, 1, length(?1)) = ?1")?;
        let rows = stmt.query_map([dir_prefix], |row| row.get::<_, String>(0))?;

        let mut set = BTreeSet::new();
        for row in rows {
            set.insert(row?);
        }
        Ok(set)
    }

    /// Record a completed full enumeration of a directory
    pub fn mark_full_scan(&self, dir: &str, video_count: u64) -> Result<(), CacheError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO directory_scans (path, last_full_scan, video_count)
             VALUES (?1, ?2, ?3)",
            params![dir, unix_now(), video_count as i64],
        )?;
        Ok(())
    }

    /// Persist a directory-scan record as-is (used by the mirror writer)
    pub fn put_directory_scan(&self, record: &DirectoryScanRecord) -> Result<(), CacheError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO directory_scans (path, last_full_scan, video_count)
             VALUES (?1, ?2, ?3)",
            params![record.path, record.last_full_scan, record.video_count as i64],
        )?;
        Ok(())
    }

    /// Whether a directory completed a full scan inside the freshness window
    pub fn has_recent_full_scan(&self, dir: &str, ttl_secs: i64) -> Result<bool, CacheError> {
        let last: Option<i64> = self
            .conn
            .query_row(
                "SELECT last_full_scan FROM directory_scans WHERE path = ?1",
                [dir],
                |row| row.get(0),
            )
            .optional()?;
        Ok(last.is_some_and(|t| unix_now() - t < ttl_secs))
    }

    /// Load every directory-scan record for the in-memory mirror
    pub fn load_directory_scans(
        &self,
    ) -> Result<HashMap<String, DirectoryScanRecord>, CacheError> {
        let mut stmt = self
            .conn
            .prepare("SELECT path, last_full_scan, video_count FROM directory_scans")?;
        let rows = stmt.query_map([], |row| {
            Ok(DirectoryScanRecord {
                path: row.get(0)?,
                last_full_scan: row.get(1)?,
                video_count: row.get::<_, i64>(2)? as u64,
            })
        })?;

        let mut map = HashMap::new();
        for row in rows {
            let record = row?;
            map.insert(record.path.clone(), record);
        }
        Ok(map)
    }

    /// Number of metadata rows
    pub fn row_count(&self) -> Result<u64, CacheError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM metadata", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Raw access for the integrity guard and tests
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Insert a row bypassing vocabulary checks (integrity-sweep tests)
    #[cfg(test)]
    pub(crate) fn insert_raw(&self, path: &str, resolution: &str) {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO metadata
                 (path, resolution, duration, file_size, last_modified, last_scanned)
                 VALUES (?1, ?2, 0.0, 0, 0, 0)",
                params![path, resolution],
            )
            .unwrap();
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<MetadataRecord> {
        Ok(MetadataRecord {
            path: row.get(0)?,
            resolution: row.get(1)?,
            duration: row.get(2)?,
            file_size: row.get::<_, i64>(3)? as u64,
            last_modified: row.get(4)?,
            last_scanned: row.get(5)?,
        })
    }
}
