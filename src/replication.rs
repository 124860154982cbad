//! Whole-file replication between a local scratch copy and a canonical
//! store on a network mount
//!
//! SQLite over network filesystems is slow and lock-fragile, so when the
//! canonical location is network-mounted the live database is a local
//! scratch file and the canonical copy is refreshed by periodic whole-file
//! pushes. Concurrent writers are out of scope: the last pusher wins and
//! overwrites the canonical copy.

use log::{info, warn};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::CacheError;

/// Where the live database lives relative to the canonical location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Canonical location is local; operate on it directly
    Local,
    /// Canonical location is network-mounted; operate on a scratch copy
    Replicated,
}

/// Resolved canonical and active paths for the store file
#[derive(Debug, Clone)]
pub struct StorePaths {
    /// Long-term home of the database
    pub canonical: PathBuf,
    /// Path the live connection opens
    pub active: PathBuf,
    /// Whether replication is in play
    pub mode: StoreMode,
}

impl StorePaths {
    /// Decide where the live database goes
    ///
    /// The network predicate is injected so tests (and platforms with odd
    /// mount tables) can decide without touching a real mount.
    pub fn resolve<F>(canonical: &Path, scratch_dir: &Path, is_network: F) -> Self
    where
        F: Fn(&Path) -> bool,
    {
        if is_network(canonical) {
            let file_name = canonical.file_name().unwrap_or_default();
            let active = scratch_dir.join(file_name);
            info!(
                "canonical store {:?} is network-mounted; working on scratch copy {:?}",
                canonical, active
            );
            Self {
                canonical: canonical.to_path_buf(),
                active,
                mode: StoreMode::Replicated,
            }
        } else {
            Self {
                canonical: canonical.to_path_buf(),
                active: canonical.to_path_buf(),
                mode: StoreMode::Local,
            }
        }
    }

    /// Whether the active path differs from the canonical one
    pub fn is_replicated(&self) -> bool {
        self.mode == StoreMode::Replicated
    }
}

/// Copy the canonical store down to the scratch path
///
/// Returns false when there was nothing to pull (local mode, or no
/// canonical copy exists yet). A missing canonical copy is a cold start,
/// not an error.
pub async fn pull(paths: &StorePaths) -> Result<bool, CacheError> {
    if !paths.is_replicated() {
        return Ok(false);
    }
    if !paths.canonical.exists() {
        info!("no canonical store at {:?}; starting cold", paths.canonical);
        return Ok(false);
    }

    if let Some(parent) = paths.active.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CacheError::replication(paths.active.clone(), e.to_string()))?;
    }
    let bytes = tokio::fs::copy(&paths.canonical, &paths.active)
        .await
        .map_err(|e| CacheError::replication(paths.canonical.clone(), e.to_string()))?;
    info!(
        "pulled {} bytes from {:?} to {:?}",
        bytes, paths.canonical, paths.active
    );
    Ok(true)
}

/// Copy the scratch store up over the canonical one
///
/// The previous canonical copy is kept as a `.bak` sibling before being
/// replaced; failure to take the backup is logged and not fatal.
pub async fn push(paths: &StorePaths) -> Result<(), CacheError> {
    if !paths.is_replicated() {
        return Ok(());
    }

    if let Some(parent) = paths.canonical.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CacheError::replication(paths.canonical.clone(), e.to_string()))?;
    }

    if paths.canonical.exists() {
        let backup = backup_path(&paths.canonical);
        if let Err(e) = tokio::fs::copy(&paths.canonical, &backup).await {
            warn!("could not back up canonical store to {:?}: {e}", backup);
        }
        tokio::fs::remove_file(&paths.canonical)
            .await
            .map_err(|e| CacheError::replication(paths.canonical.clone(), e.to_string()))?;
    }

    let bytes = tokio::fs::copy(&paths.active, &paths.canonical)
        .await
        .map_err(|e| CacheError::replication(paths.canonical.clone(), e.to_string()))?;
    info!(
        "pushed {} bytes from {:?} to {:?}",
        bytes, paths.active, paths.canonical
    );
    Ok(())
}

fn backup_path(canonical: &Path) -> PathBuf {
    let mut name = OsString::from(canonical.as_os_str());
    name.push(".bak");
    PathBuf::from(name)
}

/// Periodic push loop with a final push at shutdown
///
/// Push failures inside the loop are logged and retried on the next tick;
/// only the final push at [`stop`](Self::stop) reports an error to the
/// caller.
pub struct ReplicationManager {
    paths: StorePaths,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ReplicationManager {
    /// Create a manager; no task runs until [`start`](Self::start)
    pub fn new(paths: StorePaths) -> Self {
        Self {
            paths,
            token: CancellationToken::new(),
            task: None,
        }
    }

    /// Spawn the periodic push loop
    ///
    /// No-op in local mode.
    pub fn start(&mut self, interval: Duration) {
        if !self.paths.is_replicated() || self.task.is_some() {
            return;
        }

        let paths = self.paths.clone();
        let token = self.token.clone();
        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick fires immediately; skip it so a fresh start does
            // not push an empty scratch file
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = push(&paths).await {
                            warn!("periodic push failed: {e}");
                        }
                    }
                }
            }
        }));
    }

    /// Push the scratch copy immediately
    pub async fn push_now(&self) -> Result<(), CacheError> {
        push(&self.paths).await
    }

    /// Stop the loop and push one final time
    ///
    /// Call after the cache's writer has drained, so the scratch file holds
    /// every write.
    pub async fn stop(mut self) -> Result<(), CacheError> {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        push(&self.paths).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MetadataCache;
    use crate::config::CacheConfig;
    use crate::error::CacheErrorKind;
    use crate::models::MetadataRecord;
    use crate::store::MetadataStore;

    #[test]
    fn test_resolve_local_mode() {
        let paths = StorePaths::resolve(
            Path::new("/data/cache.db"),
            Path::new("/tmp/scratch"),
            |_| false,
        );
        assert_eq!(paths.mode, StoreMode::Local);
        assert_eq!(paths.active, Path::new("/data/cache.db"));
        assert!(!paths.is_replicated());
    }

    #[test]
    fn test_resolve_replicated_mode() {
        let paths = StorePaths::resolve(
            Path::new("/mnt/nas/cache.db"),
            Path::new("/tmp/scratch"),
            |p| p.starts_with("/mnt"),
        );
        assert_eq!(paths.mode, StoreMode::Replicated);
        assert_eq!(paths.canonical, Path::new("/mnt/nas/cache.db"));
        assert_eq!(paths.active, Path::new("/tmp/scratch/cache.db"));
    }

    fn replicated_paths(dir: &Path) -> StorePaths {
        StorePaths {
            canonical: dir.join("canonical/cache.db"),
            active: dir.join("scratch/cache.db"),
            mode: StoreMode::Replicated,
        }
    }

    #[tokio::test]
    async fn test_pull_missing_canonical_is_cold_start() {
        let dir = tempfile::tempdir().unwrap();
        let paths = replicated_paths(dir.path());
        assert!(!pull(&paths).await.unwrap());
        assert!(!paths.active.exists());
    }

    #[tokio::test]
    async fn test_pull_copies_canonical() {
        let dir = tempfile::tempdir().unwrap();
        let paths = replicated_paths(dir.path());
        std::fs::create_dir_all(paths.canonical.parent().unwrap()).unwrap();
        std::fs::write(&paths.canonical, b"canonical bytes").unwrap();

        assert!(pull(&paths).await.unwrap());
        assert_eq!(std::fs::read(&paths.active).unwrap(), b"canonical bytes");
    }

    #[tokio::test]
    async fn test_push_replaces_and_backs_up() {
        let dir = tempfile::tempdir().unwrap();
        let paths = replicated_paths(dir.path());
        std::fs::create_dir_all(paths.canonical.parent().unwrap()).unwrap();
        std::fs::create_dir_all(paths.active.parent().unwrap()).unwrap();
        std::fs::write(&paths.canonical, b"old").unwrap();
        std::fs::write(&paths.active, b"new").unwrap();

        push(&paths).await.unwrap();
        assert_eq!(std::fs::read(&paths.canonical).unwrap(), b"new");
        let backup = paths.canonical.with_extension("db.bak");
        assert_eq!(std::fs::read(&backup).unwrap(), b"old");
    }

    #[tokio::test]
    async fn test_push_without_scratch_is_replication_error() {
        let dir = tempfile::tempdir().unwrap();
        let paths = replicated_paths(dir.path());

        // No scratch file exists to push
        let err = push(&paths).await.unwrap_err();
        assert_eq!(err.kind, CacheErrorKind::ReplicationError);
        assert_eq!(err.path, Some(paths.canonical.clone()));
    }

    #[tokio::test]
    async fn test_push_is_noop_in_local_mode() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StorePaths::resolve(&dir.path().join("cache.db"), dir.path(), |_| false);
        push(&paths).await.unwrap();
        assert!(!paths.canonical.exists());
    }

    #[tokio::test]
    async fn test_replicated_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let paths = replicated_paths(dir.path());
        std::fs::create_dir_all(paths.active.parent().unwrap()).unwrap();

        let config = CacheConfig::default();
        let cache = MetadataCache::open(&paths.active, &config).unwrap();
        let record =
            MetadataRecord::new("/v/a.mp4", "1080p".to_string(), 60.0, 4096, 1_700_000_000);
        cache.cache_metadata(record.clone());
        cache.flush().await;
        cache.close().await;

        let manager = ReplicationManager::new(paths.clone());
        manager.push_now().await.unwrap();

        // The canonical copy is a complete, openable store
        let store = MetadataStore::open(&paths.canonical, config.corruption_threshold).unwrap();
        assert_eq!(store.get("/v/a.mp4").unwrap().unwrap(), record);
    }

    #[tokio::test]
    async fn test_manager_pushes_periodically_and_at_stop() {
        let dir = tempfile::tempdir().unwrap();
        let paths = replicated_paths(dir.path());
        std::fs::create_dir_all(paths.active.parent().unwrap()).unwrap();
        std::fs::write(&paths.active, b"scratch v1").unwrap();

        let mut manager = ReplicationManager::new(paths.clone());
        manager.start(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(std::fs::read(&paths.canonical).unwrap(), b"scratch v1");

        std::fs::write(&paths.active, b"scratch v2").unwrap();
        manager.stop().await.unwrap();
        assert_eq!(std::fs::read(&paths.canonical).unwrap(), b"scratch v2");
    }

    #[tokio::test]
    async fn test_manager_is_inert_in_local_mode() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("cache.db");
        std::fs::write(&db, b"local").unwrap();
        let paths = StorePaths::resolve(&db, dir.path(), |_| false);

        let mut manager = ReplicationManager::new(paths);
        manager.start(Duration::from_millis(10));
        manager.stop().await.unwrap();
        assert_eq!(std::fs::read(&db).unwrap(), b"local");
    }
}
