//! Batch scan coordinator
//!
//! Probes run in small fixed-size batches: concurrent within a batch,
//! strictly sequential across batches. Every completed probe is written
//! through mirror and store before the next batch starts, so partial
//! progress survives cancellation or a crash. Cancellation is cooperative
//! and checked only at batch boundaries; in-flight probes finish.

use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::cache::MetadataCache;
use crate::config::CacheConfig;
use crate::error::{CacheError, CacheErrorKind};
use crate::models::{MetadataRecord, ScanEvent, ScanOutcome};
use crate::probe::MediaProber;
use crate::resolution;

/// Channel capacity for progress events
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Schedules bounded-concurrency probing over the cache
pub struct ScanCoordinator {
    cache: Arc<MetadataCache>,
    prober: Arc<dyn MediaProber>,
    config: CacheConfig,
}

impl ScanCoordinator {
    /// Create a coordinator over an existing cache and prober
    pub fn new(cache: Arc<MetadataCache>, prober: Arc<dyn MediaProber>, config: CacheConfig) -> Self {
        Self {
            cache,
            prober,
            config,
        }
    }

    /// Probe one file and cache the result
    ///
    /// Returns the cached record, reusing a fresh existing entry without
    /// probing. None only for transient failures, which are not cached.
    pub async fn probe_and_cache(&self, path: &Path) -> Option<MetadataRecord> {
        let outcome = scan_one(&self.cache, self.prober.as_ref(), path).await;
        self.cache.flush().await;
        outcome.record().cloned()
    }

    /// Scan a set of paths, probing entries that are missing or stale
    ///
    /// Emits exactly one [`ScanEvent`] per input path; fresh cached entries
    /// count as completions without probing. The receiver closes when the
    /// scan finishes or is cancelled.
    pub fn scan_missing(
        &self,
        paths: Vec<PathBuf>,
        token: CancellationToken,
    ) -> mpsc::Receiver<ScanEvent> {
        self.run_scan(paths, token, None)
    }

    /// Enumerate video files under a directory and scan them
    ///
    /// Skipped entirely when the directory completed a full scan inside the
    /// freshness window, unless `force` is set. On uncancelled completion
    /// the directory is marked as scanned.
    pub async fn scan_directory(
        &self,
        dir: &Path,
        force: bool,
        token: CancellationToken,
    ) -> Result<mpsc::Receiver<ScanEvent>, CacheError> {
        let dir_str = dir.to_string_lossy().to_string();

        if !force && self.cache.has_scanned_directory(&dir_str) {
            info!("skipping {dir_str}: full scan still fresh");
            let (_tx, rx) = mpsc::channel(1);
            return Ok(rx);
        }

        if !dir.is_dir() {
            return Err(CacheError::new(
                CacheErrorKind::NotFound,
                Some(dir.to_path_buf()),
                "not a directory",
            ));
        }

        let walk_root = dir.to_path_buf();
        let walk_config = self.config.clone();
        let paths = tokio::task::spawn_blocking(move || enumerate_videos(&walk_root, &walk_config))
            .await
            .map_err(|e| CacheError::io_error(Some(dir.to_path_buf()), e.to_string()))?;

        info!("enumerated {} video files under {dir_str}", paths.len());
        let count = paths.len() as u64;
        Ok(self.run_scan(paths, token, Some((dir_str, count))))
    }

    fn run_scan(
        &self,
        paths: Vec<PathBuf>,
        token: CancellationToken,
        mark: Option<(String, u64)>,
    ) -> mpsc::Receiver<ScanEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let cache = Arc::clone(&self.cache);
        let prober = Arc::clone(&self.prober);
        let batch_size = self.config.batch_size();
        let delay = self.config.batch_delay();

        tokio::spawn(async move {
            let total = paths.len() as u64;
            let mut completed = 0u64;
            let mut cancelled = false;

            for batch in paths.chunks(batch_size) {
                if token.is_cancelled() {
                    info!("scan cancelled after {completed}/{total} files");
                    cancelled = true;
                    break;
                }

                let probes = batch.iter().map(|p| scan_one(&cache, prober.as_ref(), p));
                let outcomes = futures::future::join_all(probes).await;

                for (path, outcome) in batch.iter().zip(outcomes) {
                    completed += 1;
                    debug!("{} {:?} ({completed}/{total})", outcome.as_str(), path);
                    let event = ScanEvent {
                        path: path.clone(),
                        outcome,
                        completed,
                        total,
                    };
                    // A dropped receiver stops progress reporting, not
                    // persistence
                    let _ = tx.send(event).await;
                }

                // Durability boundary between batches
                cache.flush().await;

                if !delay.is_zero() && completed < total {
                    tokio::time::sleep(delay).await;
                }
            }

            if !cancelled {
                if let Some((dir, count)) = mark {
                    cache.mark_directory_as_scanned(&dir, count);
                    cache.flush().await;
                }
            }
        });

        rx
    }
}

/// Probe a single path and write the result through the cache
async fn scan_one(cache: &MetadataCache, prober: &dyn MediaProber, path: &Path) -> ScanOutcome {
    let key = path.to_string_lossy().to_string();

    let metadata = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(e) => return ScanOutcome::TransientError(e.to_string()),
    };
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let file_size = metadata.len();

    if let Some(existing) = cache.get_cached_metadata(&key) {
        if existing.is_fresh(mtime) {
            return ScanOutcome::Cached(existing);
        }
    }

    match prober.probe(path).await {
        Ok(data) => {
            let record = MetadataRecord::new(
                key,
                resolution::bucket_label(data.width, data.height),
                data.duration,
                file_size,
                mtime,
            );
            cache.cache_metadata(record.clone());
            ScanOutcome::Updated(record)
        }
        Err(e) if e.is_permanent() => {
            warn!("probe of {:?} failed permanently: {e}", path);
            let record = MetadataRecord::unsupported(key, file_size, mtime);
            cache.cache_metadata(record.clone());
            ScanOutcome::Unsupported(record)
        }
        Err(e) => {
            warn!("probe of {:?} failed transiently: {e}", path);
            ScanOutcome::TransientError(e.to_string())
        }
    }
}

/// Enumerate video files under a root, skipping ignored directories
fn enumerate_videos(root: &Path, config: &CacheConfig) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 || !entry.file_type().is_dir() {
                return true;
            }
            entry
                .file_name()
                .to_str()
                .map(|name| !config.should_ignore_dir(name))
                .unwrap_or(true)
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| config.should_include_extension(ext))
        })
        .map(|entry| entry.into_path())
        .collect();
    paths.sort();
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProbeError;
    use crate::models::ProbeData;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    enum StubResult {
        Data(u32, u32, f64),
        Unsupported,
        Io,
    }

    /// Prober with canned per-file outcomes, keyed by file name
    struct StubProber {
        results: HashMap<String, StubResult>,
        default: StubResult,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl StubProber {
        fn ok() -> Self {
            Self {
                results: HashMap::new(),
                default: StubResult::Data(1920, 1080, 60.0),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        fn with_result(mut self, name: &str, result: StubResult) -> Self {
            self.results.insert(name.to_string(), result);
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MediaProber for StubProber {
        async fn probe(&self, path: &Path) -> Result<ProbeData, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            match self.results.get(&name).unwrap_or(&self.default) {
                StubResult::Data(w, h, d) => Ok(ProbeData {
                    width: *w,
                    height: *h,
                    duration: *d,
                }),
                StubResult::Unsupported => {
                    Err(ProbeError::Unsupported("stub says no".to_string()))
                }
                StubResult::Io => Err(ProbeError::Io("stub I/O failure".to_string())),
            }
        }
    }

    fn make_files(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|name| {
                let path = dir.join(name);
                std::fs::write(&path, b"fake video bytes").unwrap();
                path
            })
            .collect()
    }

    fn coordinator(
        prober: Arc<StubProber>,
        config: CacheConfig,
    ) -> (Arc<MetadataCache>, ScanCoordinator) {
        let cache = Arc::new(MetadataCache::open_memory(&config).unwrap());
        let coordinator = ScanCoordinator::new(Arc::clone(&cache), prober, config);
        (cache, coordinator)
    }

    async fn drain(mut rx: mpsc::Receiver<ScanEvent>) -> Vec<ScanEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_scan_missing_completeness() {
        let dir = tempfile::tempdir().unwrap();
        let paths = make_files(dir.path(), &["a.mp4", "b.mp4", "c.mp4", "d.mp4", "e.mp4"]);
        let prober = Arc::new(StubProber::ok());
        let (cache, coordinator) = coordinator(Arc::clone(&prober), CacheConfig::default());

        let rx = coordinator.scan_missing(paths.clone(), CancellationToken::new());
        let events = drain(rx).await;

        assert_eq!(events.len(), 5);
        assert_eq!(events.last().unwrap().completed, 5);
        assert_eq!(events.last().unwrap().total, 5);
        assert_eq!(prober.call_count(), 5);
        for path in &paths {
            let record = cache.get_cached_metadata(&path.to_string_lossy()).unwrap();
            assert_eq!(record.resolution, "1080p");
        }
        cache.close().await;
    }

    #[tokio::test]
    async fn test_mixed_outcomes_and_retry_semantics() {
        let dir = tempfile::tempdir().unwrap();
        let paths = make_files(dir.path(), &["good.mp4", "broken.mp4", "flaky.mp4"]);
        let prober = Arc::new(
            StubProber::ok()
                .with_result("broken.mp4", StubResult::Unsupported)
                .with_result("flaky.mp4", StubResult::Io),
        );
        let (cache, coordinator) = coordinator(Arc::clone(&prober), CacheConfig::default());

        let events = drain(coordinator.scan_missing(paths.clone(), CancellationToken::new())).await;
        assert_eq!(events.len(), 3);

        // Permanent failure is cached as a negative entry
        let broken = cache
            .get_cached_metadata(&paths[1].to_string_lossy())
            .unwrap();
        assert_eq!(broken.resolution, "Unsupported");
        // Transient failure is not cached
        assert!(cache
            .get_cached_metadata(&paths[2].to_string_lossy())
            .is_none());
        assert_eq!(prober.call_count(), 3);

        // Second pass: good and broken are served from cache, flaky retried
        let events = drain(coordinator.scan_missing(paths.clone(), CancellationToken::new())).await;
        assert_eq!(events.len(), 3);
        assert_eq!(prober.call_count(), 4);
        let cached = events
            .iter()
            .filter(|e| matches!(e.outcome, ScanOutcome::Cached(_)))
            .count();
        assert_eq!(cached, 2);
        cache.close().await;
    }

    #[tokio::test]
    async fn test_fresh_entries_are_not_reprobed() {
        let dir = tempfile::tempdir().unwrap();
        let paths = make_files(dir.path(), &["a.mp4"]);
        let prober = Arc::new(StubProber::ok());
        let (cache, coordinator) = coordinator(Arc::clone(&prober), CacheConfig::default());

        let events = drain(coordinator.scan_missing(paths.clone(), CancellationToken::new())).await;
        assert!(matches!(events[0].outcome, ScanOutcome::Updated(_)));

        let events = drain(coordinator.scan_missing(paths.clone(), CancellationToken::new())).await;
        assert!(matches!(events[0].outcome, ScanOutcome::Cached(_)));
        assert_eq!(prober.call_count(), 1);
        cache.close().await;
    }

    #[tokio::test]
    async fn test_stale_entries_are_reprobed() {
        let dir = tempfile::tempdir().unwrap();
        let paths = make_files(dir.path(), &["a.mp4"]);
        let prober = Arc::new(StubProber::ok());
        let (cache, coordinator) = coordinator(Arc::clone(&prober), CacheConfig::default());

        // Seed a record that predates the file's mtime
        let key = paths[0].to_string_lossy().to_string();
        cache.cache_metadata(MetadataRecord::new(
            key.clone(),
            "720p".to_string(),
            10.0,
            16,
            0,
        ));

        let events = drain(coordinator.scan_missing(paths.clone(), CancellationToken::new())).await;
        assert!(matches!(events[0].outcome, ScanOutcome::Updated(_)));
        assert_eq!(prober.call_count(), 1);
        assert_eq!(cache.get_cached_metadata(&key).unwrap().resolution, "1080p");
        cache.close().await;
    }

    #[tokio::test]
    async fn test_cancellation_at_batch_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let paths = make_files(dir.path(), &["a.mp4", "b.mp4", "c.mp4", "d.mp4"]);
        let prober = Arc::new(StubProber::ok().with_delay(Duration::from_millis(100)));
        let config = CacheConfig::builder().local_batch_size(2).build();
        let (cache, coordinator) = coordinator(Arc::clone(&prober), config);

        let token = CancellationToken::new();
        let rx = coordinator.scan_missing(paths.clone(), token.clone());

        // Cancel while the first batch is still in flight
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let events = drain(rx).await;
        // In-flight probes finish; no further batches start
        assert_eq!(events.len(), 2);
        assert_eq!(prober.call_count(), 2);

        // Entries completed before cancellation remain queryable
        assert!(cache
            .get_cached_metadata(&paths[0].to_string_lossy())
            .is_some());
        assert!(cache
            .get_cached_metadata(&paths[3].to_string_lossy())
            .is_none());
        cache.close().await;
    }

    #[tokio::test]
    async fn test_missing_file_is_transient() {
        let prober = Arc::new(StubProber::ok());
        let (cache, coordinator) = coordinator(Arc::clone(&prober), CacheConfig::default());

        let paths = vec![PathBuf::from("/nonexistent/vidcache/test.mp4")];
        let events = drain(coordinator.scan_missing(paths, CancellationToken::new())).await;

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].outcome, ScanOutcome::TransientError(_)));
        assert_eq!(prober.call_count(), 0);
        assert!(cache.is_empty());
        cache.close().await;
    }

    #[tokio::test]
    async fn test_probe_and_cache_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let paths = make_files(dir.path(), &["a.mp4"]);
        let prober = Arc::new(StubProber::ok());
        let (cache, coordinator) = coordinator(Arc::clone(&prober), CacheConfig::default());

        let record = coordinator.probe_and_cache(&paths[0]).await.unwrap();
        assert_eq!(record.resolution, "1080p");
        assert_eq!(record.duration, 60.0);
        assert!(cache
            .get_cached_metadata(&paths[0].to_string_lossy())
            .is_some());
        cache.close().await;
    }

    #[tokio::test]
    async fn test_scan_directory_enumerates_and_marks() {
        let dir = tempfile::tempdir().unwrap();
        make_files(dir.path(), &["a.mp4", "b.mkv", "notes.txt"]);
        std::fs::create_dir(dir.path().join(".hidden")).unwrap();
        std::fs::write(dir.path().join(".hidden/c.mp4"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/d.webm"), b"x").unwrap();

        let prober = Arc::new(StubProber::ok());
        let (cache, coordinator) = coordinator(Arc::clone(&prober), CacheConfig::default());

        let rx = coordinator
            .scan_directory(dir.path(), false, CancellationToken::new())
            .await
            .unwrap();
        let events = drain(rx).await;

        // a.mp4, b.mkv, sub/d.webm; txt and hidden-dir contents excluded
        assert_eq!(events.len(), 3);
        assert!(cache.has_scanned_directory(&dir.path().to_string_lossy()));

        // A second scan inside the freshness window is skipped entirely
        let rx = coordinator
            .scan_directory(dir.path(), false, CancellationToken::new())
            .await
            .unwrap();
        assert!(drain(rx).await.is_empty());
        assert_eq!(prober.call_count(), 3);

        // Forcing re-enumerates but serves fresh entries from cache
        let rx = coordinator
            .scan_directory(dir.path(), true, CancellationToken::new())
            .await
            .unwrap();
        let events = drain(rx).await;
        assert_eq!(events.len(), 3);
        assert_eq!(prober.call_count(), 3);
        cache.close().await;
    }

    #[tokio::test]
    async fn test_scan_directory_missing_root() {
        let prober = Arc::new(StubProber::ok());
        let (cache, coordinator) = coordinator(prober, CacheConfig::default());

        let result = coordinator
            .scan_directory(
                Path::new("/nonexistent/vidcache/dir"),
                false,
                CancellationToken::new(),
            )
            .await;
        assert!(result.is_err());
        cache.close().await;
    }

    #[tokio::test]
    async fn test_cancelled_scan_does_not_mark_directory() {
        let dir = tempfile::tempdir().unwrap();
        make_files(dir.path(), &["a.mp4", "b.mp4", "c.mp4", "d.mp4"]);

        let prober = Arc::new(StubProber::ok().with_delay(Duration::from_millis(100)));
        let config = CacheConfig::builder().local_batch_size(2).build();
        let (cache, coordinator) = coordinator(prober, config);

        let token = CancellationToken::new();
        let rx = coordinator
            .scan_directory(dir.path(), false, token.clone())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
        drain(rx).await;

        assert!(!cache.has_scanned_directory(&dir.path().to_string_lossy()));
        cache.close().await;
    }
}
