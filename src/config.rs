//! Configuration for the metadata cache

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Default fraction of invalid rows treated as systemic corruption
pub const DEFAULT_CORRUPTION_THRESHOLD: f64 = 0.05;

/// Default probe batch size for local volumes
pub const DEFAULT_LOCAL_BATCH_SIZE: usize = 5;

/// Default probe batch size for network-mounted volumes
pub const DEFAULT_NETWORK_BATCH_SIZE: usize = 3;

/// Default delay between batches on network volumes (milliseconds)
pub const DEFAULT_NETWORK_BATCH_DELAY_MS: u64 = 150;

/// Default replication push interval (seconds)
pub const DEFAULT_REPLICATION_INTERVAL_SECS: u64 = 30;

/// Default freshness window for directory-scan records (seconds)
pub const DEFAULT_DIRECTORY_SCAN_TTL_SECS: i64 = 24 * 3600;

/// Configuration for the cache, scanner and replication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether the store and scanned directories live on a network mount
    ///
    /// Decided once at startup by the injected network predicate; tunes
    /// batch sizes and replication, never correctness.
    pub network: bool,

    /// Fraction of invalid rows above which the whole store is rebuilt
    pub corruption_threshold: f64,

    /// Probe batch size on local volumes
    pub local_batch_size: usize,

    /// Probe batch size on network volumes (lower I/O parallelism tolerance)
    pub network_batch_size: usize,

    /// Delay between batches on network volumes (milliseconds)
    pub network_batch_delay_ms: u64,

    /// Replication push interval (seconds)
    pub replication_interval_secs: u64,

    /// Freshness window for directory-scan records (seconds)
    pub directory_scan_ttl_secs: i64,

    /// Video file extensions recognised during directory scans
    pub extensions: HashSet<String>,

    /// Directory names skipped during enumeration
    pub ignore_dirs: HashSet<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            network: false,
            corruption_threshold: DEFAULT_CORRUPTION_THRESHOLD,
            local_batch_size: DEFAULT_LOCAL_BATCH_SIZE,
            network_batch_size: DEFAULT_NETWORK_BATCH_SIZE,
            network_batch_delay_ms: DEFAULT_NETWORK_BATCH_DELAY_MS,
            replication_interval_secs: DEFAULT_REPLICATION_INTERVAL_SECS,
            directory_scan_ttl_secs: DEFAULT_DIRECTORY_SCAN_TTL_SECS,
            extensions: Self::default_video_extensions(),
            ignore_dirs: Self::default_ignore_dirs(),
        }
    }
}

impl CacheConfig {
    /// Create a config builder
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::new()
    }

    /// Get the default video extensions
    pub fn default_video_extensions() -> HashSet<String> {
        [
            "mp4", "mkv", "avi", "wmv", "flv", "mov", "webm", "m4v", "ts", "rmvb", "mpg", "mpeg",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    /// Get the default directories to ignore
    pub fn default_ignore_dirs() -> HashSet<String> {
        [
            "$RECYCLE.BIN",
            "System Volume Information",
            ".Trash",
            ".Trash-1000",
            "@eaDir",
            ".git",
            "node_modules",
            ".cache",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    /// Check if an extension counts as a video file
    pub fn should_include_extension(&self, ext: &str) -> bool {
        self.extensions.contains(&ext.to_lowercase())
    }

    /// Check if a directory should be skipped during enumeration
    pub fn should_ignore_dir(&self, name: &str) -> bool {
        if name.starts_with('.') {
            return true;
        }
        self.ignore_dirs.contains(name)
    }

    /// Effective probe batch size for the configured volume type
    pub fn batch_size(&self) -> usize {
        if self.network {
            self.network_batch_size.max(1)
        } else {
            self.local_batch_size.max(1)
        }
    }

    /// Effective delay between batches (zero on local volumes)
    pub fn batch_delay(&self) -> std::time::Duration {
        if self.network {
            std::time::Duration::from_millis(self.network_batch_delay_ms)
        } else {
            std::time::Duration::ZERO
        }
    }

    /// Replication push interval
    pub fn replication_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.replication_interval_secs)
    }
}

/// Builder for CacheConfig
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether paths are network-mounted
    pub fn network(mut self, network: bool) -> Self {
        self.config.network = network;
        self
    }

    /// Set the systemic-corruption threshold
    pub fn corruption_threshold(mut self, threshold: f64) -> Self {
        self.config.corruption_threshold = threshold;
        self
    }

    /// Set the local probe batch size
    pub fn local_batch_size(mut self, size: usize) -> Self {
        self.config.local_batch_size = size;
        self
    }

    /// Set the network probe batch size
    pub fn network_batch_size(mut self, size: usize) -> Self {
        self.config.network_batch_size = size;
        self
    }

    /// Set the delay between batches on network volumes
    pub fn network_batch_delay_ms(mut self, ms: u64) -> Self {
        self.config.network_batch_delay_ms = ms;
        self
    }

    /// Set the replication push interval
    pub fn replication_interval_secs(mut self, secs: u64) -> Self {
        self.config.replication_interval_secs = secs;
        self
    }

    /// Set the directory-scan freshness window
    pub fn directory_scan_ttl_secs(mut self, secs: i64) -> Self {
        self.config.directory_scan_ttl_secs = secs;
        self
    }

    /// Set the video extension whitelist
    pub fn extensions(mut self, extensions: HashSet<String>) -> Self {
        self.config.extensions = extensions;
        self
    }

    /// Add a directory name to ignore
    pub fn add_ignore_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.ignore_dirs.insert(dir.into());
        self
    }

    /// Build the config
    pub fn build(self) -> CacheConfig {
        self.config
    }
}
