//! Settings structs for all configuration sections.
//!
//! Each struct represents one `[section]` of the INI config file. These are
//! pure data types; parsing lives in [`super::file`].

use super::defaults::*;
use std::path::PathBuf;

/// Complete application configuration loaded from config.ini.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    /// Cache settings
    pub cache: CacheSettings,
    /// Download orchestrator settings
    pub orchestrator: OrchestratorSettings,
    /// Packaging pipeline settings
    pub pipeline: PipelineSettings,
    /// Scheduler settings
    pub scheduler: SchedulerSettings,
}

/// Cache store configuration.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Staging-area root directory.
    pub root: PathBuf,
    /// Maximum cache capacity in bytes.
    pub max_capacity_bytes: u64,
    /// Unlock horizon for fresh reservations, seconds.
    pub unlock_horizon_secs: i64,
    /// Eviction candidates fetched per page.
    pub eviction_page_size: usize,
    /// Maximum download attempts before an entry is frozen.
    pub max_download_attempts: u32,
}

impl Default for CacheSettings {
    fn default() -> Self {
        let root = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("datastager");
        Self {
            root,
            max_capacity_bytes: DEFAULT_MAX_CAPACITY_BYTES,
            unlock_horizon_secs: DEFAULT_UNLOCK_HORIZON_SECS,
            eviction_page_size: DEFAULT_EVICTION_PAGE_SIZE,
            max_download_attempts: DEFAULT_MAX_DOWNLOAD_ATTEMPTS,
        }
    }
}

impl CacheSettings {
    /// Sets the staging root.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Sets the capacity in bytes.
    pub fn with_capacity(mut self, bytes: u64) -> Self {
        self.max_capacity_bytes = bytes;
        self
    }

    /// Sets the unlock horizon in seconds.
    pub fn with_unlock_horizon_secs(mut self, secs: i64) -> Self {
        self.unlock_horizon_secs = secs;
        self
    }

    /// Sets the maximum download attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_download_attempts = attempts;
        self
    }
}

/// Download orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Poll cycle interval in seconds.
    pub poll_interval_secs: u64,
    /// Pending entries scanned per page.
    pub page_size: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_ORCHESTRATOR_POLL_SECS,
            page_size: DEFAULT_ORCHESTRATOR_PAGE_SIZE,
        }
    }
}

/// Packaging pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Sleep between poll-until-complete scans, milliseconds.
    pub poll_interval_ms: u64,
    /// Files packaged per page.
    pub page_size: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_PIPELINE_POLL_MS,
            page_size: DEFAULT_PIPELINE_PAGE_SIZE,
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Size ceiling for Category A routing, bytes.
    pub category_size_threshold: u64,
    /// Concurrent workers for Category A.
    pub category_a_slots: usize,
    /// Concurrent workers for Category B.
    pub category_b_slots: usize,
    /// Expiry horizon granted to completed requests, seconds.
    pub expiry_horizon_secs: i64,
    /// Snapshot sidecar file for crash-safe queue persistence.
    pub snapshot_path: PathBuf,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        let snapshot_path = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("datastager")
            .join("queues.json");
        Self {
            category_size_threshold: DEFAULT_CATEGORY_SIZE_THRESHOLD,
            category_a_slots: DEFAULT_CATEGORY_A_SLOTS,
            category_b_slots: DEFAULT_CATEGORY_B_SLOTS,
            expiry_horizon_secs: DEFAULT_EXPIRY_HORIZON_SECS,
            snapshot_path,
        }
    }
}

impl SchedulerSettings {
    /// Sets the Category A size threshold.
    pub fn with_threshold(mut self, bytes: u64) -> Self {
        self.category_size_threshold = bytes;
        self
    }

    /// Sets the per-category slot counts.
    pub fn with_slots(mut self, category_a: usize, category_b: usize) -> Self {
        self.category_a_slots = category_a;
        self.category_b_slots = category_b;
        self
    }

    /// Sets the snapshot sidecar path.
    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = path.into();
        self
    }
}
