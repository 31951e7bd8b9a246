//! Default values for all configuration settings.

/// Default maximum staging-cache capacity: 500 GB.
pub const DEFAULT_MAX_CAPACITY_BYTES: u64 = 500 * 1024 * 1024 * 1024;

/// Default unlock horizon for freshly reserved entries: 3 days.
///
/// A placeholder stays pinned at least this long; packaging extends the
/// unlock to the owning request's expiry once files land.
pub const DEFAULT_UNLOCK_HORIZON_SECS: i64 = 3 * 24 * 3600;

/// Default number of eviction candidates fetched per page.
pub const DEFAULT_EVICTION_PAGE_SIZE: usize = 100;

/// Default maximum download attempts before an entry is frozen.
pub const DEFAULT_MAX_DOWNLOAD_ATTEMPTS: u32 = 3;

/// Default orchestrator poll interval in seconds.
pub const DEFAULT_ORCHESTRATOR_POLL_SECS: u64 = 30;

/// Default number of pending entries scanned per orchestrator page.
pub const DEFAULT_ORCHESTRATOR_PAGE_SIZE: usize = 200;

/// Default pipeline poll interval in milliseconds.
pub const DEFAULT_PIPELINE_POLL_MS: u64 = 5_000;

/// Default number of files packaged per pipeline page.
pub const DEFAULT_PIPELINE_PAGE_SIZE: usize = 20;

/// Default size ceiling routing a request into Category A: 10 GB.
///
/// Requests above the ceiling go to Category B. The threshold is a single
/// deployment-tuned value, not a principle; revisit it with the size
/// distribution of the archive being served.
pub const DEFAULT_CATEGORY_SIZE_THRESHOLD: u64 = 10 * 1024 * 1024 * 1024;

/// Default concurrent workers for Category A.
pub const DEFAULT_CATEGORY_A_SLOTS: usize = 4;

/// Default concurrent workers for Category B.
pub const DEFAULT_CATEGORY_B_SLOTS: usize = 2;

/// Default expiry horizon granted to a completed request: 7 days.
pub const DEFAULT_EXPIRY_HORIZON_SECS: i64 = 7 * 24 * 3600;
