//! Cache entry record.

use crate::product::{ContentId, CutoutBounds, ProductKind};
use crate::request::RequestId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Cache-side record of one physical or in-flight file.
///
/// An entry is created as a *placeholder* (availability=false) when its
/// content is first requested, reserving capacity before the backing
/// download or generation completes. The unlock time is the earliest moment
/// the entry becomes eligible for eviction; every open request referencing
/// the entry keeps the unlock time at or beyond its own expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Archive content id.
    pub id: ContentId,
    /// Absolute path of the cached file.
    pub path: PathBuf,
    /// Size in bytes (estimated until the file lands, then observed).
    pub size: u64,
    /// Product kind.
    pub kind: ProductKind,
    /// False while the backing download/generation is in flight.
    pub available: bool,
    /// Id of the external batch job currently populating this entry.
    pub batch_job: Option<String>,
    /// Failed population attempts so far.
    pub retries: u32,
    /// Earliest eviction eligibility.
    pub unlock_at: DateTime<Utc>,
    /// Content id of the parent this entry is derived from.
    ///
    /// The orchestrator will not start this entry's generation job until
    /// the parent's entry is available.
    pub parent: Option<ContentId>,
    /// On-disk path of the parent, resolved during provenance lookup.
    pub source_path: Option<PathBuf>,
    /// Cutout geometry for generated kinds.
    pub bounds: Option<CutoutBounds>,
    /// Requests referencing this entry.
    pub requests: HashSet<RequestId>,
}

impl CacheEntry {
    /// Creates a placeholder entry awaiting population.
    pub fn placeholder(
        id: ContentId,
        kind: ProductKind,
        path: PathBuf,
        size: u64,
        unlock_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            path,
            size,
            kind,
            available: false,
            batch_job: None,
            retries: 0,
            unlock_at,
            parent: None,
            source_path: None,
            bounds: None,
            requests: HashSet::new(),
        }
    }

    /// Attaches the parent dependency edge.
    pub fn with_parent(mut self, parent: ContentId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Attaches cutout geometry.
    pub fn with_bounds(mut self, bounds: CutoutBounds) -> Self {
        self.bounds = Some(bounds);
        self
    }

    /// Registers a referencing request.
    pub fn add_request(&mut self, id: RequestId) {
        self.requests.insert(id);
    }

    /// True once the unlock time has passed.
    pub fn is_unlocked(&self, now: DateTime<Utc>) -> bool {
        self.unlock_at <= now
    }

    /// True once the retry budget is spent and the entry is frozen.
    pub fn is_exhausted(&self, max_retries: u32) -> bool {
        self.retries > max_retries
    }
}
