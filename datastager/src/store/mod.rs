//! Persistence abstraction for cache entries and requests.
//!
//! Storage technology is out of scope for this crate: components depend on
//! the [`EntryStore`] and [`RequestStore`] traits, never on a concrete
//! backend. The in-memory implementations in [`memory`] back the shipped
//! service and the test suites; a database-backed store only needs to
//! implement the same narrow contracts (lookup, save, delete, the two
//! paginated filters and the aggregate size sums).

mod memory;

pub use memory::{MemoryEntryStore, MemoryRequestStore};

use crate::cache::CacheEntry;
use crate::product::ContentId;
use crate::request::{Request, RequestId};
use chrono::{DateTime, Utc};

/// Store of cache entries keyed by archive content id.
pub trait EntryStore: Send + Sync {
    /// Looks up an entry by content id.
    fn get(&self, id: &ContentId) -> Option<CacheEntry>;

    /// Inserts or replaces an entry.
    fn save(&self, entry: CacheEntry);

    /// Removes an entry. Missing ids are a no-op.
    fn delete(&self, id: &ContentId);

    /// One page of entries whose unlock time has passed, soonest unlock
    /// first. Eviction consumes these front-to-back, so there is no offset:
    /// each call re-reads the current head of the unlock order.
    fn unlocked_page(&self, before: DateTime<Utc>, page_size: usize) -> Vec<CacheEntry>;

    /// One page of entries still awaiting population: availability=false
    /// and retry count within the given ceiling. Ordered by content id so
    /// offset paging is stable across a scan.
    fn pending_page(&self, max_retries: u32, offset: usize, page_size: usize) -> Vec<CacheEntry>;

    /// Aggregate size of all entries (the cache's used bytes).
    fn total_size(&self) -> u64;

    /// Aggregate size of entries whose unlock time has passed.
    fn unlocked_size(&self, before: DateTime<Utc>) -> u64;
}

/// Store of requests keyed by request id.
pub trait RequestStore: Send + Sync {
    /// Looks up a request by id.
    fn get(&self, id: &RequestId) -> Option<Request>;

    /// Inserts or replaces a request.
    fn save(&self, request: Request);

    /// Ids of every known request, in no particular order.
    ///
    /// The scheduler snapshot uses this to append requests the queues have
    /// no record of.
    fn all_ids(&self) -> Vec<RequestId>;
}
