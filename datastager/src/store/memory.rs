//! In-memory store implementations.
//!
//! Backing maps live behind `parking_lot` read-write locks. The paginated
//! filters sort on every call; entry counts here are bounded by cache
//! capacity, not archive size, so the simplicity wins over an index.

use super::{EntryStore, RequestStore};
use crate::cache::CacheEntry;
use crate::product::ContentId;
use crate::request::{Request, RequestId};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

/// In-memory [`EntryStore`].
#[derive(Default)]
pub struct MemoryEntryStore {
    entries: RwLock<HashMap<ContentId, CacheEntry>>,
}

impl MemoryEntryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl EntryStore for MemoryEntryStore {
    fn get(&self, id: &ContentId) -> Option<CacheEntry> {
        self.entries.read().get(id).cloned()
    }

    fn save(&self, entry: CacheEntry) {
        self.entries.write().insert(entry.id.clone(), entry);
    }

    fn delete(&self, id: &ContentId) {
        self.entries.write().remove(id);
    }

    fn unlocked_page(&self, before: DateTime<Utc>, page_size: usize) -> Vec<CacheEntry> {
        let entries = self.entries.read();
        let mut unlocked: Vec<CacheEntry> = entries
            .values()
            .filter(|e| e.unlock_at <= before)
            .cloned()
            .collect();
        unlocked.sort_by(|a, b| {
            a.unlock_at
                .cmp(&b.unlock_at)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
        unlocked.truncate(page_size);
        unlocked
    }

    fn pending_page(&self, max_retries: u32, offset: usize, page_size: usize) -> Vec<CacheEntry> {
        let entries = self.entries.read();
        let mut pending: Vec<CacheEntry> = entries
            .values()
            .filter(|e| !e.available && e.retries <= max_retries)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        pending.into_iter().skip(offset).take(page_size).collect()
    }

    fn total_size(&self) -> u64 {
        self.entries.read().values().map(|e| e.size).sum()
    }

    fn unlocked_size(&self, before: DateTime<Utc>) -> u64 {
        self.entries
            .read()
            .values()
            .filter(|e| e.unlock_at <= before)
            .map(|e| e.size)
            .sum()
    }
}

/// In-memory [`RequestStore`].
#[derive(Default)]
pub struct MemoryRequestStore {
    requests: RwLock<HashMap<RequestId, Request>>,
}

impl MemoryRequestStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RequestStore for MemoryRequestStore {
    fn get(&self, id: &RequestId) -> Option<Request> {
        self.requests.read().get(id).cloned()
    }

    fn save(&self, request: Request) {
        self.requests.write().insert(request.id.clone(), request);
    }

    fn all_ids(&self) -> Vec<RequestId> {
        let mut ids: Vec<RequestId> = self.requests.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}
