//! Capacity-bounded cache store with reservation and unlock-time eviction.
//!
//! The store owns the staging area's capacity accounting. Space is claimed
//! up front by registering placeholder entries; the download orchestrator
//! populates them later. Eviction reclaims unlocked entries in
//! soonest-unlock order: an entry is pinned exactly as long as some open
//! request still needs it (via its unlock time), and once unpinned the
//! oldest-expiring entry goes first, maximizing runway before the next
//! eviction is needed.
//!
//! # Concurrency
//!
//! `used` and `free` are derived from shared aggregate state, so the whole
//! reserve-evict-persist sequence runs under one mutex. Readers
//! (`is_available`, `all_available`) go straight to the entry store.

use crate::cache::entry::CacheEntry;
use crate::cache::error::CacheError;
use crate::cache::layout::StagingLayout;
use crate::config::CacheSettings;
use crate::product::{ContentId, ProductRef};
use crate::request::Request;
use crate::store::{EntryStore, RequestStore};
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of a reservation call.
#[derive(Debug, Clone, Default)]
pub struct Reservation {
    /// Bytes of requested content already available in the cache.
    pub cached_bytes: u64,
    /// Content ids for which placeholders were created by this call.
    pub created: Vec<ContentId>,
}

impl Reservation {
    /// True if this call created at least one placeholder.
    pub fn created_placeholders(&self) -> bool {
        !self.created.is_empty()
    }
}

/// Disk-backed cache store for staged data products.
pub struct CacheStore {
    entries: Arc<dyn EntryStore>,
    requests: Arc<dyn RequestStore>,
    layout: StagingLayout,
    settings: CacheSettings,
    /// Single-writer guard for the capacity accounting sequence.
    capacity_guard: Mutex<()>,
}

impl CacheStore {
    /// Creates a cache store over the given persistence backends.
    pub fn new(
        entries: Arc<dyn EntryStore>,
        requests: Arc<dyn RequestStore>,
        settings: CacheSettings,
    ) -> Self {
        let layout = StagingLayout::new(settings.root.clone());
        Self {
            entries,
            requests,
            layout,
            settings,
            capacity_guard: Mutex::new(()),
        }
    }

    /// The staging-area layout.
    pub fn layout(&self) -> &StagingLayout {
        &self.layout
    }

    /// The configured maximum download attempts.
    pub fn max_attempts(&self) -> u32 {
        self.settings.max_download_attempts
    }

    /// Aggregate size of all entries.
    pub fn used(&self) -> u64 {
        self.entries.total_size()
    }

    /// Capacity not claimed by any entry.
    pub fn free(&self) -> u64 {
        self.settings.max_capacity_bytes.saturating_sub(self.used())
    }

    /// True iff every requested file has an available entry.
    pub fn all_available(&self, files: &[ProductRef]) -> bool {
        files
            .iter()
            .all(|p| self.entries.get(&p.id).is_some_and(|e| e.available))
    }

    /// Availability of a single file.
    ///
    /// # Errors
    ///
    /// [`CacheError::NotReserved`] if no entry exists (space was never
    /// reserved), [`CacheError::RetriesExhausted`] once the retry budget is
    /// spent and the entry is permanently unavailable.
    pub fn is_available(&self, id: &ContentId) -> Result<bool, CacheError> {
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| CacheError::NotReserved(id.clone()))?;
        if entry.is_exhausted(self.settings.max_download_attempts) {
            return Err(CacheError::RetriesExhausted(id.clone()));
        }
        Ok(entry.available)
    }

    /// Reserves cache space for a page of files and registers the request
    /// against each entry.
    ///
    /// Files without an entry get a placeholder (availability=false,
    /// unlock = now + horizon). Existing entries get their unlock extended
    /// and the request reference added; an entry with a spent retry budget
    /// is reset to zero to force a fresh attempt. Derived products also
    /// ensure their parent original has an entry, deduplicated within one
    /// call so a shared parent is registered once.
    ///
    /// If placeholders were created, capacity is checked and unlocked
    /// entries are evicted (soonest unlock first) until the new claim fits.
    ///
    /// # Errors
    ///
    /// [`CacheError::CapacityExhausted`] when the claim cannot fit even
    /// after maximal eviction; [`CacheError::Inconsistent`] when an
    /// eviction page comes back empty while still short.
    pub fn reserve(
        &self,
        files: &[ProductRef],
        request: &Request,
    ) -> Result<Reservation, CacheError> {
        let _guard = self.capacity_guard.lock();
        let now = Utc::now();
        let horizon = now + TimeDelta::seconds(self.settings.unlock_horizon_secs);

        let mut seen: HashSet<ContentId> = HashSet::new();
        let mut placeholders: Vec<CacheEntry> = Vec::new();
        let mut reservation = Reservation::default();

        for product in files {
            if seen.insert(product.id.clone()) {
                self.register_one(product, request, horizon, &mut placeholders, &mut reservation);
            }
            // A derived product needs its parent original staged; register
            // the parent once per call even when several products share it.
            if let Some(parent) = &product.parent {
                if seen.insert(parent.clone()) {
                    let parent_ref = ProductRef::plain(
                        parent.clone(),
                        parent.as_str().to_string(),
                        product.size,
                    );
                    self.register_one(
                        &parent_ref,
                        request,
                        horizon,
                        &mut placeholders,
                        &mut reservation,
                    );
                }
            }
        }

        if placeholders.is_empty() {
            return Ok(reservation);
        }

        let required: u64 = placeholders.iter().map(|e| e.size).sum();
        self.make_room(required, now)?;

        for entry in placeholders {
            reservation.created.push(entry.id.clone());
            self.entries.save(entry);
        }

        debug!(
            request = %request.id,
            created = reservation.created.len(),
            required_bytes = required,
            cached_bytes = reservation.cached_bytes,
            "Cache reservation complete"
        );
        Ok(reservation)
    }

    /// Registers one product: mutates the existing entry or queues a
    /// placeholder for persistence after the capacity check.
    fn register_one(
        &self,
        product: &ProductRef,
        request: &Request,
        horizon: DateTime<Utc>,
        placeholders: &mut Vec<CacheEntry>,
        reservation: &mut Reservation,
    ) {
        match self.entries.get(&product.id) {
            Some(mut entry) => {
                entry.unlock_at = entry.unlock_at.max(horizon);
                if entry.is_exhausted(self.settings.max_download_attempts) {
                    info!(id = %entry.id, retries = entry.retries, "Resetting spent retry budget");
                    entry.retries = 0;
                }
                entry.add_request(request.id.clone());
                if entry.available {
                    reservation.cached_bytes += entry.size;
                }
                self.entries.save(entry);
            }
            None => {
                let path = if product.kind.is_generated_in_place() {
                    self.layout.request_path(&request.id, &product.file_name)
                } else {
                    self.layout
                        .shared_path(Utc::now().date_naive(), &product.file_name)
                };
                let mut entry = CacheEntry::placeholder(
                    product.id.clone(),
                    product.kind,
                    path,
                    product.size,
                    horizon,
                );
                entry.parent = product.parent.clone();
                entry.bounds = product.bounds.clone();
                entry.add_request(request.id.clone());
                placeholders.push(entry);
            }
        }
    }

    /// Evicts unlocked entries until `free >= required`.
    fn make_room(&self, required: u64, now: DateTime<Utc>) -> Result<(), CacheError> {
        let mut free = self.free();
        if free >= required {
            return Ok(());
        }

        let reclaimable = self.entries.unlocked_size(now);
        if free + reclaimable < required {
            return Err(CacheError::CapacityExhausted {
                required,
                free,
                reclaimable,
            });
        }

        while free < required {
            let page = self
                .entries
                .unlocked_page(now, self.settings.eviction_page_size);
            if page.is_empty() {
                return Err(CacheError::Inconsistent(format!(
                    "no eviction candidates while {} bytes short",
                    required - free
                )));
            }
            for entry in page {
                if free >= required {
                    break;
                }
                let size = entry.size;
                self.evict(&entry)?;
                free += size;
            }
        }
        Ok(())
    }

    /// Deletes an entry: its file and checksum, every request directory
    /// that referenced it (a request with a missing dependency is not
    /// completable), and the record itself.
    fn evict(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        StagingLayout::remove_with_checksum(&entry.path)?;
        for request_id in &entry.requests {
            self.layout.remove_request_dir(request_id)?;
        }
        self.entries.delete(&entry.id);
        info!(id = %entry.id, size = entry.size, unlock_at = %entry.unlock_at, "Evicted cache entry");
        Ok(())
    }

    /// Unconditionally deletes an entry.
    ///
    /// For use only when no other open request references the entry, e.g.
    /// during cancellation cleanup of an in-flight download.
    pub fn release(&self, id: &ContentId) -> Result<(), CacheError> {
        let Some(entry) = self.entries.get(id) else {
            return Ok(());
        };
        let open_refs = self.open_referencing(&entry);
        if !open_refs.is_empty() {
            warn!(id = %id, refs = open_refs.len(), "Releasing entry still referenced by open requests");
        }
        self.evict(&entry)
    }

    /// Hard-links cached files and their checksums into the request's
    /// output directory.
    ///
    /// Kinds the pipeline generates in place (catalogue, cutout, spectrum,
    /// error report, evaluation) are skipped: their files are already
    /// written inside the request directory.
    pub fn materialize_request_dir(
        &self,
        request: &Request,
        files: &[ProductRef],
    ) -> Result<(), CacheError> {
        let dir = self.layout.request_dir(&request.id);
        for product in files {
            if product.kind.is_generated_in_place() {
                continue;
            }
            let entry = self
                .entries
                .get(&product.id)
                .ok_or_else(|| CacheError::NotReserved(product.id.clone()))?;
            self.layout.link_into(&entry.path, &dir)?;
        }
        Ok(())
    }

    /// Extends unlock times, never below a live dependency.
    ///
    /// Each entry's unlock becomes `max(new_time, latest expiry of any
    /// still-open request referencing it)`. Missing entries are skipped;
    /// cancellation cleanup may already have removed them.
    pub fn extend_unlock(&self, ids: &[ContentId], new_time: DateTime<Utc>) {
        for id in ids {
            let Some(mut entry) = self.entries.get(id) else {
                debug!(id = %id, "extend_unlock: entry gone, skipping");
                continue;
            };
            let pinned = self
                .open_referencing(&entry)
                .iter()
                .map(|r| r.expires_at)
                .max();
            entry.unlock_at = match pinned {
                Some(expiry) => new_time.max(expiry),
                None => new_time,
            };
            self.entries.save(entry);
        }
    }

    /// Records the observed on-disk size of an available entry.
    ///
    /// Placeholder sizes are estimates; once a file lands, packaging pushes
    /// the real size back so the capacity accounting stays honest.
    pub fn refresh_size(&self, id: &ContentId) -> Result<u64, CacheError> {
        let Some(mut entry) = self.entries.get(id) else {
            return Err(CacheError::NotReserved(id.clone()));
        };
        let size = std::fs::metadata(&entry.path)?.len();
        entry.size = size;
        self.entries.save(entry);
        Ok(size)
    }

    /// Requests referencing the entry that are still open.
    fn open_referencing(&self, entry: &CacheEntry) -> Vec<Request> {
        entry
            .requests
            .iter()
            .filter_map(|id| self.requests.get(id))
            .filter(|r| r.phase.is_open())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::product::ProductKind;
    use crate::request::{DownloadMode, RequestId, RequestPhase};
    use crate::store::{MemoryEntryStore, MemoryRequestStore};
    use tempfile::TempDir;

    const KB: u64 = 1024;

    struct Fixture {
        _temp: TempDir,
        entries: Arc<MemoryEntryStore>,
        requests: Arc<MemoryRequestStore>,
        cache: CacheStore,
    }

    fn fixture(capacity: u64) -> Fixture {
        let temp = TempDir::new().unwrap();
        let entries = Arc::new(MemoryEntryStore::new());
        let requests = Arc::new(MemoryRequestStore::new());
        let settings = CacheSettings::default()
            .with_root(temp.path())
            .with_capacity(capacity)
            .with_max_attempts(3);
        let cache = CacheStore::new(entries.clone(), requests.clone(), settings);
        Fixture {
            _temp: temp,
            entries,
            requests,
            cache,
        }
    }

    fn request(id: &str, products: Vec<ProductRef>) -> Request {
        let now = Utc::now();
        Request::new(
            id,
            DownloadMode::Direct,
            now,
            now + TimeDelta::days(7),
            products,
        )
    }

    /// Inserts an available entry backed by a real file.
    fn seed_available(fx: &Fixture, id: &str, size: u64, unlock_offset_secs: i64) -> CacheEntry {
        let date = Utc::now().date_naive();
        let path = fx.cache.layout().shared_path(date, &format!("{id}.fits"));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, vec![0u8; size as usize]).unwrap();
        std::fs::write(StagingLayout::checksum_path(&path), b"digest").unwrap();

        let mut entry = CacheEntry::placeholder(
            ContentId::new(id),
            ProductKind::Plain,
            path,
            size,
            Utc::now() + TimeDelta::seconds(unlock_offset_secs),
        );
        entry.available = true;
        fx.entries.save(entry.clone());
        entry
    }

    #[test]
    fn test_reserve_creates_placeholders() {
        let fx = fixture(1000 * KB);
        let req = request("req-1", vec![ProductRef::plain("obs-1", "obs-1.fits", KB)]);

        let reservation = fx.cache.reserve(&req.products, &req).unwrap();
        assert!(reservation.created_placeholders());
        assert_eq!(reservation.cached_bytes, 0);

        let entry = fx.entries.get(&ContentId::new("obs-1")).unwrap();
        assert!(!entry.available);
        assert!(entry.requests.contains(&RequestId::new("req-1")));
    }

    #[test]
    fn test_reserve_existing_entry_counts_cached_bytes() {
        let fx = fixture(1000 * KB);
        seed_available(&fx, "obs-1", 5 * KB, 600);
        let req = request(
            "req-1",
            vec![ProductRef::plain("obs-1", "obs-1.fits", 5 * KB)],
        );

        let reservation = fx.cache.reserve(&req.products, &req).unwrap();
        assert!(!reservation.created_placeholders());
        assert_eq!(reservation.cached_bytes, 5 * KB);
    }

    #[test]
    fn test_reserve_resets_spent_retry_budget() {
        let fx = fixture(1000 * KB);
        let mut entry = seed_available(&fx, "obs-1", KB, 600);
        entry.available = false;
        entry.retries = 4; // beyond max_attempts=3
        fx.entries.save(entry);

        let req = request("req-1", vec![ProductRef::plain("obs-1", "obs-1.fits", KB)]);
        fx.cache.reserve(&req.products, &req).unwrap();

        assert_eq!(fx.entries.get(&ContentId::new("obs-1")).unwrap().retries, 0);
    }

    #[test]
    fn test_shared_parent_registered_once() {
        let fx = fixture(1000 * KB);
        let products = vec![
            ProductRef::derived("obs-1#a", ProductKind::Cutout, "a.fits", KB, "obs-1"),
            ProductRef::derived("obs-1#b", ProductKind::Cutout, "b.fits", KB, "obs-1"),
        ];
        let req = request("req-1", products.clone());

        let reservation = fx.cache.reserve(&products, &req).unwrap();
        // Two cutouts + one shared parent.
        assert_eq!(reservation.created.len(), 3);
        assert!(fx.entries.get(&ContentId::new("obs-1")).is_some());
    }

    // Capacity 1000KB, 900KB used and nothing unlocked: a claim beyond
    // the free headroom fails. With enough unlocked it succeeds, evicting
    // exactly enough oldest-unlock entries.
    #[test]
    fn test_capacity_exhausted_when_nothing_unlocked() {
        let fx = fixture(1000 * KB);
        seed_available(&fx, "pinned", 900 * KB, 3600);

        let req = request(
            "req-1",
            vec![ProductRef::plain("new", "new.fits", 150 * KB)],
        );
        let err = fx.cache.reserve(&req.products, &req).unwrap_err();
        assert!(err.is_capacity());
    }

    #[test]
    fn test_eviction_frees_exactly_enough_oldest_first() {
        let fx = fixture(1000 * KB);
        seed_available(&fx, "pinned", 700 * KB, 3600);
        seed_available(&fx, "old", 100 * KB, -300);
        seed_available(&fx, "newer", 100 * KB, -10);

        let req = request(
            "req-1",
            vec![ProductRef::plain("new", "new.fits", 150 * KB)],
        );
        fx.cache.reserve(&req.products, &req).unwrap();

        // free was 100KB; evicting "old" (oldest unlock) covers 150KB.
        assert!(fx.entries.get(&ContentId::new("old")).is_none());
        assert!(fx.entries.get(&ContentId::new("newer")).is_some());
        assert!(fx.entries.get(&ContentId::new("new")).is_some());
    }

    // P1: used + free == capacity, used <= capacity.
    #[test]
    fn test_capacity_conservation() {
        let capacity = 1000 * KB;
        let fx = fixture(capacity);
        seed_available(&fx, "a", 300 * KB, -60);
        seed_available(&fx, "b", 300 * KB, 3600);

        assert_eq!(fx.cache.used() + fx.cache.free(), capacity);

        let req = request(
            "req-1",
            vec![ProductRef::plain("c", "c.fits", 500 * KB)],
        );
        fx.cache.reserve(&req.products, &req).unwrap();

        assert_eq!(fx.cache.used() + fx.cache.free(), capacity);
        assert!(fx.cache.used() <= capacity);
    }

    // P3: evicting an entry removes every request directory referencing it.
    #[test]
    fn test_eviction_cascades_request_dirs() {
        let fx = fixture(1000 * KB);
        let mut entry = seed_available(&fx, "shared", 900 * KB, -60);
        entry.add_request(RequestId::new("old-req-1"));
        entry.add_request(RequestId::new("old-req-2"));
        fx.entries.save(entry.clone());

        for id in ["old-req-1", "old-req-2"] {
            let dir = fx.cache.layout().request_dir(&RequestId::new(id));
            std::fs::create_dir_all(&dir).unwrap();
        }

        let req = request(
            "req-1",
            vec![ProductRef::plain("new", "new.fits", 500 * KB)],
        );
        fx.cache.reserve(&req.products, &req).unwrap();

        assert!(fx.entries.get(&ContentId::new("shared")).is_none());
        assert!(!entry.path.exists());
        for id in ["old-req-1", "old-req-2"] {
            assert!(!fx.cache.layout().request_dir(&RequestId::new(id)).exists());
        }
    }

    // P4: exhausted retries surface as an error, not `false`.
    #[test]
    fn test_is_available_errors() {
        let fx = fixture(1000 * KB);
        assert!(matches!(
            fx.cache.is_available(&ContentId::new("missing")),
            Err(CacheError::NotReserved(_))
        ));

        let mut entry = seed_available(&fx, "spent", KB, 600);
        entry.available = false;
        entry.retries = 4;
        fx.entries.save(entry);
        assert!(matches!(
            fx.cache.is_available(&ContentId::new("spent")),
            Err(CacheError::RetriesExhausted(_))
        ));
    }

    #[test]
    fn test_all_available() {
        let fx = fixture(1000 * KB);
        seed_available(&fx, "a", KB, 600);
        let products = vec![
            ProductRef::plain("a", "a.fits", KB),
            ProductRef::plain("b", "b.fits", KB),
        ];
        assert!(!fx.cache.all_available(&products));

        seed_available(&fx, "b", KB, 600);
        assert!(fx.cache.all_available(&products));
    }

    // P6: unlock never moves below the latest expiry of an open request.
    #[test]
    fn test_extend_unlock_respects_live_dependency() {
        let fx = fixture(1000 * KB);
        let mut entry = seed_available(&fx, "obs-1", KB, 600);

        let open = request("open-req", vec![]);
        let open_expiry = open.expires_at;
        fx.requests.save(open.clone());
        entry.add_request(open.id.clone());
        fx.entries.save(entry);

        // Attempt to unlock "now": pinned by the open request's expiry.
        fx.cache.extend_unlock(&[ContentId::new("obs-1")], Utc::now());
        let entry = fx.entries.get(&ContentId::new("obs-1")).unwrap();
        assert_eq!(entry.unlock_at, open_expiry);

        // Once the request closes, the unlock follows the new time.
        let mut closed = open;
        closed.phase = RequestPhase::Aborted;
        fx.requests.save(closed);
        let now = Utc::now();
        fx.cache.extend_unlock(&[ContentId::new("obs-1")], now);
        assert_eq!(fx.entries.get(&ContentId::new("obs-1")).unwrap().unlock_at, now);
    }

    #[test]
    fn test_materialize_links_shared_and_skips_in_place() {
        let fx = fixture(1000 * KB);
        seed_available(&fx, "obs-1", KB, 600);
        let products = vec![
            ProductRef::plain("obs-1", "obs-1.fits", KB),
            ProductRef::derived("obs-1#cat", ProductKind::Catalogue, "cat.csv", KB, "obs-1"),
        ];
        let req = request("req-1", products.clone());

        fx.cache.materialize_request_dir(&req, &products).unwrap();

        let dir = fx.cache.layout().request_dir(&req.id);
        assert!(dir.join("obs-1.fits").exists());
        assert!(dir.join("obs-1.fits.sha256").exists());
        // The catalogue is generated in place by the pipeline; nothing to link.
        assert!(!dir.join("cat.csv").exists());
    }

    #[test]
    fn test_release_removes_entry_and_file() {
        let fx = fixture(1000 * KB);
        let entry = seed_available(&fx, "obs-1", KB, 3600);

        fx.cache.release(&ContentId::new("obs-1")).unwrap();
        assert!(fx.entries.get(&ContentId::new("obs-1")).is_none());
        assert!(!entry.path.exists());
    }

    #[test]
    fn test_refresh_size_reads_disk() {
        let fx = fixture(1000 * KB);
        let entry = seed_available(&fx, "obs-1", KB, 600);
        std::fs::write(&entry.path, vec![0u8; 2048]).unwrap();

        let size = fx.cache.refresh_size(&ContentId::new("obs-1")).unwrap();
        assert_eq!(size, 2048);
        assert_eq!(fx.entries.get(&ContentId::new("obs-1")).unwrap().size, 2048);
    }
}
