//! Request scheduler: three categorized queues, a phase state machine and
//! crash-safe persistence.
//!
//! Routing at submission is cache-driven: a request whose files are all
//! already cached goes to the unbounded Immediate list; otherwise its
//! estimated size picks bounded Category A (small) or Category B (large).
//! Each category admits work through its own queue; workers run one
//! request to completion through the packaging pipeline.
//!
//! Admin actions (pause, resume, reposition, hold, release, retry, abort)
//! run on caller tasks concurrently with worker completions; every queue
//! serializes its mutations behind its own lock, and every mutating change
//! persists an ordered snapshot for restart.

mod queue;
mod snapshot;
mod worker;

pub use queue::{is_sentinel, CategoryQueue, QueueError, SENTINEL_PREFIX};
pub use snapshot::{QueueSnapshot, SchedulerSnapshot};
pub use worker::{Worker, WorkerOutcome};

use crate::cache::CacheStore;
use crate::config::SchedulerSettings;
use crate::launcher::BatchLauncher;
use crate::product::ContentId;
use crate::request::{PhaseError, Request, RequestId, RequestPhase};
use crate::store::{EntryStore, RequestStore};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long an interrupt waits for the worker before retrying once.
const INTERRUPT_GRACE: Duration = Duration::from_millis(500);

/// Poll step while waiting for an interrupted worker to stop.
const INTERRUPT_POLL: Duration = Duration::from_millis(20);

/// Routing category of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Fully cached requests; unbounded concurrency.
    Immediate,
    /// Requests at or under the size threshold; bounded.
    A,
    /// Requests over the size threshold; bounded.
    B,
}

impl Category {
    /// Queue name used in snapshots.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::A => "category-a",
            Self::B => "category-b",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Scheduler errors.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Action incompatible with the request's phase.
    #[error(transparent)]
    Phase(#[from] PhaseError),

    /// Queue mutation rejected.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// The request is not in the store.
    #[error("unknown request {0}")]
    UnknownRequest(RequestId),
}

/// Priority-queue scheduler over the three routing categories.
pub struct Scheduler {
    requests: Arc<dyn RequestStore>,
    entries: Arc<dyn EntryStore>,
    cache: Arc<CacheStore>,
    launcher: Arc<dyn BatchLauncher>,
    worker: Arc<Worker>,
    settings: SchedulerSettings,
    immediate: CategoryQueue,
    category_a: CategoryQueue,
    category_b: CategoryQueue,
    /// Cancellation tokens of requests currently held by workers.
    active: Mutex<HashMap<RequestId, CancellationToken>>,
}

impl Scheduler {
    /// Creates a scheduler.
    pub fn new(
        requests: Arc<dyn RequestStore>,
        entries: Arc<dyn EntryStore>,
        cache: Arc<CacheStore>,
        launcher: Arc<dyn BatchLauncher>,
        worker: Arc<Worker>,
        settings: SchedulerSettings,
    ) -> Arc<Self> {
        let immediate = CategoryQueue::unbounded(Category::Immediate.name());
        let category_a = CategoryQueue::bounded(Category::A.name(), settings.category_a_slots);
        let category_b = CategoryQueue::bounded(Category::B.name(), settings.category_b_slots);
        Arc::new(Self {
            requests,
            entries,
            cache,
            launcher,
            worker,
            settings,
            immediate,
            category_a,
            category_b,
            active: Mutex::new(HashMap::new()),
        })
    }

    /// Routes a request by cache completeness, then size.
    pub fn route(&self, request: &Request) -> Category {
        if self.cache.all_available(&request.products) {
            Category::Immediate
        } else if request.estimated_size() <= self.settings.category_size_threshold {
            Category::A
        } else {
            Category::B
        }
    }

    fn queue(&self, category: Category) -> &CategoryQueue {
        match category {
            Category::Immediate => &self.immediate,
            Category::A => &self.category_a,
            Category::B => &self.category_b,
        }
    }

    fn owning_queue(&self, id: &RequestId) -> Option<&CategoryQueue> {
        [&self.immediate, &self.category_a, &self.category_b]
            .into_iter()
            .find(|q| q.contains(id))
    }

    /// Submits a new request: stores it, routes it onto a queue and starts
    /// admission. Returns the routed category.
    pub fn submit(self: &Arc<Self>, mut request: Request) -> Category {
        let category = self.route(&request);
        request.phase = RequestPhase::Queued;
        info!(request = %request.id, category = %category, size = request.estimated_size(), "Request submitted");
        let id = request.id.clone();
        self.requests.save(request);
        self.queue(category).enqueue(id);
        self.persist_snapshot();
        self.pump();
        category
    }

    /// Admits waiting requests into free run slots across all queues and
    /// spawns a worker per admission.
    pub fn pump(self: &Arc<Self>) {
        let mut admitted = false;
        for category in [Category::Immediate, Category::A, Category::B] {
            while let Some(id) = self.queue(category).try_admit() {
                admitted = true;
                self.start_worker(category, id);
            }
        }
        if admitted {
            self.persist_snapshot();
        }
    }

    fn start_worker(self: &Arc<Self>, category: Category, id: RequestId) {
        let Some(mut request) = self.requests.get(&id) else {
            warn!(request = %id, "Admitted request missing from store");
            self.queue(category).finish(&id);
            return;
        };
        request.phase = RequestPhase::Executing;
        self.requests.save(request);

        let token = CancellationToken::new();
        self.active.lock().insert(id.clone(), token.clone());

        let scheduler = Arc::clone(self);
        let worker = Arc::clone(&self.worker);
        tokio::spawn(async move {
            let outcome = worker.run(&id, &token).await;
            debug!(request = %id, ?outcome, "Worker slot released");
            scheduler.active.lock().remove(&id);
            scheduler.queue(category).finish(&id);
            scheduler.persist_snapshot();
            scheduler.pump();
        });
    }

    /// Pauses a category: no new request starts, in-flight ones drain.
    /// Idempotent.
    pub fn pause(&self, category: Category) {
        self.queue(category).pause();
        self.persist_snapshot();
        info!(category = %category, "Queue paused");
    }

    /// Resumes a paused category.
    pub fn resume(self: &Arc<Self>, category: Category) {
        self.queue(category).resume();
        self.persist_snapshot();
        info!(category = %category, "Queue resumed");
        self.pump();
    }

    /// Moves a waiting request to a clamped wait-list index.
    pub fn reposition(&self, id: &RequestId, index: usize) -> Result<(), SchedulerError> {
        let queue = self
            .owning_queue(id)
            .ok_or_else(|| SchedulerError::UnknownRequest(id.clone()))?;
        queue.reposition(id, index)?;
        self.persist_snapshot();
        Ok(())
    }

    /// Parks a request. Pending/queued requests leave the wait list;
    /// an executing request is interrupted cooperatively but keeps its
    /// cache claims, and resubmits from scratch on release.
    pub async fn hold(self: &Arc<Self>, id: &RequestId) -> Result<(), SchedulerError> {
        let mut request = self
            .requests
            .get(id)
            .ok_or_else(|| SchedulerError::UnknownRequest(id.clone()))?;
        if !request.phase.can_hold() {
            return Err(PhaseError {
                id: id.clone(),
                phase: request.phase,
                action: "hold",
            }
            .into());
        }

        if let Some(queue) = self.owning_queue(id) {
            queue.remove_waiting(id);
        }
        if self.active.lock().contains_key(id) {
            self.interrupt_worker(id).await;
        }

        request.phase = RequestPhase::Held;
        self.requests.save(request);
        self.persist_snapshot();
        info!(request = %id, "Request held");
        Ok(())
    }

    /// Releases a held request back into scheduling as PENDING.
    pub fn release_hold(self: &Arc<Self>, id: &RequestId) -> Result<Category, SchedulerError> {
        let mut request = self
            .requests
            .get(id)
            .ok_or_else(|| SchedulerError::UnknownRequest(id.clone()))?;
        if request.phase != RequestPhase::Held {
            return Err(PhaseError {
                id: id.clone(),
                phase: request.phase,
                action: "release",
            }
            .into());
        }
        request.phase = RequestPhase::Pending;
        self.requests.save(request.clone());
        Ok(self.submit(request))
    }

    /// Requeues a terminal request.
    pub fn retry(self: &Arc<Self>, id: &RequestId) -> Result<Category, SchedulerError> {
        let mut request = self
            .requests
            .get(id)
            .ok_or_else(|| SchedulerError::UnknownRequest(id.clone()))?;
        if !request.phase.is_terminal() {
            return Err(PhaseError {
                id: id.clone(),
                phase: request.phase,
                action: "retry",
            }
            .into());
        }
        request.phase = RequestPhase::Pending;
        request.error_message = None;
        self.requests.save(request.clone());
        info!(request = %id, "Request retried");
        Ok(self.submit(request))
    }

    /// Aborts a request from any non-terminal phase.
    ///
    /// The owning queue is paused first so the abort cannot race an
    /// imminent start, the worker (if any) is interrupted with one retry,
    /// then the queue resumes. Cache claims are released: every referenced
    /// file unlocks to the cancellation time, and in-flight entries no
    /// other open request shares are cancelled at the launcher and deleted
    /// outright rather than waiting for eviction.
    pub async fn abort(self: &Arc<Self>, id: &RequestId) -> Result<(), SchedulerError> {
        let mut request = self
            .requests
            .get(id)
            .ok_or_else(|| SchedulerError::UnknownRequest(id.clone()))?;
        if request.phase.is_terminal() {
            return Err(PhaseError {
                id: id.clone(),
                phase: request.phase,
                action: "abort",
            }
            .into());
        }

        let owning = self.owning_queue(id);
        if let Some(queue) = owning {
            queue.pause();
            queue.remove_waiting(id);
        }
        if self.active.lock().contains_key(id) {
            self.interrupt_worker(id).await;
        }
        if let Some(queue) = owning {
            queue.resume();
        }

        request.phase = RequestPhase::Aborted;
        self.requests.save(request.clone());
        self.release_cache_claims(&request);
        self.persist_snapshot();
        info!(request = %id, "Request aborted");
        self.pump();
        Ok(())
    }

    /// Cancels the worker's token and waits for the slot to clear,
    /// retrying the interrupt once if the worker is still running.
    async fn interrupt_worker(&self, id: &RequestId) {
        for attempt in 0..2 {
            let Some(token) = self.active.lock().get(id).cloned() else {
                return;
            };
            token.cancel();
            let deadline = tokio::time::Instant::now() + INTERRUPT_GRACE;
            while tokio::time::Instant::now() < deadline {
                if !self.active.lock().contains_key(id) {
                    return;
                }
                tokio::time::sleep(INTERRUPT_POLL).await;
            }
            warn!(request = %id, attempt, "Worker still running after interrupt");
        }
    }

    /// Releases the cache claims of a closed request.
    fn release_cache_claims(&self, request: &Request) {
        let now = Utc::now();
        let mut ids: Vec<ContentId> = Vec::new();
        let mut seen: HashSet<ContentId> = HashSet::new();
        for product in &request.products {
            if seen.insert(product.id.clone()) {
                ids.push(product.id.clone());
            }
            if let Some(parent) = &product.parent {
                if seen.insert(parent.clone()) {
                    ids.push(parent.clone());
                }
            }
        }

        // Unlock to the cancellation time; entries another open request
        // still needs stay pinned by that request's expiry.
        self.cache.extend_unlock(&ids, now);

        for id in &ids {
            let Some(entry) = self.entries.get(id) else {
                continue;
            };
            let shared = entry.requests.iter().any(|r| {
                r != &request.id && self.requests.get(r).is_some_and(|req| req.phase.is_open())
            });
            if shared || entry.available {
                continue;
            }
            if let Some(job) = &entry.batch_job {
                if let Err(e) = self.launcher.cancel(job) {
                    warn!(entry = %id, job = %job, error = %e, "Batch job cancel failed");
                }
            }
            if let Err(e) = self.cache.release(id) {
                warn!(entry = %id, error = %e, "Entry release failed");
            }
        }
    }

    /// Writes the ordered snapshot sidecar. Persistence failures are
    /// logged, not fatal: the scheduler keeps serving with a stale file.
    fn persist_snapshot(&self) {
        let queues: Vec<QueueSnapshot> = [&self.immediate, &self.category_a, &self.category_b]
            .into_iter()
            .map(|q| QueueSnapshot {
                name: q.name().to_string(),
                entries: q.snapshot_ids().iter().map(|id| id.as_str().to_string()).collect(),
            })
            .collect();

        let queued: HashSet<String> = queues
            .iter()
            .flat_map(|q| q.entries.iter().cloned())
            .collect();
        let unaccounted: Vec<String> = self
            .requests
            .all_ids()
            .into_iter()
            .map(|id| id.as_str().to_string())
            .filter(|id| !queued.contains(id))
            .collect();

        let snapshot = SchedulerSnapshot { queues, unaccounted };
        if let Err(e) = snapshot.write_to(&self.settings.snapshot_path) {
            warn!(path = %self.settings.snapshot_path.display(), error = %e, "Snapshot write failed");
        }
    }

    /// Restores queues from the snapshot sidecar after a restart.
    ///
    /// Requests last seen PENDING, QUEUED or EXECUTING are rehydrated as
    /// PENDING and resubmitted in recorded order; HELD and terminal
    /// phases restore as-is. Sentinel ids restore the paused state.
    /// Returns the number of resubmitted requests.
    pub fn restore(self: &Arc<Self>) -> std::io::Result<usize> {
        let Some(snapshot) = SchedulerSnapshot::read_from(&self.settings.snapshot_path)? else {
            return Ok(0);
        };

        let mut resubmitted = 0;
        let ordered = snapshot
            .queues
            .iter()
            .flat_map(|q| q.entries.iter().map(move |e| (q.name.clone(), e.clone())))
            .chain(snapshot.unaccounted.iter().map(|e| (String::new(), e.clone())));

        for (queue_name, raw_id) in ordered {
            let id = RequestId::new(raw_id);
            if is_sentinel(&id) {
                // A persisted sentinel means the queue was paused.
                for category in [Category::Immediate, Category::A, Category::B] {
                    if category.name() == queue_name {
                        self.queue(category).pause();
                    }
                }
                continue;
            }
            let Some(mut request) = self.requests.get(&id) else {
                warn!(request = %id, "Snapshot references unknown request");
                continue;
            };
            match request.phase {
                RequestPhase::Pending | RequestPhase::Queued | RequestPhase::Executing => {
                    request.phase = RequestPhase::Pending;
                    self.requests.save(request.clone());
                    self.submit(request);
                    resubmitted += 1;
                }
                // Terminal and held phases restore as-is.
                _ => {}
            }
        }

        info!(resubmitted, "Scheduler state restored");
        self.persist_snapshot();
        self.pump();
        Ok(resubmitted)
    }

    /// Observability: waiting/running counts per category.
    pub fn depths(&self) -> HashMap<&'static str, (usize, usize)> {
        let mut depths = HashMap::new();
        for category in [Category::Immediate, Category::A, Category::B] {
            let queue = self.queue(category);
            depths.insert(category.name(), (queue.waiting_len(), queue.running_len()));
        }
        depths
    }

    /// True while a worker holds the request.
    pub fn is_executing(&self, id: &RequestId) -> bool {
        self.active.lock().contains_key(id)
    }

    /// True while the category's queue is paused.
    pub fn is_paused(&self, category: Category) -> bool {
        self.queue(category).is_paused()
    }
}
