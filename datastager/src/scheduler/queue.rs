//! Per-category priority queue: ordered wait list plus bounded run set.
//!
//! Admin actions, worker completions and poll timers mutate a queue from
//! different tasks; every mutation runs its whole read-compute-write
//! sequence under the queue's single mutex so an abort can never interleave
//! with a concurrent reposition or pause.
//!
//! # Pausing with sentinels
//!
//! Pausing fills every free run slot with an inert sentinel entry (ids
//! under a reserved prefix) so no real request can start while in-flight
//! work drains naturally. A slot freed by a finishing request is refilled
//! with a sentinel as long as the queue is paused. Sentinels are included
//! in snapshots, so a paused queue stays paused across restarts. Unbounded
//! queues have no slots to fill; a single sentinel acts as the admission
//! gate.

use crate::request::RequestId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Reserved id prefix marking sentinel entries. Real request ids must
/// never start with this prefix.
pub const SENTINEL_PREFIX: &str = "#hold-";

/// True for ids under the reserved sentinel prefix.
pub fn is_sentinel(id: &RequestId) -> bool {
    id.as_str().starts_with(SENTINEL_PREFIX)
}

/// Queue mutation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The request is not on the wait list.
    #[error("request {0} is not waiting on this queue")]
    NotWaiting(RequestId),

    /// Running requests cannot be repositioned.
    #[error("request {0} is running and cannot be repositioned")]
    Running(RequestId),
}

/// A request occupying a run slot.
#[derive(Debug, Clone)]
pub struct RunningEntry {
    /// Request id, or a sentinel id while paused.
    pub id: RequestId,
    /// Admission time; orders the snapshot.
    pub started_at: DateTime<Utc>,
}

#[derive(Default)]
struct QueueState {
    waiting: Vec<RequestId>,
    running: Vec<RunningEntry>,
}

impl QueueState {
    fn is_paused(&self) -> bool {
        self.running.iter().any(|r| is_sentinel(&r.id))
    }
}

/// One category's queue.
pub struct CategoryQueue {
    name: String,
    /// Maximum concurrent real requests; `None` is unbounded (Immediate).
    limit: Option<usize>,
    state: Mutex<QueueState>,
    sentinel_seq: AtomicU64,
}

impl CategoryQueue {
    /// Creates a bounded queue with the given run-slot count.
    pub fn bounded(name: impl Into<String>, limit: usize) -> Self {
        Self {
            name: name.into(),
            limit: Some(limit),
            state: Mutex::new(QueueState::default()),
            sentinel_seq: AtomicU64::new(0),
        }
    }

    /// Creates an unbounded queue (the Immediate list).
    pub fn unbounded(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            limit: None,
            state: Mutex::new(QueueState::default()),
            sentinel_seq: AtomicU64::new(0),
        }
    }

    /// The queue's name, used in snapshots and sentinel ids.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends a request to the wait list.
    pub fn enqueue(&self, id: RequestId) {
        self.state.lock().waiting.push(id);
    }

    /// Inserts a request at a clamped wait-list position.
    pub fn enqueue_at(&self, id: RequestId, index: usize) {
        let mut state = self.state.lock();
        let index = index.min(state.waiting.len());
        state.waiting.insert(index, id);
    }

    /// Moves a waiting request to a clamped index.
    ///
    /// # Errors
    ///
    /// [`QueueError::Running`] if the request holds a run slot,
    /// [`QueueError::NotWaiting`] if it is not on this queue at all.
    pub fn reposition(&self, id: &RequestId, index: usize) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        if state.running.iter().any(|r| &r.id == id) {
            return Err(QueueError::Running(id.clone()));
        }
        let Some(current) = state.waiting.iter().position(|w| w == id) else {
            return Err(QueueError::NotWaiting(id.clone()));
        };
        let moved = state.waiting.remove(current);
        let index = index.min(state.waiting.len());
        state.waiting.insert(index, moved);
        Ok(())
    }

    /// Admits the next waiting request into a run slot, if one is free and
    /// the queue is not paused.
    pub fn try_admit(&self) -> Option<RequestId> {
        let mut state = self.state.lock();
        if state.is_paused() {
            return None;
        }
        if let Some(limit) = self.limit {
            if state.running.len() >= limit {
                return None;
            }
        }
        if state.waiting.is_empty() {
            return None;
        }
        let id = state.waiting.remove(0);
        state.running.push(RunningEntry {
            id: id.clone(),
            started_at: Utc::now(),
        });
        Some(id)
    }

    /// Releases a run slot. While paused, freed slots are immediately
    /// refilled with sentinels so the queue stays closed.
    pub fn finish(&self, id: &RequestId) {
        let mut state = self.state.lock();
        state.running.retain(|r| &r.id != id);
        if state.is_paused() {
            if let Some(limit) = self.limit {
                while state.running.len() < limit {
                    let sentinel = self.next_sentinel();
                    state.running.push(sentinel);
                }
            }
        }
    }

    /// Removes a request from the wait list. Returns false if absent.
    pub fn remove_waiting(&self, id: &RequestId) -> bool {
        let mut state = self.state.lock();
        let before = state.waiting.len();
        state.waiting.retain(|w| w != id);
        state.waiting.len() != before
    }

    /// True if the request holds a run slot.
    pub fn is_running(&self, id: &RequestId) -> bool {
        self.state.lock().running.iter().any(|r| &r.id == id)
    }

    /// True if the request is waiting or running here.
    pub fn contains(&self, id: &RequestId) -> bool {
        let state = self.state.lock();
        state.waiting.iter().any(|w| w == id) || state.running.iter().any(|r| &r.id == id)
    }

    /// Pauses the queue by filling every free run slot with a sentinel.
    /// Idempotent: pausing a paused queue changes nothing.
    pub fn pause(&self) {
        let mut state = self.state.lock();
        if state.is_paused() {
            return;
        }
        if let Some(limit) = self.limit {
            while state.running.len() < limit {
                let sentinel = self.next_sentinel();
                state.running.push(sentinel);
            }
        }
        // Every slot held a real request (or the queue is unbounded):
        // park one sentinel beyond the slots as the paused marker, so
        // freed slots refill instead of admitting work.
        if !state.is_paused() {
            let sentinel = self.next_sentinel();
            state.running.push(sentinel);
        }
    }

    /// Resumes the queue by dropping every sentinel.
    pub fn resume(&self) {
        self.state.lock().running.retain(|r| !is_sentinel(&r.id));
    }

    /// True while any sentinel occupies a run slot.
    pub fn is_paused(&self) -> bool {
        self.state.lock().is_paused()
    }

    /// Number of waiting requests.
    pub fn waiting_len(&self) -> usize {
        self.state.lock().waiting.len()
    }

    /// Number of real (non-sentinel) requests in run slots.
    pub fn running_len(&self) -> usize {
        self.state
            .lock()
            .running
            .iter()
            .filter(|r| !is_sentinel(&r.id))
            .count()
    }

    /// Ordered snapshot of the queue: run slots by admission time (with
    /// sentinels, so the paused state persists), then the wait list.
    pub fn snapshot_ids(&self) -> Vec<RequestId> {
        let state = self.state.lock();
        let mut running: Vec<&RunningEntry> = state.running.iter().collect();
        running.sort_by_key(|r| r.started_at);
        running
            .into_iter()
            .map(|r| r.id.clone())
            .chain(state.waiting.iter().cloned())
            .collect()
    }

    fn next_sentinel(&self) -> RunningEntry {
        let seq = self.sentinel_seq.fetch_add(1, Ordering::Relaxed);
        RunningEntry {
            id: RequestId::new(format!("{}{}-{}", SENTINEL_PREFIX, self.name, seq)),
            started_at: Utc::now(),
        }
    }
}
