//! Download orchestrator: populates in-flight cache entries.
//!
//! A single periodic task pages through entries awaiting population
//! (availability=false, retry budget not spent) and drives each through an
//! implicit state machine:
//!
//! ```text
//! placeholder ──start──► downloading ──success──► available
//!      ▲                     │
//!      └──── new job id ◄── failure (retry count += 1)
//!
//! retry count > max ──► exhausted (frozen, never retried again)
//! ```
//!
//! Entries with a parent dependency edge (cutouts, spectra, bundle
//! members) are skipped until the parent's own entry is available, so a
//! generation job never starts against an unstaged source.

mod daemon;

pub use daemon::run_orchestrator_daemon;

use crate::cache::CacheEntry;
use crate::config::OrchestratorSettings;
use crate::launcher::{BatchJobSpec, BatchLauncher, BatchStatus, StartOutcome};
use crate::product::ProductKind;
use crate::services::write_checksum;
use crate::store::EntryStore;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of one poll cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct PollStats {
    /// Entries scanned.
    pub scanned: usize,
    /// Batch jobs started (fresh or retry).
    pub started: usize,
    /// Entries marked available.
    pub completed: usize,
    /// Failures observed (including finished jobs with missing output).
    pub failed: usize,
    /// Entries skipped waiting on a parent.
    pub waiting_on_parent: usize,
}

/// Polls in-flight entries and manages their batch jobs.
pub struct DownloadOrchestrator {
    entries: Arc<dyn EntryStore>,
    launcher: Arc<dyn BatchLauncher>,
    settings: OrchestratorSettings,
    max_attempts: u32,
}

impl DownloadOrchestrator {
    /// Creates an orchestrator over the given entry store and launcher.
    pub fn new(
        entries: Arc<dyn EntryStore>,
        launcher: Arc<dyn BatchLauncher>,
        settings: OrchestratorSettings,
        max_attempts: u32,
    ) -> Self {
        Self {
            entries,
            launcher,
            settings,
            max_attempts,
        }
    }

    /// The configured poll interval in seconds.
    pub fn poll_interval_secs(&self) -> u64 {
        self.settings.poll_interval_secs
    }

    /// Runs one poll cycle over all pending entries.
    pub fn poll_cycle(&self) -> PollStats {
        let mut stats = PollStats::default();
        let mut offset = 0;
        loop {
            let page = self
                .entries
                .pending_page(self.max_attempts, offset, self.settings.page_size);
            if page.is_empty() {
                break;
            }
            offset += page.len();
            for entry in page {
                stats.scanned += 1;
                self.handle_entry(entry, &mut stats);
            }
        }
        if stats.scanned > 0 {
            debug!(
                scanned = stats.scanned,
                started = stats.started,
                completed = stats.completed,
                failed = stats.failed,
                waiting_on_parent = stats.waiting_on_parent,
                "Download poll cycle complete"
            );
        }
        stats
    }

    fn handle_entry(&self, mut entry: CacheEntry, stats: &mut PollStats) {
        // Parent dependency edge: a derived entry waits until its source
        // is staged. No penalty, the next cycle rechecks.
        if let Some(parent) = &entry.parent {
            let parent_ready = self.entries.get(parent).is_some_and(|p| p.available);
            if !parent_ready {
                stats.waiting_on_parent += 1;
                return;
            }
        }

        let status = match &entry.batch_job {
            Some(id) => match self.launcher.status(id) {
                Ok(status) => status,
                Err(e) => {
                    warn!(id = %entry.id, error = %e, "Status query failed, will recheck");
                    return;
                }
            },
            None => None,
        };

        match status {
            // No job yet, or the launcher has no record of the id (a
            // throttled admission): attempt a start without penalty.
            None => self.start_job(&mut entry, stats),
            Some(BatchStatus::Running) => {}
            Some(BatchStatus::Failed { cause }) => {
                warn!(id = %entry.id, retries = entry.retries, cause = %cause, "Batch job failed");
                self.record_failure(&mut entry, stats);
            }
            Some(BatchStatus::Finished) => {
                if entry.path.exists() {
                    self.mark_available(&mut entry, stats);
                } else {
                    // The tool claimed success without producing output.
                    warn!(id = %entry.id, path = %entry.path.display(), "Job finished but output missing");
                    self.record_failure(&mut entry, stats);
                }
            }
        }
    }

    /// Increments the retry count and, if budget remains, starts a fresh
    /// attempt under a new job id.
    fn record_failure(&self, entry: &mut CacheEntry, stats: &mut PollStats) {
        stats.failed += 1;
        entry.retries += 1;
        if entry.is_exhausted(self.max_attempts) {
            info!(id = %entry.id, retries = entry.retries, "Retry budget spent, freezing entry");
            self.entries.save(entry.clone());
            return;
        }
        self.start_job(entry, stats);
    }

    fn start_job(&self, entry: &mut CacheEntry, stats: &mut PollStats) {
        let Some(spec) = self.build_spec(entry) else {
            warn!(id = %entry.id, "Cannot build batch job spec, counting as failed attempt");
            entry.retries += 1;
            self.entries.save(entry.clone());
            return;
        };

        // Entry id + start time + retry count: unique across restarts.
        let job_id = format!(
            "{}-{}-{}",
            entry.id,
            Utc::now().timestamp_millis(),
            entry.retries
        );

        match self.launcher.start(&job_id, &spec) {
            Ok(StartOutcome::Started) => {
                debug!(id = %entry.id, job_id = %job_id, "Batch job started");
                entry.batch_job = Some(job_id);
                stats.started += 1;
                self.entries.save(entry.clone());
            }
            Ok(StartOutcome::Throttled) => {
                // Admission throttled: leave the retry count untouched.
                debug!(id = %entry.id, "Batch job admission throttled");
            }
            Err(e) => {
                // A throwing start counts as a failed attempt, so a
                // persistently broken configuration cannot spin forever.
                warn!(id = %entry.id, error = %e, "Batch job start failed");
                entry.retries += 1;
                stats.failed += 1;
                self.entries.save(entry.clone());
            }
        }
    }

    /// Builds the batch job description for an entry.
    ///
    /// Returns `None` when required inputs are missing (a generated kind
    /// without bounds, a derived kind whose parent entry disappeared).
    fn build_spec(&self, entry: &CacheEntry) -> Option<BatchJobSpec> {
        match entry.kind {
            ProductKind::Cutout | ProductKind::GeneratedSpectrum => Some(BatchJobSpec::Generate {
                source_path: self.parent_path(entry)?,
                destination: entry.path.clone(),
                bounds: entry.bounds.clone()?,
            }),
            ProductKind::Encapsulated if entry.parent.is_some() => Some(BatchJobSpec::Extract {
                bundle_path: self.parent_path(entry)?,
                member: entry.id.clone(),
                destination: entry.path.clone(),
            }),
            _ => Some(BatchJobSpec::Retrieve {
                source_id: entry.id.clone(),
                destination: entry.path.clone(),
            }),
        }
    }

    /// On-disk path of the entry's parent: the resolved provenance path if
    /// known, else the parent entry's cache path.
    fn parent_path(&self, entry: &CacheEntry) -> Option<PathBuf> {
        if let Some(path) = &entry.source_path {
            return Some(path.clone());
        }
        let parent = entry.parent.as_ref()?;
        Some(self.entries.get(parent)?.path)
    }

    fn mark_available(&self, entry: &mut CacheEntry, stats: &mut PollStats) {
        if let Err(e) = write_checksum(&entry.path) {
            warn!(id = %entry.id, error = %e, "Checksum write failed");
            self.record_failure(entry, stats);
            return;
        }
        entry.available = true;
        if let Ok(meta) = std::fs::metadata(&entry.path) {
            entry.size = meta.len();
        }
        self.entries.save(entry.clone());
        stats.completed += 1;
        info!(id = %entry.id, size = entry.size, "Entry available");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::StagingLayout;
    use crate::launcher::LauncherError;
    use crate::product::{ContentId, CutoutBounds};
    use crate::store::MemoryEntryStore;
    use chrono::TimeDelta;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use tempfile::TempDir;

    /// Scripted launcher: returns canned statuses, records starts.
    #[derive(Default)]
    struct MockLauncher {
        statuses: Mutex<HashMap<String, BatchStatus>>,
        started: Mutex<Vec<(String, BatchJobSpec)>>,
        throttled: Mutex<bool>,
    }

    impl MockLauncher {
        fn set_status(&self, id: &str, status: BatchStatus) {
            self.statuses.lock().insert(id.to_string(), status);
        }

        fn started_count(&self) -> usize {
            self.started.lock().len()
        }
    }

    impl BatchLauncher for MockLauncher {
        fn start(&self, id: &str, spec: &BatchJobSpec) -> Result<StartOutcome, LauncherError> {
            if *self.throttled.lock() {
                return Ok(StartOutcome::Throttled);
            }
            self.started
                .lock()
                .push((id.to_string(), spec.clone()));
            Ok(StartOutcome::Started)
        }

        fn status(&self, id: &str) -> Result<Option<BatchStatus>, LauncherError> {
            Ok(self.statuses.lock().get(id).cloned())
        }

        fn cancel(&self, _id: &str) -> Result<(), LauncherError> {
            Ok(())
        }
    }

    struct Fixture {
        temp: TempDir,
        entries: Arc<MemoryEntryStore>,
        launcher: Arc<MockLauncher>,
        orchestrator: DownloadOrchestrator,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let entries = Arc::new(MemoryEntryStore::new());
        let launcher = Arc::new(MockLauncher::default());
        let orchestrator = DownloadOrchestrator::new(
            entries.clone(),
            launcher.clone(),
            OrchestratorSettings::default(),
            3,
        );
        Fixture {
            temp,
            entries,
            launcher,
            orchestrator,
        }
    }

    fn placeholder(fx: &Fixture, id: &str) -> CacheEntry {
        let entry = CacheEntry::placeholder(
            ContentId::new(id),
            ProductKind::Plain,
            fx.temp.path().join(format!("{id}.fits")),
            1024,
            Utc::now() + TimeDelta::hours(1),
        );
        fx.entries.save(entry.clone());
        entry
    }

    #[test]
    fn test_placeholder_gets_job_started() {
        let fx = fixture();
        placeholder(&fx, "obs-1");

        let stats = fx.orchestrator.poll_cycle();
        assert_eq!(stats.started, 1);

        let entry = fx.entries.get(&ContentId::new("obs-1")).unwrap();
        let job_id = entry.batch_job.unwrap();
        assert!(job_id.starts_with("obs-1-"));
        assert!(job_id.ends_with("-0"));
    }

    #[test]
    fn test_throttled_start_leaves_retries_untouched() {
        let fx = fixture();
        placeholder(&fx, "obs-1");
        *fx.launcher.throttled.lock() = true;

        let stats = fx.orchestrator.poll_cycle();
        assert_eq!(stats.started, 0);
        assert_eq!(stats.failed, 0);

        let entry = fx.entries.get(&ContentId::new("obs-1")).unwrap();
        assert_eq!(entry.retries, 0);
        assert!(entry.batch_job.is_none());
    }

    #[test]
    fn test_failed_job_retries_with_fresh_id() {
        let fx = fixture();
        let mut entry = placeholder(&fx, "obs-1");
        entry.batch_job = Some("obs-1-100-0".to_string());
        fx.entries.save(entry);
        fx.launcher.set_status(
            "obs-1-100-0",
            BatchStatus::Failed {
                cause: "node died".into(),
            },
        );

        let stats = fx.orchestrator.poll_cycle();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.started, 1);

        let entry = fx.entries.get(&ContentId::new("obs-1")).unwrap();
        assert_eq!(entry.retries, 1);
        let job_id = entry.batch_job.unwrap();
        assert_ne!(job_id, "obs-1-100-0");
        assert!(job_id.ends_with("-1"));
    }

    #[test]
    fn test_finished_without_output_is_failure() {
        let fx = fixture();
        let mut entry = placeholder(&fx, "obs-1");
        entry.batch_job = Some("obs-1-100-0".to_string());
        fx.entries.save(entry);
        fx.launcher.set_status("obs-1-100-0", BatchStatus::Finished);

        let stats = fx.orchestrator.poll_cycle();
        assert_eq!(stats.failed, 1);
        assert_eq!(fx.entries.get(&ContentId::new("obs-1")).unwrap().retries, 1);
    }

    #[test]
    fn test_finished_with_output_marks_available() {
        let fx = fixture();
        let mut entry = placeholder(&fx, "obs-1");
        entry.batch_job = Some("obs-1-100-0".to_string());
        std::fs::write(&entry.path, b"payload").unwrap();
        fx.entries.save(entry.clone());
        fx.launcher.set_status("obs-1-100-0", BatchStatus::Finished);

        let stats = fx.orchestrator.poll_cycle();
        assert_eq!(stats.completed, 1);

        let entry = fx.entries.get(&ContentId::new("obs-1")).unwrap();
        assert!(entry.available);
        assert_eq!(entry.size, 7);
        assert!(StagingLayout::checksum_path(&entry.path).exists());
    }

    #[test]
    fn test_retries_exhaust_and_freeze() {
        let fx = fixture();
        let mut entry = placeholder(&fx, "obs-1");
        entry.retries = 3;
        entry.batch_job = Some("obs-1-100-3".to_string());
        fx.entries.save(entry);
        fx.launcher.set_status(
            "obs-1-100-3",
            BatchStatus::Failed {
                cause: "node died".into(),
            },
        );

        fx.orchestrator.poll_cycle();
        let entry = fx.entries.get(&ContentId::new("obs-1")).unwrap();
        assert_eq!(entry.retries, 4);

        // Frozen: the next cycle no longer scans the entry.
        let stats = fx.orchestrator.poll_cycle();
        assert_eq!(stats.scanned, 0);
        assert_eq!(fx.launcher.started_count(), 0);
    }

    // Scenario B follow-up: after a reservation resets the retry count,
    // the next poll cycle starts a new job.
    #[test]
    fn test_reset_budget_restarts() {
        let fx = fixture();
        let mut entry = placeholder(&fx, "obs-1");
        entry.retries = 4;
        fx.entries.save(entry.clone());
        assert_eq!(fx.orchestrator.poll_cycle().scanned, 0);

        entry.retries = 0;
        fx.entries.save(entry);
        let stats = fx.orchestrator.poll_cycle();
        assert_eq!(stats.started, 1);
    }

    #[test]
    fn test_derived_waits_for_parent() {
        let fx = fixture();
        placeholder(&fx, "obs-1");
        let cutout = CacheEntry::placeholder(
            ContentId::new("obs-1#cut"),
            ProductKind::Cutout,
            fx.temp.path().join("cut.fits"),
            256,
            Utc::now() + TimeDelta::hours(1),
        )
        .with_parent(ContentId::new("obs-1"))
        .with_bounds(CutoutBounds::new(10.0, 20.0, 0.1));
        fx.entries.save(cutout);

        let stats = fx.orchestrator.poll_cycle();
        // Parent started; cutout held back.
        assert_eq!(stats.waiting_on_parent, 1);
        let started = fx.launcher.started.lock();
        assert_eq!(started.len(), 1);
        assert!(matches!(started[0].1, BatchJobSpec::Retrieve { .. }));
    }

    #[test]
    fn test_derived_starts_once_parent_available() {
        let fx = fixture();
        let mut parent = placeholder(&fx, "obs-1");
        parent.available = true;
        fx.entries.save(parent.clone());

        let cutout = CacheEntry::placeholder(
            ContentId::new("obs-1#cut"),
            ProductKind::Cutout,
            fx.temp.path().join("cut.fits"),
            256,
            Utc::now() + TimeDelta::hours(1),
        )
        .with_parent(ContentId::new("obs-1"))
        .with_bounds(CutoutBounds::new(10.0, 20.0, 0.1));
        fx.entries.save(cutout);

        fx.orchestrator.poll_cycle();
        let started = fx.launcher.started.lock();
        assert_eq!(started.len(), 1);
        match &started[0].1 {
            BatchJobSpec::Generate { source_path, .. } => {
                assert_eq!(source_path, &parent.path);
            }
            other => panic!("expected Generate, got {other:?}"),
        }
    }

    #[test]
    fn test_cutout_without_bounds_counts_failed_attempt() {
        let fx = fixture();
        let mut parent = placeholder(&fx, "obs-1");
        parent.available = true;
        fx.entries.save(parent);

        let cutout = CacheEntry::placeholder(
            ContentId::new("obs-1#cut"),
            ProductKind::Cutout,
            fx.temp.path().join("cut.fits"),
            256,
            Utc::now() + TimeDelta::hours(1),
        )
        .with_parent(ContentId::new("obs-1"));
        fx.entries.save(cutout);

        fx.orchestrator.poll_cycle();
        assert_eq!(
            fx.entries.get(&ContentId::new("obs-1#cut")).unwrap().retries,
            1
        );
    }
}
