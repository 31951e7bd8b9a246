//! Scheduler integration: slot bounds, crash-safe restart, hold/release
//! of executing requests.

use chrono::{TimeDelta, Utc};
use datastager::cache::CacheStore;
use datastager::config::{
    CacheSettings, OrchestratorSettings, PipelineSettings, SchedulerSettings,
};
use datastager::launcher::LocalLauncher;
use datastager::orchestrator::{run_orchestrator_daemon, DownloadOrchestrator};
use datastager::pipeline::Packager;
use datastager::product::ProductRef;
use datastager::request::{DownloadMode, Request, RequestId, RequestPhase};
use datastager::scheduler::{Category, Scheduler, Worker};
use datastager::services::{CsvCatalogueService, DirectoryArchive, NullNotifier};
use datastager::store::{MemoryEntryStore, MemoryRequestStore, RequestStore};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

struct Harness {
    temp: TempDir,
    entries: Arc<MemoryEntryStore>,
    requests: Arc<MemoryRequestStore>,
    scheduler_settings: SchedulerSettings,
    cache_settings: CacheSettings,
    scheduler: Arc<Scheduler>,
    shutdown: CancellationToken,
}

impl Harness {
    fn new(a_slots: usize) -> Self {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("archive")).unwrap();

        let entries = Arc::new(MemoryEntryStore::new());
        let requests = Arc::new(MemoryRequestStore::new());
        let cache_settings = CacheSettings::default()
            .with_root(temp.path().join("stage"))
            .with_capacity(100 * 1024 * 1024)
            .with_max_attempts(2);
        let scheduler_settings = SchedulerSettings::default()
            .with_slots(a_slots, 1)
            .with_snapshot_path(temp.path().join("queues.json"));

        let scheduler = build_scheduler(
            &temp,
            entries.clone(),
            requests.clone(),
            cache_settings.clone(),
            scheduler_settings.clone(),
        );

        let orchestrator = Arc::new(DownloadOrchestrator::new(
            entries.clone(),
            Arc::new(LocalLauncher::new(temp.path().join("archive"))),
            OrchestratorSettings {
                poll_interval_secs: 1,
                page_size: 100,
            },
            2,
        ));
        let shutdown = CancellationToken::new();
        tokio::spawn(run_orchestrator_daemon(orchestrator, shutdown.clone()));

        Self {
            temp,
            entries,
            requests,
            scheduler_settings,
            cache_settings,
            scheduler,
            shutdown,
        }
    }

    /// A second scheduler over the same stores and snapshot file,
    /// simulating a process restart.
    fn restart(&self, a_slots: usize) -> Arc<Scheduler> {
        build_scheduler(
            &self.temp,
            self.entries.clone(),
            self.requests.clone(),
            self.cache_settings.clone(),
            self.scheduler_settings.clone().with_slots(a_slots, 1),
        )
    }

    fn seed_archive(&self, id: &str, bytes: &[u8]) {
        std::fs::write(self.temp.path().join("archive").join(id), bytes).unwrap();
    }

    fn request(&self, id: &str, content: &str, size: u64) -> Request {
        let now = Utc::now();
        Request::new(
            id,
            DownloadMode::Direct,
            now,
            now + TimeDelta::days(7),
            vec![ProductRef::plain(content, format!("{content}.fits"), size)],
        )
    }

    async fn wait_phase(&self, id: &str, phase: RequestPhase) {
        let id = RequestId::new(id);
        for _ in 0..600 {
            if self.requests.get(&id).map(|r| r.phase) == Some(phase) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!(
            "request {id} never reached {phase}, last seen {:?}",
            self.requests.get(&id).map(|r| r.phase)
        );
    }
}

fn build_scheduler(
    temp: &TempDir,
    entries: Arc<MemoryEntryStore>,
    requests: Arc<MemoryRequestStore>,
    cache_settings: CacheSettings,
    scheduler_settings: SchedulerSettings,
) -> Arc<Scheduler> {
    let archive_root = temp.path().join("archive");
    let cache = Arc::new(CacheStore::new(
        entries.clone(),
        requests.clone(),
        cache_settings,
    ));
    let packager = Arc::new(Packager::new(
        cache.clone(),
        entries.clone(),
        requests.clone(),
        Arc::new(DirectoryArchive::new(&archive_root)),
        Arc::new(CsvCatalogueService::new(archive_root.join("tables"))),
        PipelineSettings {
            poll_interval_ms: 50,
            page_size: 5,
        },
    ));
    let worker = Arc::new(Worker::new(
        packager,
        requests.clone(),
        Arc::new(NullNotifier),
        scheduler_settings.expiry_horizon_secs,
    ));
    Scheduler::new(
        requests,
        entries,
        cache,
        Arc::new(LocalLauncher::new(&archive_root)),
        worker,
        scheduler_settings,
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn test_category_a_slot_bound_is_respected() {
    let harness = Harness::new(1);
    harness.seed_archive("obs-1", b"first");
    harness.seed_archive("obs-2", b"second");

    harness
        .scheduler
        .submit(harness.request("req-1", "obs-1", 5));
    harness
        .scheduler
        .submit(harness.request("req-2", "obs-2", 6));

    // Sample concurrency until both finish: never two executing at once.
    let r1 = RequestId::new("req-1");
    let r2 = RequestId::new("req-2");
    let mut max_concurrent = 0usize;
    for _ in 0..600 {
        let executing = [&r1, &r2]
            .into_iter()
            .filter(|&id| harness.scheduler.is_executing(id))
            .count();
        max_concurrent = max_concurrent.max(executing);
        let done = [&r1, &r2].into_iter().all(|id| {
            harness
                .requests
                .get(id)
                .is_some_and(|r| r.phase == RequestPhase::Completed)
        });
        if done {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(max_concurrent <= 1, "slot bound violated: {max_concurrent}");
    harness.wait_phase("req-1", RequestPhase::Completed).await;
    harness.wait_phase("req-2", RequestPhase::Completed).await;
    harness.shutdown.cancel();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_restart_resubmits_open_requests() {
    // No slots: the request stays queued, as if the process died mid-wait.
    let harness = Harness::new(0);
    harness.seed_archive("obs-1", b"payload");
    harness
        .scheduler
        .submit(harness.request("req-1", "obs-1", 7));
    assert_eq!(
        harness.requests.get(&RequestId::new("req-1")).unwrap().phase,
        RequestPhase::Queued
    );

    // Restart with capacity to run; restore picks the request up.
    let restarted = harness.restart(1);
    let resubmitted = restarted.restore().unwrap();
    assert_eq!(resubmitted, 1);

    harness.wait_phase("req-1", RequestPhase::Completed).await;
    harness.shutdown.cancel();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_paused_queue_survives_restart() {
    let harness = Harness::new(1);
    harness.seed_archive("obs-1", b"payload");
    harness.scheduler.pause(Category::A);
    harness
        .scheduler
        .submit(harness.request("req-1", "obs-1", 7));

    let restarted = harness.restart(1);
    restarted.restore().unwrap();
    assert!(restarted.is_paused(Category::A));

    // Still parked after a grace period.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        harness.requests.get(&RequestId::new("req-1")).unwrap().phase,
        RequestPhase::Queued
    );

    restarted.resume(Category::A);
    harness.wait_phase("req-1", RequestPhase::Completed).await;
    harness.shutdown.cancel();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_hold_executing_request_then_release() {
    let harness = Harness::new(1);
    // Not in the archive yet: the worker polls while the orchestrator
    // fails, giving us a stable Executing window.
    harness
        .scheduler
        .submit(harness.request("req-1", "obs-late", 9));

    let id = RequestId::new("req-1");
    for _ in 0..200 {
        if harness.scheduler.is_executing(&id) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(harness.scheduler.is_executing(&id));

    harness.scheduler.hold(&id).await.unwrap();
    harness.wait_phase("req-1", RequestPhase::Held).await;
    assert!(!harness.scheduler.is_executing(&id));

    // Stage the file, release the hold: the request runs to completion.
    harness.seed_archive("obs-late", b"finally here");
    harness.scheduler.release_hold(&id).unwrap();
    harness.wait_phase("req-1", RequestPhase::Completed).await;
    harness.shutdown.cancel();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_abort_executing_request_releases_claims() {
    let harness = Harness::new(1);
    harness
        .scheduler
        .submit(harness.request("req-1", "obs-late", 9));

    let id = RequestId::new("req-1");
    for _ in 0..200 {
        if harness.scheduler.is_executing(&id) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    harness.scheduler.abort(&id).await.unwrap();
    harness.wait_phase("req-1", RequestPhase::Aborted).await;

    // The in-flight placeholder was deleted outright: no other request
    // shared it.
    use datastager::product::ContentId;
    use datastager::store::EntryStore;
    for _ in 0..100 {
        if harness.entries.get(&ContentId::new("obs-late")).is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(harness.entries.get(&ContentId::new("obs-late")).is_none());
    harness.shutdown.cancel();
}
