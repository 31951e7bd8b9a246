//! High-level service facade.
//!
//! Wires stores, cache, launcher, collaborators, scheduler and the
//! download orchestrator into one unit with a start/shutdown lifecycle.
//! The CLI and embedding applications talk to this type instead of
//! assembling components by hand.

use crate::cache::CacheStore;
use crate::config::ConfigFile;
use crate::launcher::{BatchLauncher, LocalLauncher};
use crate::orchestrator::{run_orchestrator_daemon, DownloadOrchestrator};
use crate::pipeline::Packager;
use crate::request::{Request, RequestId};
use crate::scheduler::{Category, Scheduler, SchedulerError, Worker};
use crate::services::{
    ArchiveLocator, CatalogueService, CsvCatalogueService, DirectoryArchive, Notifier,
    TracingNotifier,
};
use crate::store::{MemoryEntryStore, MemoryRequestStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// External collaborators the service is wired with.
///
/// Defaults target a directory-backed archive for development; production
/// deployments substitute their own implementations.
pub struct Collaborators {
    /// Batch job launcher.
    pub launcher: Arc<dyn BatchLauncher>,
    /// Archive locator/recall service.
    pub archive: Arc<dyn ArchiveLocator>,
    /// Catalogue extraction service.
    pub catalogue: Arc<dyn CatalogueService>,
    /// Completion/failure notifier.
    pub notifier: Arc<dyn Notifier>,
}

impl Collaborators {
    /// Directory-backed collaborators rooted at the given archive path.
    pub fn local(archive_root: impl Into<PathBuf>) -> Self {
        let archive_root = archive_root.into();
        Self {
            launcher: Arc::new(LocalLauncher::new(&archive_root)),
            archive: Arc::new(DirectoryArchive::new(&archive_root)),
            catalogue: Arc::new(CsvCatalogueService::new(archive_root.join("tables"))),
            notifier: Arc::new(TracingNotifier),
        }
    }
}

/// The staging service: scheduler, pipeline, cache and orchestrator.
pub struct StagingService {
    scheduler: Arc<Scheduler>,
    orchestrator: Arc<DownloadOrchestrator>,
    cancellation: CancellationToken,
    daemon: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl StagingService {
    /// Assembles the service from configuration and collaborators, using
    /// the in-memory stores.
    pub fn new(config: ConfigFile, collaborators: Collaborators) -> Arc<Self> {
        let entries = Arc::new(MemoryEntryStore::new());
        let requests = Arc::new(MemoryRequestStore::new());

        let cache = Arc::new(CacheStore::new(
            entries.clone(),
            requests.clone(),
            config.cache.clone(),
        ));
        let packager = Arc::new(Packager::new(
            cache.clone(),
            entries.clone(),
            requests.clone(),
            collaborators.archive,
            collaborators.catalogue,
            config.pipeline.clone(),
        ));
        let worker = Arc::new(Worker::new(
            packager,
            requests.clone(),
            collaborators.notifier,
            config.scheduler.expiry_horizon_secs,
        ));
        let orchestrator = Arc::new(DownloadOrchestrator::new(
            entries.clone(),
            collaborators.launcher.clone(),
            config.orchestrator.clone(),
            config.cache.max_download_attempts,
        ));
        let scheduler = Scheduler::new(
            requests,
            entries,
            cache,
            collaborators.launcher,
            worker,
            config.scheduler.clone(),
        );

        Arc::new(Self {
            scheduler,
            orchestrator,
            cancellation: CancellationToken::new(),
            daemon: parking_lot::Mutex::new(None),
        })
    }

    /// Restores persisted queue state and spawns the orchestrator daemon.
    pub fn start(&self) -> std::io::Result<usize> {
        let resubmitted = self.scheduler.restore()?;
        let handle = tokio::spawn(run_orchestrator_daemon(
            Arc::clone(&self.orchestrator),
            self.cancellation.clone(),
        ));
        *self.daemon.lock() = Some(handle);
        info!(resubmitted, "Staging service started");
        Ok(resubmitted)
    }

    /// Submits a request.
    pub fn submit(&self, request: Request) -> Category {
        self.scheduler.submit(request)
    }

    /// The scheduler, for admin actions.
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Aborts a request.
    pub async fn abort(&self, id: &RequestId) -> Result<(), SchedulerError> {
        self.scheduler.abort(id).await
    }

    /// Stops the daemons. In-flight workers drain on their own.
    pub async fn shutdown(&self) {
        self.cancellation.cancel();
        let daemon = self.daemon.lock().take();
        if let Some(handle) = daemon {
            let _ = handle.await;
        }
        info!("Staging service stopped");
    }
}
