//! Multi-stage packaging of a request's full file set.
//!
//! The packager walks the request's heterogeneous product list in
//! fixed-size pages. Each page goes through four stages: provenance
//! resolution, cache reservation (with recall signalling), a
//! poll-until-complete scan loop, and materialization into the request
//! directory. Synchronous kinds (catalogue extracts, error reports) are
//! produced inside the scan loop itself; everything else is populated by
//! the download orchestrator and only polled here.
//!
//! The scan loop's only bound is each entry's retry budget: an entry that
//! exhausts its attempts makes `is_available` raise, which aborts the
//! request with a stored error. There is deliberately no wall-clock
//! deadline; external infrastructure timeouts bound stuck batch jobs.

use crate::cache::CacheStore;
use crate::config::PipelineSettings;
use crate::pipeline::error::PipelineError;
use crate::product::{ContentId, ProductKind, ProductRef};
use crate::request::{Request, RequestId};
use crate::services::{write_checksum, ArchiveLocator, CatalogueService};
use crate::store::{EntryStore, RequestStore};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of packaging a request, used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackagingReport {
    /// When the request's deliverables expire from the staging area.
    pub expires_at: DateTime<Utc>,
    /// Bytes that were already cached when packaging began.
    pub cached_bytes: u64,
    /// Total delivered bytes.
    pub total_bytes: u64,
}

/// Assembles a request's file set into its output directory.
pub struct Packager {
    cache: Arc<CacheStore>,
    entries: Arc<dyn EntryStore>,
    requests: Arc<dyn RequestStore>,
    archive: Arc<dyn ArchiveLocator>,
    catalogue: Arc<dyn CatalogueService>,
    settings: PipelineSettings,
}

impl Packager {
    /// Creates a packager over the given collaborators.
    pub fn new(
        cache: Arc<CacheStore>,
        entries: Arc<dyn EntryStore>,
        requests: Arc<dyn RequestStore>,
        archive: Arc<dyn ArchiveLocator>,
        catalogue: Arc<dyn CatalogueService>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            cache,
            entries,
            requests,
            archive,
            catalogue,
            settings,
        }
    }

    /// Packages the full file set of a request.
    ///
    /// Cancelling the token while the scan loop sleeps surfaces as
    /// [`PipelineError::Cancelled`].
    pub async fn package(
        &self,
        request_id: &RequestId,
        cancel: &CancellationToken,
    ) -> Result<PackagingReport, PipelineError> {
        let mut request = self
            .requests
            .get(request_id)
            .ok_or_else(|| PipelineError::UnknownRequest(request_id.clone()))?;

        info!(
            request = %request.id,
            products = request.products.len(),
            page_size = self.settings.page_size,
            "Packaging started"
        );

        let mut cached_bytes = 0u64;
        let mut final_sizes: HashMap<ContentId, u64> = HashMap::new();
        let products = request.products.clone();

        for page in products.chunks(self.settings.page_size.max(1)) {
            cached_bytes += self.package_page(&request, page, cancel, &mut final_sizes).await?;
        }

        // Push observed sizes back onto the originating records and
        // persist the request's total.
        for product in &mut request.products {
            if let Some(size) = final_sizes.get(&product.id) {
                product.size = *size;
            }
        }
        request.total_size = request.products.iter().map(|p| p.size).sum();
        let report = PackagingReport {
            expires_at: request.expires_at,
            cached_bytes,
            total_bytes: request.total_size,
        };
        self.requests.save(request);

        info!(
            request = %request_id,
            total_bytes = report.total_bytes,
            cached_bytes = report.cached_bytes,
            "Packaging complete"
        );
        Ok(report)
    }

    /// Runs the four stages for one page. Returns the page's
    /// already-cached byte count.
    async fn package_page(
        &self,
        request: &Request,
        page: &[ProductRef],
        cancel: &CancellationToken,
        final_sizes: &mut HashMap<ContentId, u64>,
    ) -> Result<u64, PipelineError> {
        // Stage 1: best-effort provenance resolution.
        let located = self.resolve_provenance(page);

        // Stage 2: reserve cache space; signal recall for sources that
        // are not already staged on disk.
        let reservation = self.cache.reserve(page, request)?;
        if reservation.created_placeholders() {
            self.attach_sources(&reservation.created, &located);
            let to_recall = self.recall_set(page, &reservation.created, &located);
            if !to_recall.is_empty() {
                if let Err(e) = self.archive.recall(&to_recall) {
                    // Recall proceeds asynchronously elsewhere; a refused
                    // signal degrades to waiting on the download jobs.
                    warn!(request = %request.id, error = %e, "Recall signal failed");
                }
            }
        }

        // Stage 3: poll until every file in the page is complete.
        self.poll_until_complete(request, page, cancel, final_sizes)
            .await?;

        // Stage 4: materialize and pin until the request expires.
        self.cache.materialize_request_dir(request, page)?;
        let ids: Vec<ContentId> = page.iter().map(|p| p.id.clone()).collect();
        self.cache.extend_unlock(&ids, request.expires_at);
        for product in page {
            if !final_sizes.contains_key(&product.id) {
                final_sizes.insert(product.id.clone(), self.cache.refresh_size(&product.id)?);
            }
        }

        Ok(reservation.cached_bytes)
    }

    /// Locates on-disk sources for the page's products: the product itself
    /// for originals, the parent for derived kinds. Archive-service
    /// failures degrade to "must be fetched into cache".
    fn resolve_provenance(&self, page: &[ProductRef]) -> HashMap<ContentId, PathBuf> {
        let mut located = HashMap::new();
        for product in page {
            let wanted = match &product.parent {
                Some(parent) => parent.clone(),
                None => product.id.clone(),
            };
            if located.contains_key(&wanted) {
                continue;
            }
            match self.archive.locate(&wanted) {
                Ok(Some(path)) => {
                    located.insert(wanted, path);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(id = %wanted, error = %e, "Archive locate failed, falling back to cache fetch");
                }
            }
        }
        located
    }

    /// Writes resolved source paths onto freshly created entries so the
    /// orchestrator can hand them to generation jobs.
    fn attach_sources(&self, created: &[ContentId], located: &HashMap<ContentId, PathBuf>) {
        for id in created {
            let Some(mut entry) = self.entries.get(id) else {
                continue;
            };
            let source = match &entry.parent {
                Some(parent) => located.get(parent),
                None => located.get(id),
            };
            if let Some(path) = source {
                entry.source_path = Some(path.clone());
                self.entries.save(entry);
            }
        }
    }

    /// Distinct sources that need recall from offline storage: everything
    /// a created placeholder depends on that provenance did not locate.
    fn recall_set(
        &self,
        page: &[ProductRef],
        created: &[ContentId],
        located: &HashMap<ContentId, PathBuf>,
    ) -> Vec<ContentId> {
        let created: HashSet<&ContentId> = created.iter().collect();
        let mut sources: Vec<ContentId> = Vec::new();
        let mut seen: HashSet<ContentId> = HashSet::new();
        for product in page {
            if !created.contains(&product.id) {
                continue;
            }
            let source = product.parent.clone().unwrap_or_else(|| product.id.clone());
            if located.contains_key(&source) || !seen.insert(source.clone()) {
                continue;
            }
            sources.push(source);
        }
        sources
    }

    /// Scans the page until every file reports complete, sleeping the
    /// configured interval between scans.
    async fn poll_until_complete(
        &self,
        request: &Request,
        page: &[ProductRef],
        cancel: &CancellationToken,
        final_sizes: &mut HashMap<ContentId, u64>,
    ) -> Result<(), PipelineError> {
        let interval = Duration::from_millis(self.settings.poll_interval_ms);
        let mut complete: HashSet<ContentId> = HashSet::new();

        loop {
            // Parent availability memo, rebuilt per scan to avoid a store
            // lookup for every derived sibling of the same original.
            let mut parent_ready: HashMap<ContentId, bool> = HashMap::new();

            for product in page {
                if complete.contains(&product.id) {
                    continue;
                }
                if self.scan_one(request, product, &mut parent_ready, final_sizes)? {
                    complete.insert(product.id.clone());
                }
            }

            if complete.len() == page.len() {
                return Ok(());
            }

            debug!(
                request = %request.id,
                complete = complete.len(),
                total = page.len(),
                "Page incomplete, rescanning after sleep"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// One product's completion check. Synchronous kinds are produced on
    /// the spot; downloaded kinds are polled through the cache.
    fn scan_one(
        &self,
        request: &Request,
        product: &ProductRef,
        parent_ready: &mut HashMap<ContentId, bool>,
        final_sizes: &mut HashMap<ContentId, u64>,
    ) -> Result<bool, PipelineError> {
        match product.kind {
            ProductKind::Catalogue => {
                let dest = self
                    .cache
                    .layout()
                    .request_path(&request.id, &product.file_name);
                let size = self.catalogue.extract(product, &dest)?;
                final_sizes.insert(product.id.clone(), size);
                Ok(true)
            }
            ProductKind::ErrorReport | ProductKind::Evaluation => {
                let dest = self
                    .cache
                    .layout()
                    .request_path(&request.id, &product.file_name);
                let size = write_error_artifact(&dest, product).map_err(PipelineError::Artifact)?;
                final_sizes.insert(product.id.clone(), size);
                Ok(true)
            }
            ProductKind::Cutout | ProductKind::GeneratedSpectrum | ProductKind::Encapsulated => {
                if let Some(parent) = &product.parent {
                    let ready = match parent_ready.get(parent) {
                        Some(ready) => *ready,
                        None => {
                            let ready = self.cache.is_available(parent)?;
                            parent_ready.insert(parent.clone(), ready);
                            ready
                        }
                    };
                    if !ready {
                        return Ok(false);
                    }
                }
                Ok(self.cache.is_available(&product.id)?)
            }
            ProductKind::Plain => Ok(self.cache.is_available(&product.id)?),
        }
    }
}

/// Writes the error text artifact for a product plus its checksum sibling.
fn write_error_artifact(dest: &std::path::Path, product: &ProductRef) -> std::io::Result<u64> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let text = format!(
        "Product {} ({}) could not be delivered.\nContact the archive helpdesk quoting this file.\n",
        product.id, product.kind
    );
    std::fs::write(dest, &text)?;
    write_checksum(dest)?;
    Ok(text.len() as u64)
}
