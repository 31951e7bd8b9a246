//! Worker unit: runs one request to completion through the pipeline.

use crate::pipeline::{Packager, PipelineError};
use crate::request::{RequestId, RequestPhase};
use crate::services::Notifier;
use crate::store::RequestStore;
use chrono::{TimeDelta, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How a worker run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Packaging succeeded; the request is COMPLETED.
    Completed,
    /// Packaging failed; the request is ERROR with a stored message.
    Failed,
    /// The run was interrupted; the interrupting admin action owns the
    /// request's final phase.
    Cancelled,
}

/// Runs requests through the packaging pipeline and records the outcome.
pub struct Worker {
    packager: Arc<Packager>,
    requests: Arc<dyn RequestStore>,
    notifier: Arc<dyn Notifier>,
    expiry_horizon_secs: i64,
}

impl Worker {
    /// Creates a worker.
    pub fn new(
        packager: Arc<Packager>,
        requests: Arc<dyn RequestStore>,
        notifier: Arc<dyn Notifier>,
        expiry_horizon_secs: i64,
    ) -> Self {
        Self {
            packager,
            requests,
            notifier,
            expiry_horizon_secs,
        }
    }

    /// Packages the request and records the terminal phase.
    pub async fn run(&self, id: &RequestId, cancel: &CancellationToken) -> WorkerOutcome {
        match self.packager.package(id, cancel).await {
            Ok(report) => {
                if let Some(mut request) = self.requests.get(id) {
                    request.phase = RequestPhase::Completed;
                    request.expires_at = report.expires_at;
                    self.requests.save(request.clone());
                    self.notifier.request_completed(&request, report.expires_at);
                }
                info!(request = %id, "Worker finished request");
                WorkerOutcome::Completed
            }
            Err(e) if e.is_cancelled() => {
                // Interruption registers cancellation; the admin action
                // that interrupted decides between ABORTED and HELD.
                info!(request = %id, "Worker interrupted");
                WorkerOutcome::Cancelled
            }
            Err(e) => {
                self.record_failure(id, &e);
                WorkerOutcome::Failed
            }
        }
    }

    fn record_failure(&self, id: &RequestId, e: &PipelineError) {
        error!(request = %id, error = %e, capacity = e.is_capacity(), "Packaging failed");
        let Some(mut request) = self.requests.get(id) else {
            warn!(request = %id, "Failed request missing from store");
            return;
        };
        request.phase = RequestPhase::Error;
        request.error_message = Some(e.to_string());
        // A failed request keeps its staging claim for the same horizon a
        // successful one would get, so operators can inspect partial output.
        request.expires_at = Utc::now() + TimeDelta::seconds(self.expiry_horizon_secs);
        self.requests.save(request.clone());
        self.notifier.request_failed(&request, request.error_message.as_deref().unwrap_or(""));
    }
}
