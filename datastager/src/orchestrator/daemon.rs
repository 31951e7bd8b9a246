//! Background daemon driving the download orchestrator.

use super::DownloadOrchestrator;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Runs the orchestrator's poll cycle on its configured interval.
///
/// This function runs until cancelled. Each cycle executes on a blocking
/// task; launcher and filesystem calls are synchronous.
pub async fn run_orchestrator_daemon(
    orchestrator: Arc<DownloadOrchestrator>,
    cancellation: CancellationToken,
) {
    let interval = Duration::from_secs(orchestrator.poll_interval_secs());
    info!(interval_secs = interval.as_secs(), "Starting download orchestrator daemon");

    loop {
        tokio::select! {
            _ = cancellation.cancelled() => {
                info!("Download orchestrator daemon shutting down");
                break;
            }
            _ = tokio::time::sleep(interval) => {
                let orchestrator = Arc::clone(&orchestrator);
                let cycle = tokio::task::spawn_blocking(move || orchestrator.poll_cycle()).await;
                if let Err(e) = cycle {
                    warn!(error = %e, "Poll cycle task failed");
                }
            }
        }
    }
}
