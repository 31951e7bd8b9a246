//! External batch job-launcher abstraction.
//!
//! Downloads and generations run as batch jobs on external infrastructure
//! (a grid submission system in production). The orchestrator only sees the
//! narrow [`BatchLauncher`] contract: start a described job, ask for its
//! status, cancel it. The launcher may silently decline a start when
//! admission is throttled; callers must not treat that as a failure.

use crate::product::{ContentId, CutoutBounds};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

/// Description of one batch job.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchJobSpec {
    /// Retrieve an archived original onto staging disk.
    Retrieve {
        /// Archive content id of the source.
        source_id: ContentId,
        /// Destination path on staging disk.
        destination: PathBuf,
    },
    /// Extract one member from an encapsulated bundle.
    Extract {
        /// On-disk path of the staged bundle.
        bundle_path: PathBuf,
        /// Member to extract.
        member: ContentId,
        /// Destination path on staging disk.
        destination: PathBuf,
    },
    /// Generate a cutout or spectrum from a staged parent.
    Generate {
        /// On-disk path of the staged parent original.
        source_path: PathBuf,
        /// Destination path.
        destination: PathBuf,
        /// Geometry computed upstream.
        bounds: CutoutBounds,
    },
}

impl BatchJobSpec {
    /// Argument list handed to the external tool.
    ///
    /// Axis flags whose bound is unset are omitted entirely; the tool then
    /// takes the full depth of that axis.
    pub fn arguments(&self) -> Vec<String> {
        match self {
            Self::Retrieve {
                source_id,
                destination,
            } => vec![
                "--source".into(),
                source_id.to_string(),
                "--out".into(),
                destination.display().to_string(),
            ],
            Self::Extract {
                bundle_path,
                member,
                destination,
            } => vec![
                "--bundle".into(),
                bundle_path.display().to_string(),
                "--member".into(),
                member.to_string(),
                "--out".into(),
                destination.display().to_string(),
            ],
            Self::Generate {
                source_path,
                destination,
                bounds,
            } => {
                let mut args = vec![
                    "--in".into(),
                    source_path.display().to_string(),
                    "--out".into(),
                    destination.display().to_string(),
                    "--ra".into(),
                    bounds.ra_deg.to_string(),
                    "--dec".into(),
                    bounds.dec_deg.to_string(),
                    "--size".into(),
                    bounds.size_deg.to_string(),
                ];
                if let Some((lo, hi)) = bounds.plane_range_3 {
                    args.push("--planes3".into());
                    args.push(format!("{lo}:{hi}"));
                }
                if let Some((lo, hi)) = bounds.plane_range_4 {
                    args.push("--planes4".into());
                    args.push(format!("{lo}:{hi}"));
                }
                args
            }
        }
    }

    /// Destination path of the job's output.
    pub fn destination(&self) -> &PathBuf {
        match self {
            Self::Retrieve { destination, .. }
            | Self::Extract { destination, .. }
            | Self::Generate { destination, .. } => destination,
        }
    }
}

/// Result of a start attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// The job was admitted and is running.
    Started,
    /// Admission was throttled; nothing was started. Not a failure.
    Throttled,
}

/// Observed state of a batch job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStatus {
    /// Still executing.
    Running,
    /// Finished; output should exist at the spec's destination.
    Finished,
    /// Failed with the given cause.
    Failed {
        /// Failure cause reported by the infrastructure.
        cause: String,
    },
}

/// Launcher errors.
#[derive(Debug, Error)]
pub enum LauncherError {
    /// The infrastructure rejected the start outright.
    #[error("batch job start failed: {0}")]
    StartFailed(String),

    /// Status/cancel plumbing failed.
    #[error("launcher I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Batch job launcher contract.
pub trait BatchLauncher: Send + Sync {
    /// Starts a job under the given id.
    fn start(&self, id: &str, spec: &BatchJobSpec) -> Result<StartOutcome, LauncherError>;

    /// Reports a job's status, or `None` when the launcher has no record
    /// of the id (e.g. a throttled admission).
    fn status(&self, id: &str) -> Result<Option<BatchStatus>, LauncherError>;

    /// Cancels a job. Unknown ids are a no-op.
    fn cancel(&self, id: &str) -> Result<(), LauncherError>;
}

/// Development launcher executing jobs with local filesystem copies.
///
/// Retrievals copy `<archive_root>/<source_id>` to the destination;
/// extractions and generations copy their staged source. Jobs complete
/// inside `start`, so `status` immediately reports the outcome. Useful for
/// wiring the service without grid infrastructure and for integration
/// tests.
pub struct LocalLauncher {
    archive_root: PathBuf,
    jobs: parking_lot::Mutex<HashMap<String, BatchStatus>>,
}

impl LocalLauncher {
    /// Creates a launcher resolving retrievals under the given root.
    pub fn new(archive_root: impl Into<PathBuf>) -> Self {
        Self {
            archive_root: archive_root.into(),
            jobs: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn run(&self, spec: &BatchJobSpec) -> std::io::Result<()> {
        let (source, destination) = match spec {
            BatchJobSpec::Retrieve {
                source_id,
                destination,
            } => (self.archive_root.join(source_id.as_str()), destination),
            BatchJobSpec::Extract {
                bundle_path,
                destination,
                ..
            } => (bundle_path.clone(), destination),
            BatchJobSpec::Generate {
                source_path,
                destination,
                ..
            } => (source_path.clone(), destination),
        };
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(&source, destination)?;
        Ok(())
    }
}

impl BatchLauncher for LocalLauncher {
    fn start(&self, id: &str, spec: &BatchJobSpec) -> Result<StartOutcome, LauncherError> {
        let status = match self.run(spec) {
            Ok(()) => BatchStatus::Finished,
            Err(e) => BatchStatus::Failed {
                cause: e.to_string(),
            },
        };
        debug!(id, ?status, "Local batch job executed");
        self.jobs.lock().insert(id.to_string(), status);
        Ok(StartOutcome::Started)
    }

    fn status(&self, id: &str) -> Result<Option<BatchStatus>, LauncherError> {
        Ok(self.jobs.lock().get(id).cloned())
    }

    fn cancel(&self, id: &str) -> Result<(), LauncherError> {
        self.jobs.lock().remove(id);
        Ok(())
    }
}
