//! Error types for the packaging pipeline.
//!
//! Variants keep cache capacity, cache I/O and downstream service failures
//! distinct so operators can tell "the staging disk is full" apart from
//! "the catalogue service is down".

use crate::cache::CacheError;
use crate::request::RequestId;
use crate::services::CatalogueError;
use thiserror::Error;

/// Errors that abort packaging of a request.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Cache reservation, eviction or materialization failed. Capacity
    /// exhaustion is recoverable by caller policy; see
    /// [`PipelineError::is_capacity`].
    #[error("cache failure: {0}")]
    Cache(#[from] CacheError),

    /// Catalogue extraction failed.
    #[error("catalogue extraction failed: {0}")]
    Catalogue(#[from] CatalogueError),

    /// Writing a checksum or error artifact failed.
    #[error("artifact generation failed: {0}")]
    Artifact(#[source] std::io::Error),

    /// The request is not in the store.
    #[error("unknown request {0}")]
    UnknownRequest(RequestId),

    /// Packaging was cancelled while waiting for files.
    ///
    /// Interruption during the poll sleep surfaces here; it registers
    /// cancellation and is never swallowed.
    #[error("packaging cancelled")]
    Cancelled,
}

impl PipelineError {
    /// True when the failure is cache-capacity exhaustion.
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::Cache(e) if e.is_capacity())
    }

    /// True when packaging stopped due to cancellation rather than failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
