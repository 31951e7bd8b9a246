//! Archive file-location and recall service.

use crate::product::ContentId;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Archive service errors.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The archive service could not be reached.
    #[error("archive service unavailable: {0}")]
    Unavailable(String),

    /// The recall request was rejected.
    #[error("recall rejected: {0}")]
    RecallRejected(String),
}

/// Locates archived content on disk and triggers staged recall.
///
/// `locate` answers where an original currently sits on accessible disk;
/// `None` means the content is only on offline storage and must be fetched
/// into the cache. `recall` signals the staging of originals from offline
/// storage; the recall itself proceeds asynchronously and completion is
/// observed through the download jobs that depend on it.
pub trait ArchiveLocator: Send + Sync {
    /// On-disk path of the content, if already staged.
    fn locate(&self, id: &ContentId) -> Result<Option<PathBuf>, ArchiveError>;

    /// Triggers recall of the given contents from offline storage.
    fn recall(&self, ids: &[ContentId]) -> Result<(), ArchiveError>;
}

/// Locator over a plain directory tree, for development and tests.
///
/// Content is "staged" when `<root>/<content-id>` exists; recall is a
/// logged no-op because everything a directory archive has is already on
/// disk.
pub struct DirectoryArchive {
    root: PathBuf,
}

impl DirectoryArchive {
    /// Creates a locator over the given root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The archive root.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ArchiveLocator for DirectoryArchive {
    fn locate(&self, id: &ContentId) -> Result<Option<PathBuf>, ArchiveError> {
        let path = self.root.join(id.as_str());
        Ok(path.exists().then_some(path))
    }

    fn recall(&self, ids: &[ContentId]) -> Result<(), ArchiveError> {
        info!(count = ids.len(), "Recall requested (directory archive, no-op)");
        Ok(())
    }
}
