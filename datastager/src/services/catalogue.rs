//! Catalogue extraction service.

use crate::product::ProductRef;
use crate::services::checksum::write_checksum;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Catalogue service errors.
///
/// Kept distinct from cache errors so operators can separate "cache
/// capacity" from "downstream service" problems.
#[derive(Debug, Error)]
pub enum CatalogueError {
    /// The query service rejected or failed the extraction.
    #[error("catalogue query failed for {id}: {message}")]
    QueryFailed {
        /// Content id of the catalogue product.
        id: String,
        /// Service-reported cause.
        message: String,
    },

    /// Writing the extract or its checksum failed.
    #[error("catalogue write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Extracts catalogue products synchronously.
pub trait CatalogueService: Send + Sync {
    /// Runs the extraction query and writes the extract plus its checksum
    /// sibling to the destination. Returns the extract size in bytes.
    fn extract(&self, product: &ProductRef, destination: &Path) -> Result<u64, CatalogueError>;
}

/// Development service producing CSV extracts from a local table directory.
///
/// Looks for `<root>/<content-id>.csv` and copies it to the destination;
/// missing tables produce an empty extract with a header row so downstream
/// tooling still parses.
pub struct CsvCatalogueService {
    root: PathBuf,
}

impl CsvCatalogueService {
    /// Creates a service over the given table directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl CatalogueService for CsvCatalogueService {
    fn extract(&self, product: &ProductRef, destination: &Path) -> Result<u64, CatalogueError> {
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let table = self.root.join(format!("{}.csv", product.id));
        if table.exists() {
            std::fs::copy(&table, destination)?;
        } else {
            std::fs::write(destination, "# source,ra,dec\n")?;
        }
        write_checksum(destination)?;
        Ok(std::fs::metadata(destination)?.len())
    }
}
