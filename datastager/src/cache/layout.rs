//! On-disk layout of the staging area.
//!
//! ```text
//! <root>/
//!   shared/<YYYY-MM-DD>/      shared originals and generated files,
//!                             hard-linked into request directories
//!   requests/<request-id>/    per-request deliverables
//! ```
//!
//! Every data file has a sibling checksum file (`<name>.sha256`). Dated
//! subdirectories keep the shared area enumerable without a million-entry
//! flat directory.

use crate::request::RequestId;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};

/// Extension of sibling checksum files.
pub const CHECKSUM_EXTENSION: &str = "sha256";

/// Path layout of the staging area.
#[derive(Debug, Clone)]
pub struct StagingLayout {
    root: PathBuf,
}

impl StagingLayout {
    /// Creates a layout rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The staging root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Dated shared directory for the given day.
    pub fn shared_dir(&self, date: NaiveDate) -> PathBuf {
        self.root
            .join("shared")
            .join(date.format("%Y-%m-%d").to_string())
    }

    /// Path of a shared file created on the given day.
    pub fn shared_path(&self, date: NaiveDate, file_name: &str) -> PathBuf {
        self.shared_dir(date).join(file_name)
    }

    /// Output directory of a request.
    pub fn request_dir(&self, id: &RequestId) -> PathBuf {
        self.root.join("requests").join(id.as_str())
    }

    /// Path of a deliverable inside a request directory.
    pub fn request_path(&self, id: &RequestId, file_name: &str) -> PathBuf {
        self.request_dir(id).join(file_name)
    }

    /// Sibling checksum path of a data file.
    pub fn checksum_path(path: &Path) -> PathBuf {
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(".");
        name.push(CHECKSUM_EXTENSION);
        path.with_file_name(name)
    }

    /// Hard-links a data file and its checksum sibling into a directory.
    ///
    /// The checksum sibling is optional on the source side; a missing one
    /// is skipped rather than failing the link.
    pub fn link_into(&self, src: &Path, dst_dir: &Path) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(dst_dir)?;
        let file_name = src.file_name().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "source has no file name")
        })?;
        let dst = dst_dir.join(file_name);
        if !dst.exists() {
            std::fs::hard_link(src, &dst)?;
        }

        let src_sum = Self::checksum_path(src);
        if src_sum.exists() {
            let dst_sum = Self::checksum_path(&dst);
            if !dst_sum.exists() {
                std::fs::hard_link(&src_sum, &dst_sum)?;
            }
        }
        Ok(dst)
    }

    /// Removes a data file and its checksum sibling. Missing files are
    /// tolerated; the caller may race with another cleanup.
    pub fn remove_with_checksum(path: &Path) -> std::io::Result<()> {
        remove_if_exists(path)?;
        remove_if_exists(&Self::checksum_path(path))
    }

    /// Removes a request directory and everything under it.
    pub fn remove_request_dir(&self, id: &RequestId) -> std::io::Result<()> {
        let dir = self.request_dir(id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
