//! Sibling checksum files.
//!
//! Every data file in the staging area carries a `<name>.sha256` sibling
//! holding the hex digest of its contents.

use crate::cache::StagingLayout;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};

/// Computes the SHA-256 hex digest of a file.
pub fn sha256_hex(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Writes the sibling checksum file for a data file, returning its path.
pub fn write_checksum(path: &Path) -> std::io::Result<PathBuf> {
    let digest = sha256_hex(path)?;
    let sum_path = StagingLayout::checksum_path(path);
    std::fs::write(&sum_path, format!("{digest}\n"))?;
    Ok(sum_path)
}

/// Verifies a data file against its sibling checksum.
///
/// Returns false on digest mismatch; a missing sibling is an error.
pub fn verify_checksum(path: &Path) -> std::io::Result<bool> {
    let recorded = std::fs::read_to_string(StagingLayout::checksum_path(path))?;
    let actual = sha256_hex(path)?;
    Ok(recorded.trim() == actual)
}
