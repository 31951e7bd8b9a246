//! Cache error taxonomy.
//!
//! Capacity exhaustion is the one recoverable variant: callers decide
//! whether to fail the request or retry later. Everything else is fatal to
//! the current operation.

use crate::product::ContentId;
use thiserror::Error;

/// Errors raised by the cache store.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Not enough space even after evicting every unlocked entry.
    #[error(
        "cache capacity exhausted: required {required} bytes, \
         free {free} + reclaimable {reclaimable}"
    )]
    CapacityExhausted {
        /// Bytes the reservation needed.
        required: u64,
        /// Bytes free before eviction.
        free: u64,
        /// Bytes held by unlocked entries.
        reclaimable: u64,
    },

    /// Eviction found no candidates while still short of space.
    ///
    /// The reservation pre-check said enough was reclaimable, so an empty
    /// candidate page means the aggregate accounting and the entry records
    /// disagree.
    #[error("cache inconsistency: {0}")]
    Inconsistent(String),

    /// Filesystem operation failed.
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No entry exists for the content id: space was never reserved.
    #[error("no cache entry for {0}: reserve before polling")]
    NotReserved(ContentId),

    /// The entry's retry budget is spent; it will never become available.
    #[error("download attempts exhausted for {0}")]
    RetriesExhausted(ContentId),
}

impl CacheError {
    /// True for the capacity-exhausted variant, which callers may recover
    /// from by their own policy.
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::CapacityExhausted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_display() {
        let err = CacheError::CapacityExhausted {
            required: 50,
            free: 10,
            reclaimable: 20,
        };
        assert!(err.is_capacity());
        assert_eq!(
            format!("{}", err),
            "cache capacity exhausted: required 50 bytes, free 10 + reclaimable 20"
        );
    }

    #[test]
    fn test_other_variants_not_capacity() {
        assert!(!CacheError::NotReserved(ContentId::new("x")).is_capacity());
        assert!(!CacheError::Inconsistent("mismatch".into()).is_capacity());
    }
}
