//! Capacity-bounded staging cache.
//!
//! Provides reservation-based capacity accounting, unlock-time eviction
//! and request-directory materialization via hard links.

mod entry;
mod error;
mod layout;
mod store;

pub use entry::CacheEntry;
pub use error::CacheError;
pub use layout::{StagingLayout, CHECKSUM_EXTENSION};
pub use store::{CacheStore, Reservation};
