//! Datastager - staging backend for a scientific data-archive access service
//!
//! This library materializes user-requested data products (archived
//! originals, generated cutouts, extracted catalogues, bundle-extracted
//! files) into per-request output directories, backed by a capacity-bounded
//! disk cache that avoids redundant retrieval and generation.
//!
//! # High-Level API
//!
//! For most use cases, the [`service`] module provides a simplified facade:
//!
//! ```ignore
//! use datastager::service::{StagingService, ServiceConfig};
//!
//! let config = ServiceConfig::default();
//! let service = StagingService::new(config)?;
//!
//! // Start the download orchestrator and category schedulers
//! service.start();
//!
//! let receipt = service.submit(request)?;
//! ```

pub mod cache;
pub mod config;
pub mod launcher;
pub mod logging;
pub mod orchestrator;
pub mod pipeline;
pub mod product;
pub mod request;
pub mod scheduler;
pub mod service;
pub mod services;
pub mod store;

/// Version of the datastager library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
