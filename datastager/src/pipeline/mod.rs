//! Packaging pipeline: assembles a request's full file set.

mod error;
mod packager;

pub use error::PipelineError;
pub use packager::{Packager, PackagingReport};
