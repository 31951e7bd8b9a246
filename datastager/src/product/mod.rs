//! Data-product model: kinds, references and cutout geometry.
//!
//! A *product* is one deliverable file of a request. Products are either
//! archived originals served as-is, or derived artifacts (cutouts, spectra,
//! catalogue extracts, bundle members) generated on demand. The kind decides
//! how a product flows through the cache and the packaging pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an archive content item.
///
/// Content ids are opaque strings assigned by the archive (observation ids,
/// catalogue names, bundle member paths). They key the cache: two requests
/// asking for the same content id share one cache entry.
#[derive(Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ContentId(String);

impl ContentId {
    /// Creates a content id from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string value of this content id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", self.0)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ContentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ContentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Kind of a data product.
///
/// The kind decides two things: whether the file is shared across requests
/// (hard-linked from the dated cache directories) or generated directly into
/// the request directory, and whether it depends on a parent original being
/// staged first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductKind {
    /// Archived original file, retrieved as-is.
    Plain,
    /// Catalogue extract produced by the query service.
    Catalogue,
    /// Image cutout generated from a parent original.
    Cutout,
    /// Spectrum generated from a parent original.
    GeneratedSpectrum,
    /// Bundle of small products packed together for archival storage.
    Encapsulated,
    /// Error report artifact written for a failed product.
    ErrorReport,
    /// Evaluation artifact accompanying a delivery.
    Evaluation,
}

impl ProductKind {
    /// True for kinds the packaging pipeline writes directly into the
    /// request directory. These are never hard-linked during
    /// materialization; their cache entries exist for capacity accounting
    /// and lifecycle only.
    pub fn is_generated_in_place(&self) -> bool {
        matches!(
            self,
            Self::Catalogue
                | Self::Cutout
                | Self::GeneratedSpectrum
                | Self::ErrorReport
                | Self::Evaluation
        )
    }

    /// True for kinds derived from a parent file that must be staged first.
    pub fn is_derived(&self) -> bool {
        matches!(self, Self::Cutout | Self::GeneratedSpectrum)
    }

    /// True for kinds the orchestrator populates via an external batch job.
    ///
    /// Catalogue extracts and error reports are produced synchronously by
    /// the pipeline itself and never reach the launcher.
    pub fn is_downloaded(&self) -> bool {
        !matches!(self, Self::Catalogue | Self::ErrorReport | Self::Evaluation)
    }
}

impl fmt::Display for ProductKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Plain => "plain",
            Self::Catalogue => "catalogue",
            Self::Cutout => "cutout",
            Self::GeneratedSpectrum => "spectrum",
            Self::Encapsulated => "encapsulated",
            Self::ErrorReport => "error",
            Self::Evaluation => "evaluation",
        };
        write!(f, "{}", name)
    }
}

/// Geometry of a cutout, computed upstream by the astrometric step.
///
/// The bounds arrive fully resolved; this crate treats them as opaque job
/// parameters. Plane ranges cover optional third and fourth image axes
/// (frequency/polarization planes); an unset range means the corresponding
/// axis flag is omitted from the generation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CutoutBounds {
    /// Right ascension of the cutout center, degrees.
    pub ra_deg: f64,
    /// Declination of the cutout center, degrees.
    pub dec_deg: f64,
    /// Angular size of the cutout, degrees.
    pub size_deg: f64,
    /// Inclusive plane range on the third axis, if bounded.
    pub plane_range_3: Option<(u32, u32)>,
    /// Inclusive plane range on the fourth axis, if bounded.
    pub plane_range_4: Option<(u32, u32)>,
}

impl CutoutBounds {
    /// Creates bounds covering the full depth of both extra axes.
    pub fn new(ra_deg: f64, dec_deg: f64, size_deg: f64) -> Self {
        Self {
            ra_deg,
            dec_deg,
            size_deg,
            plane_range_3: None,
            plane_range_4: None,
        }
    }

    /// Bounds a plane range on the third axis.
    pub fn with_plane_range_3(mut self, lo: u32, hi: u32) -> Self {
        self.plane_range_3 = Some((lo, hi));
        self
    }

    /// Bounds a plane range on the fourth axis.
    pub fn with_plane_range_4(mut self, lo: u32, hi: u32) -> Self {
        self.plane_range_4 = Some((lo, hi));
        self
    }
}

/// One requested data product.
///
/// A `ProductRef` travels with a request from submission through packaging.
/// For derived kinds the parent edge names the original the product is
/// generated from; the orchestrator will not start the generation job until
/// the parent's own cache entry is available.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRef {
    /// Archive content id.
    pub id: ContentId,
    /// Product kind.
    pub kind: ProductKind,
    /// Delivered file name.
    pub file_name: String,
    /// Estimated size in bytes, refined after packaging.
    pub size: u64,
    /// Content id of the parent original for derived kinds.
    pub parent: Option<ContentId>,
    /// Cutout geometry for cutout/spectrum kinds.
    pub bounds: Option<CutoutBounds>,
}

impl ProductRef {
    /// Creates a reference to an archived original.
    pub fn plain(id: impl Into<ContentId>, file_name: impl Into<String>, size: u64) -> Self {
        Self {
            id: id.into(),
            kind: ProductKind::Plain,
            file_name: file_name.into(),
            size,
            parent: None,
            bounds: None,
        }
    }

    /// Creates a reference to a derived product of the given kind.
    pub fn derived(
        id: impl Into<ContentId>,
        kind: ProductKind,
        file_name: impl Into<String>,
        size: u64,
        parent: impl Into<ContentId>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            file_name: file_name.into(),
            size,
            parent: Some(parent.into()),
            bounds: None,
        }
    }

    /// Attaches cutout geometry.
    pub fn with_bounds(mut self, bounds: CutoutBounds) -> Self {
        self.bounds = Some(bounds);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_id_roundtrip() {
        let id = ContentId::new("obs-00142");
        assert_eq!(id.as_str(), "obs-00142");
        assert_eq!(format!("{}", id), "obs-00142");
    }

    #[test]
    fn test_content_id_equality() {
        assert_eq!(ContentId::new("a"), ContentId::from("a"));
        assert_ne!(ContentId::new("a"), ContentId::new("b"));
    }

    #[test]
    fn test_in_place_kinds() {
        assert!(ProductKind::Catalogue.is_generated_in_place());
        assert!(ProductKind::Cutout.is_generated_in_place());
        assert!(ProductKind::GeneratedSpectrum.is_generated_in_place());
        assert!(ProductKind::ErrorReport.is_generated_in_place());
        assert!(ProductKind::Evaluation.is_generated_in_place());
        assert!(!ProductKind::Plain.is_generated_in_place());
        assert!(!ProductKind::Encapsulated.is_generated_in_place());
    }

    #[test]
    fn test_derived_kinds() {
        assert!(ProductKind::Cutout.is_derived());
        assert!(ProductKind::GeneratedSpectrum.is_derived());
        assert!(!ProductKind::Plain.is_derived());
        assert!(!ProductKind::Catalogue.is_derived());
    }

    #[test]
    fn test_downloaded_kinds() {
        assert!(ProductKind::Plain.is_downloaded());
        assert!(ProductKind::Cutout.is_downloaded());
        assert!(ProductKind::Encapsulated.is_downloaded());
        assert!(!ProductKind::Catalogue.is_downloaded());
        assert!(!ProductKind::ErrorReport.is_downloaded());
    }

    #[test]
    fn test_cutout_bounds_builder() {
        let bounds = CutoutBounds::new(83.82, -5.39, 0.25)
            .with_plane_range_3(1, 4)
            .with_plane_range_4(0, 0);

        assert_eq!(bounds.plane_range_3, Some((1, 4)));
        assert_eq!(bounds.plane_range_4, Some((0, 0)));
    }

    #[test]
    fn test_product_ref_plain() {
        let product = ProductRef::plain("obs-1", "obs-1.fits", 2048);
        assert_eq!(product.kind, ProductKind::Plain);
        assert!(product.parent.is_none());
        assert!(product.bounds.is_none());
    }

    #[test]
    fn test_product_ref_derived_carries_parent() {
        let product = ProductRef::derived(
            "obs-1#cut-0",
            ProductKind::Cutout,
            "obs-1_cutout.fits",
            512,
            "obs-1",
        )
        .with_bounds(CutoutBounds::new(10.0, 20.0, 0.1));

        assert_eq!(product.parent, Some(ContentId::new("obs-1")));
        assert!(product.bounds.is_some());
    }
}
