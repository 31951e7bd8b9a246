//! Request entity and its phase state machine.
//!
//! A request is one user order for a set of data products. It is created
//! `Pending`, routed into a category queue, executed by a worker running the
//! packaging pipeline, and ends in one of the terminal phases. Admin actions
//! (hold, abort, retry) move it between phases; an action incompatible with
//! the current phase is rejected with [`PhaseError`].

use crate::product::{ContentId, ProductRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Identifier of a request.
#[derive(Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(String);

impl RequestId {
    /// Creates a request id from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string value of this request id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({})", self.0)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Phase of a request's lifecycle.
///
/// ```text
/// Pending ──► Queued ──► Executing ──► Completed
///    ▲  ▲        ▲            │    └──► Error
///    │  └────────┼────────────┤
///    │        (hold/release)  │
///    └─── Held ◄──────────────┘
///
/// any non-terminal ──► Aborted
/// Completed | Error | Aborted ──► Queued   (explicit retry)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestPhase {
    /// Submitted, not yet placed on a queue.
    Pending,
    /// Waiting on a category queue.
    Queued,
    /// A worker is packaging the request.
    Executing,
    /// All products delivered.
    Completed,
    /// Packaging failed; the message field holds the cause.
    Error,
    /// Cancelled by an admin or the requester.
    Aborted,
    /// Parked by an admin; resubmitted on release.
    Held,
}

impl RequestPhase {
    /// True for phases no further execution can leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Aborted)
    }

    /// True while the request still claims its cache entries.
    ///
    /// Open requests pin their files: an entry referenced by an open request
    /// must not be evicted or deleted out from under it.
    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }

    /// True for phases that may be held.
    pub fn can_hold(&self) -> bool {
        matches!(self, Self::Pending | Self::Queued | Self::Executing)
    }
}

impl fmt::Display for RequestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "PENDING",
            Self::Queued => "QUEUED",
            Self::Executing => "EXECUTING",
            Self::Completed => "COMPLETED",
            Self::Error => "ERROR",
            Self::Aborted => "ABORTED",
            Self::Held => "HELD",
        };
        write!(f, "{}", name)
    }
}

/// Phase transition rejected because the current phase is incompatible.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("request {id} is {phase}, cannot {action}")]
pub struct PhaseError {
    /// Request the action targeted.
    pub id: RequestId,
    /// Phase the request was in.
    pub phase: RequestPhase,
    /// Action that was rejected (e.g. "hold", "retry").
    pub action: &'static str,
}

/// How delivered files reach the requester.
///
/// The staging backend materializes the same request directory either way;
/// the mode only travels with the request for the delivery layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadMode {
    /// Requester fetches files individually.
    Direct,
    /// Files are served as a single archive stream.
    Packaged,
}

/// A user request for a set of data products.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Unique identifier.
    pub id: RequestId,
    /// Current lifecycle phase.
    pub phase: RequestPhase,
    /// Delivery mode.
    pub mode: DownloadMode,
    /// Sum of delivered file sizes, persisted after packaging.
    pub total_size: u64,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Time the request's deliverables expire from the staging area.
    pub expires_at: DateTime<Utc>,
    /// Raw request parameters as submitted, kept for reproduction.
    pub raw_parameters: String,
    /// Requested products.
    pub products: Vec<ProductRef>,
    /// Failure message for the Error phase.
    pub error_message: Option<String>,
}

impl Request {
    /// Creates a pending request.
    pub fn new(
        id: impl Into<RequestId>,
        mode: DownloadMode,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        products: Vec<ProductRef>,
    ) -> Self {
        Self {
            id: id.into(),
            phase: RequestPhase::Pending,
            mode,
            total_size: 0,
            created_at,
            expires_at,
            raw_parameters: String::new(),
            products,
            error_message: None,
        }
    }

    /// Attaches the raw parameter string.
    pub fn with_raw_parameters(mut self, raw: impl Into<String>) -> Self {
        self.raw_parameters = raw.into();
        self
    }

    /// Estimated total size from the product references.
    ///
    /// Used for category routing before packaging refines the sizes.
    pub fn estimated_size(&self) -> u64 {
        self.products.iter().map(|p| p.size).sum()
    }

    /// Content ids of every requested product.
    pub fn content_ids(&self) -> Vec<ContentId> {
        self.products.iter().map(|p| p.id.clone()).collect()
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
