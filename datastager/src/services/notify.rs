//! Request notification seam.
//!
//! Production wires an email sender here; templates and transport are out
//! of scope for this crate, so the shipped implementations log or discard.

use crate::request::Request;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

/// Receives request completion and failure notifications.
pub trait Notifier: Send + Sync {
    /// The request completed; its deliverables expire at the given time.
    fn request_completed(&self, request: &Request, expires_at: DateTime<Utc>);

    /// The request failed with the given message.
    fn request_failed(&self, request: &Request, message: &str);
}

/// Notifier that logs through `tracing`.
#[derive(Debug, Default, Clone)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn request_completed(&self, request: &Request, expires_at: DateTime<Utc>) {
        info!(
            request = %request.id,
            total_size = request.total_size,
            expires_at = %expires_at,
            "Request completed"
        );
    }

    fn request_failed(&self, request: &Request, message: &str) {
        warn!(request = %request.id, message, "Request failed");
    }
}

/// Notifier that discards everything.
#[derive(Debug, Default, Clone)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn request_completed(&self, _request: &Request, _expires_at: DateTime<Utc>) {}

    fn request_failed(&self, _request: &Request, _message: &str) {}
}
