//! Audit records.
//!
//! Every request that reaches the pipeline produces exactly one
//! [`AuditEvent`], carrying the true [`FailureKind`] even when the client
//! only sees a generic error.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::FailureKind;

/// How a request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// The pipeline accepted the request and the handler answered.
    Accepted,
    /// Authentication or authorization refused the request.
    Denied,
    /// Anything else went wrong.
    Failed,
}

impl AuditOutcome {
    /// The outcome implied by a failure kind.
    #[must_use]
    pub fn from_failure(kind: FailureKind) -> Self {
        if kind.is_denial() {
            Self::Denied
        } else {
            Self::Failed
        }
    }
}

/// One audit record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    /// Gateway-assigned request id.
    pub request_id: String,
    /// When the request arrived.
    pub timestamp: DateTime<Utc>,
    /// HTTP method.
    pub method: String,
    /// Request path as received.
    pub path: String,
    /// Target bucket, once routed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    /// Target key, once routed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Resolved action, once routed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Access key that signed the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    /// Canonical id of the caller, once authenticated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
    /// How the request ended.
    pub outcome: AuditOutcome,
    /// The true failure kind, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    /// Internal failure detail. Never sent to the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// HTTP status returned.
    pub status: u16,
    /// Time spent on the request.
    pub elapsed_ms: u64,
}

/// Receives audit records.
pub trait AuditSink: Send + Sync + 'static {
    /// Record one event.
    fn record(&self, event: &AuditEvent);
}

/// Writes audit records as JSON through `tracing` under the `s3gate::audit`
/// target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) {
        match serde_json::to_string(event) {
            Ok(json) => info!(target: "s3gate::audit", "{json}"),
            Err(err) => warn!(target: "s3gate::audit", error = %err, request_id = %event.request_id, "failed to serialize audit event"),
        }
    }
}
