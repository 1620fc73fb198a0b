//! Notifications for successful mutating requests.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

/// A state change that reached the backend.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectEvent {
    /// S3-style event name, e.g. `s3:ObjectCreated:Put`.
    pub event_name: &'static str,
    /// Affected bucket.
    pub bucket: String,
    /// Affected key, for object events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Canonical id of the caller.
    pub principal: String,
    /// Gateway-assigned request id.
    pub request_id: String,
    /// When the change was acknowledged.
    pub time: DateTime<Utc>,
}

/// Receives object events. Implementations must not block.
pub trait EventNotifier: Send + Sync + 'static {
    /// Publish one event.
    fn notify(&self, event: ObjectEvent);
}

/// Logs events through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl EventNotifier for TracingNotifier {
    fn notify(&self, event: ObjectEvent) {
        info!(
            target: "s3gate::events",
            event = event.event_name,
            bucket = %event.bucket,
            key = ?event.key,
            principal = %event.principal,
            request_id = %event.request_id,
            "object event"
        );
    }
}
